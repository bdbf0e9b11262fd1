pub mod error;

pub use error::{JinaError, Result};

use std::time::Duration;

use tracing::debug;

const JINA_READER_URL: &str = "https://r.jina.ai";

/// Client for the Jina Reader endpoint: GET r.jina.ai/{url} returns the
/// page rendered as markdown.
pub struct JinaClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl JinaClient {
    pub fn new(api_key: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: JINA_READER_URL.to_string(),
            api_key: api_key.map(String::from),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Read a URL as markdown.
    pub async fn read(&self, url: &str) -> Result<String> {
        let endpoint = format!("{}/{}", self.base_url, url);

        debug!(url, "Jina read request");

        let mut request = self
            .client
            .get(&endpoint)
            .header("Accept", "text/plain")
            .header("X-Return-Format", "markdown");
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let resp = request.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(JinaError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }
}
