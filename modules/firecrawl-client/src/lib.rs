pub mod error;

pub use error::{FirecrawlError, Result};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

const FIRECRAWL_API_URL: &str = "https://api.firecrawl.dev/v1";

pub struct FirecrawlClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<ScrapeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
}

impl FirecrawlClient {
    pub fn new(api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: FIRECRAWL_API_URL.to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Scrape a URL, returning its markdown rendering.
    pub async fn scrape(&self, url: &str) -> Result<String> {
        let endpoint = format!("{}/scrape", self.base_url);

        debug!(url, "Firecrawl scrape request");

        let resp = self
            .client
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&ScrapeRequest {
                url,
                formats: &["markdown"],
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FirecrawlError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ScrapeResponse = resp.json().await?;
        if !body.success {
            return Err(FirecrawlError::Api {
                status: status.as_u16(),
                message: body.error.unwrap_or_else(|| "scrape failed".to_string()),
            });
        }

        Ok(body.data.and_then(|d| d.markdown).unwrap_or_default())
    }
}
