pub mod error;
pub mod types;

pub use error::{AiError, Result};
pub use types::*;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::debug;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// How often the batch poll loop checks processing status.
const BATCH_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct AnthropicClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            api_key: api_key.to_string(),
            http,
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| AiError::Parse(e.to_string()))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Single Messages API call.
    pub async fn message(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/messages", self.base_url);

        debug!(model = %request.model, "Anthropic message request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Create a message batch.
    pub async fn create_batch(&self, requests: Vec<BatchRequestItem>) -> Result<MessageBatch> {
        let url = format!("{}/messages/batches", self.base_url);

        debug!(requests = requests.len(), "Anthropic batch create");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&CreateBatchRequest { requests })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    pub async fn get_batch(&self, id: &str) -> Result<MessageBatch> {
        let url = format!("{}/messages/batches/{id}", self.base_url);
        let response = self.http.get(&url).headers(self.headers()?).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Fetch and parse the JSONL results stream of an ended batch.
    pub async fn batch_results(&self, batch: &MessageBatch) -> Result<Vec<BatchResultLine>> {
        let results_url = batch.results_url.as_deref().ok_or_else(|| {
            AiError::BatchFailed {
                id: batch.id.clone(),
                state: format!("{} (no results_url)", batch.processing_status),
            }
        })?;

        let response = self
            .http
            .get(results_url)
            .headers(self.headers()?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        let mut lines = Vec::new();
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            lines.push(serde_json::from_str(line)?);
        }
        Ok(lines)
    }

    /// Create a batch and poll until it ends or `timeout` elapses.
    pub async fn run_batch(
        &self,
        requests: Vec<BatchRequestItem>,
        timeout: Duration,
    ) -> Result<Vec<BatchResultLine>> {
        let batch = self.create_batch(requests).await?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let current = self.get_batch(&batch.id).await?;
            if current.is_ended() {
                return self.batch_results(&current).await;
            }
            match current.processing_status.as_str() {
                "in_progress" | "canceling" => {}
                other => {
                    return Err(AiError::BatchFailed {
                        id: current.id,
                        state: other.to_string(),
                    });
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AiError::BatchTimeout {
                    id: batch.id,
                    timeout_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(BATCH_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trims_trailing_slash() {
        let client = AnthropicClient::new("sk-ant-test").with_base_url("https://proxy.test/v1/");
        assert_eq!(client.base_url, "https://proxy.test/v1");
    }
}
