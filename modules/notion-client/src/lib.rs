pub mod error;
pub mod types;

pub use error::{NotionError, Result};
pub use types::*;

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const NOTION_API_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

/// Notion enforces ~3 requests per second per integration.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(350);

pub struct NotionClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    /// Last request instant; serializes request pacing across callers.
    last_request: Mutex<Option<Instant>>,
}

impl NotionClient {
    pub fn new(token: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: NOTION_API_URL.to_string(),
            token: token.to_string(),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Wait until the pacing window allows the next request.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(NotionError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    /// Query one page of a database.
    pub async fn query_database(
        &self,
        database_id: &str,
        request: &QueryRequest,
    ) -> Result<QueryResponse> {
        self.pace().await;
        let url = format!("{}/databases/{database_id}/query", self.base_url);

        debug!(database_id, "Notion database query");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(request)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    /// Query every page of a database, following cursors. `limit` of 0 means
    /// no cap.
    pub async fn query_all(
        &self,
        database_id: &str,
        filter: Option<serde_json::Value>,
        limit: usize,
    ) -> Result<Vec<Page>> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let response = self
                .query_database(
                    database_id,
                    &QueryRequest {
                        filter: filter.clone(),
                        start_cursor: cursor.clone(),
                        page_size: Some(100),
                    },
                )
                .await?;

            pages.extend(response.results);
            if limit > 0 && pages.len() >= limit {
                pages.truncate(limit);
                break;
            }
            if !response.has_more {
                break;
            }
            cursor = response.next_cursor;
        }

        Ok(pages)
    }

    /// Update page properties. Only the passed properties change.
    pub async fn update_page(
        &self,
        page_id: &str,
        properties: HashMap<String, Property>,
    ) -> Result<()> {
        self.pace().await;
        let url = format!("{}/pages/{page_id}", self.base_url);

        debug!(page_id, properties = properties.len(), "Notion page update");

        let resp = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(&serde_json::json!({ "properties": properties }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// Fetch a single page.
    pub async fn get_page(&self, page_id: &str) -> Result<Page> {
        self.pace().await;
        let url = format!("{}/pages/{page_id}", self.base_url);

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }
}
