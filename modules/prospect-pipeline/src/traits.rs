//! Capability seams the pipeline depends on. Each external backend is one
//! implementation; tests swap in mocks.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use prospect_common::{Company, FieldMapping, Question, Tier, TokenUsage};

// --- Scraping ---

/// Adapter failure with the retryability the chain needs to decide between
/// falling through and aborting.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
    pub retryable: bool,
}

impl FetchError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: prospect_common::error::is_retryable_status(status),
        }
    }
}

/// One scraper backend. Empty text with no error means "no content here";
/// the chain falls through to the next adapter.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError>;
    fn name(&self) -> &str;
}

// --- LLM answering ---

/// A question rendered into a prompt, ready for one tier's dispatch.
#[derive(Debug, Clone)]
pub struct QuestionPrompt {
    pub question_id: String,
    pub system: String,
    pub user: String,
}

/// Raw model output for one question. `text` is None when the provider
/// errored for this item; usage is still charged.
#[derive(Debug, Clone)]
pub struct RawAnswer {
    pub question_id: String,
    pub text: Option<String>,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait AnswerLlm: Send + Sync {
    /// Answer all prompts at one tier. Implementations batch when the
    /// provider supports it and more than one prompt is given.
    async fn answer(&self, tier: Tier, prompts: Vec<QuestionPrompt>) -> Result<Vec<RawAnswer>>;

    /// Pick the best-fitting page type for a scraped page.
    async fn classify(
        &self,
        text: &str,
        candidates: &[String],
    ) -> Result<(String, TokenUsage)>;
}

// --- Lead registry ---

#[async_trait]
pub trait LeadRegistry: Send + Sync {
    /// Leads currently queued for enrichment, oldest first.
    async fn fetch_queued(&self, limit: usize) -> Result<Vec<Company>>;

    async fn load_questions(&self) -> Result<Vec<Question>>;

    async fn load_fields(&self) -> Result<Vec<FieldMapping>>;

    /// Current text of the given destination columns, for diffing.
    async fn read_lead_fields(
        &self,
        page_id: &str,
        destinations: &[String],
    ) -> Result<HashMap<String, String>>;

    /// Write changed columns and/or a status transition. Never deletes.
    async fn write_lead(
        &self,
        page_id: &str,
        status: Option<&str>,
        fields: &HashMap<String, String>,
    ) -> Result<()>;
}

// --- CRM ---

#[async_trait]
pub trait CrmWriter: Send + Sync {
    async fn read_fields(
        &self,
        account_id: &str,
        fields: &[String],
    ) -> Result<HashMap<String, serde_json::Value>>;

    async fn update_fields(
        &self,
        account_id: &str,
        fields: &HashMap<String, serde_json::Value>,
    ) -> Result<()>;
}
