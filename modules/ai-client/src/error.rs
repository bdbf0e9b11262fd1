use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Batch {id} did not finish within {timeout_secs}s")]
    BatchTimeout { id: String, timeout_secs: u64 },

    #[error("Batch {id} ended in state {state}")]
    BatchFailed { id: String, state: String },
}

impl AiError {
    /// Upstream status code, when the failure was an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            AiError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a retry (or tier-level fallback) could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::Network(_) | AiError::BatchTimeout { .. } => true,
            AiError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        AiError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for AiError {
    fn from(err: serde_json::Error) -> Self {
        AiError::Parse(err.to_string())
    }
}
