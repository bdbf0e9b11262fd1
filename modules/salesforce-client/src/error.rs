use thiserror::Error;

pub type Result<T> = std::result::Result<T, SalesforceError>;

#[derive(Debug, Error)]
pub enum SalesforceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl SalesforceError {
    pub fn status(&self) -> Option<u16> {
        match self {
            SalesforceError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SalesforceError::Network(_) => true,
            SalesforceError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SalesforceError {
    fn from(err: reqwest::Error) -> Self {
        SalesforceError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SalesforceError {
    fn from(err: serde_json::Error) -> Self {
        SalesforceError::Parse(err.to_string())
    }
}
