use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProspectError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Scrape error: {0}")]
    Scrape(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Write-back error: {0}")]
    WriteBack(String),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// The only two failure categories surfaced to the store. Drives operator
/// retry decisions: transient leads may be re-queued, permanent ones need
/// intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Permanent,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
        }
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "permanent" => Ok(Self::Permanent),
            other => Err(format!("unknown error category: {other}")),
        }
    }
}

/// Whether an upstream HTTP status is worth retrying (or falling through
/// to the next adapter in a chain).
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Classify an upstream HTTP status into a run-failure category.
pub fn classify_status(status: u16) -> ErrorCategory {
    if is_retryable_status(status) {
        ErrorCategory::Transient
    } else {
        ErrorCategory::Permanent
    }
}
