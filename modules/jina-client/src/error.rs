use thiserror::Error;

pub type Result<T> = std::result::Result<T, JinaError>;

#[derive(Debug, Error)]
pub enum JinaError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl JinaError {
    pub fn status(&self) -> Option<u16> {
        match self {
            JinaError::Api { status, .. } => Some(*status),
            JinaError::Network(_) => None,
        }
    }
}

impl From<reqwest::Error> for JinaError {
    fn from(err: reqwest::Error) -> Self {
        JinaError::Network(err.to_string())
    }
}
