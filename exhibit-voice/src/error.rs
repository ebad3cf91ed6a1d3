use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("No API key configured for provider: {0}")]
    MissingApiKey(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid reply from provider: {0}")]
    InvalidReply(String),

    #[error("Provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded")]
    RateLimited,
}

impl From<serde_json::Error> for ReasoningError {
    fn from(err: serde_json::Error) -> Self {
        ReasoningError::InvalidReply(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReasoningError>;
