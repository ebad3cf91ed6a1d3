use exhibit_bus::BusError;
use exhibit_core::{BacklogId, BacklogStatus, TranslationError};
use thiserror::Error;

/// Backlog store failures
#[derive(Error, Debug)]
pub enum BacklogError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backlog store answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode backlog response: {0}")]
    Decode(String),

    #[error("Entry {id} cannot move to {to}")]
    InvalidTransition { id: BacklogId, to: BacklogStatus },

    #[error("Backlog entry not found: {0}")]
    NotFound(BacklogId),
}

impl From<serde_json::Error> for BacklogError {
    fn from(err: serde_json::Error) -> Self {
        BacklogError::Decode(err.to_string())
    }
}

/// Failures on the client-facing side of the hub
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Connection limit reached ({0})")]
    Capacity(usize),

    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Malformed client message: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Malformed(err.to_string())
    }
}
