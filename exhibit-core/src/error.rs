use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure to render a structured command in the robot wire grammar
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("Malformed parameter '{name}': expected {expected}, got {actual}")]
    MalformedParameter {
        name: &'static str,
        expected: &'static str,
        actual: String,
    },

    #[error("Parameter '{name}' contains characters not allowed on the wire: {value:?}")]
    InvalidToken { name: &'static str, value: String },

    #[error("Command kind is empty")]
    EmptyCommand,
}
