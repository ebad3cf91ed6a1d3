//! Error types for exhibit-bus

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Broker link is down")]
    Disconnected,

    #[error("Client error: {0}")]
    Client(String),

    #[error("Payload error: {0}")]
    Payload(String),

    #[error("Topic error: {0}")]
    Topic(String),
}

impl From<rumqttc::ClientError> for BusError {
    fn from(err: rumqttc::ClientError) -> Self {
        BusError::Client(err.to_string())
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Payload(err.to_string())
    }
}
