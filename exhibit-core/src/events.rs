// Hub -> client event protocol

use crate::telemetry::TelemetrySnapshot;
use crate::types::{Language, StationEvent};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

/// Message pushed to every interactive client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Telemetry(TelemetrySnapshot),
    /// Discrete exhibit event such as `site_discovered`
    Event {
        event: String,
        #[serde(flatten)]
        detail: Map<String, JsonValue>,
    },
    StationStatus(StationEvent),
    VoiceResponse {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        emotion: Option<String>,
        lang: Language,
    },
    SetEmotion {
        emotion: String,
    },
}

impl ClientEvent {
    pub fn site_discovered(station_id: impl Into<String>, site_name: Option<String>) -> Self {
        let mut detail = Map::new();
        detail.insert("station_id".to_string(), JsonValue::String(station_id.into()));
        if let Some(name) = site_name {
            detail.insert("site_name".to_string(), JsonValue::String(name));
        }
        ClientEvent::Event {
            event: "site_discovered".to_string(),
            detail,
        }
    }

    /// Tag value as seen by clients
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Telemetry(_) => "telemetry",
            ClientEvent::Event { .. } => "event",
            ClientEvent::StationStatus(_) => "station_status",
            ClientEvent::VoiceResponse { .. } => "voice_response",
            ClientEvent::SetEmotion { .. } => "set_emotion",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
