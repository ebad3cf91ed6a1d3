// Client message dispatch
// {command, params} frames from interactive clients

use crate::error::HubError;
use exhibit_bus::CommandPublisher;
use exhibit_core::{
    render, ClientEvent, CommandEnvelope, CommandKind, CommandOrigin, Language, RobotPayload,
    RobotsConfig,
};
use exhibit_voice::safety::is_safety_stop;
use exhibit_voice::{VoiceOutcome, VoiceRouter};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Frame sent by a client
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub command: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub params: Map<String, JsonValue>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, JsonValue>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, HubError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Voice request that will wait on the reasoning provider
    ///
    /// Safety stops and malformed voice frames answer immediately and are not
    /// counted.
    pub fn needs_reasoning(&self) -> bool {
        self.command == "voice_command"
            && self
                .text_param("text")
                .map_or(false, |text| !is_safety_stop(text))
    }

    fn text_param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn required(&self, name: &str) -> Result<&str, HubError> {
        self.text_param(name).ok_or_else(|| {
            HubError::Malformed(format!("'{}' needs a non-empty '{}' parameter", self.command, name))
        })
    }
}

/// What a client message turned into
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    Published { target: String, wire: String },
    /// JSON action object sent to a station
    Action { target: String, action: JsonValue },
    Voice(VoiceOutcome),
    Broadcast(&'static str),
}

pub struct CommandDispatcher {
    publisher: Arc<dyn CommandPublisher>,
    voice: Arc<VoiceRouter>,
    events: mpsc::Sender<ClientEvent>,
    robots: RobotsConfig,
}

impl CommandDispatcher {
    pub fn new(
        publisher: Arc<dyn CommandPublisher>,
        voice: Arc<VoiceRouter>,
        events: mpsc::Sender<ClientEvent>,
        robots: RobotsConfig,
    ) -> Self {
        Self {
            publisher,
            voice,
            events,
            robots,
        }
    }

    /// Parse and handle one text frame
    pub async fn handle_text(&self, text: &str) -> Result<Handled, HubError> {
        let message = ClientMessage::from_json(text)?;
        self.handle(message).await
    }

    pub async fn handle(&self, message: ClientMessage) -> Result<Handled, HubError> {
        debug!("Client command: {}", message.command);
        match message.command.as_str() {
            "voice_command" => {
                let text = message.required("text")?;
                let lang = message
                    .text_param("lang")
                    .map(Language::from_tag)
                    .unwrap_or_default();
                Ok(Handled::Voice(self.voice.handle(text, lang).await))
            }
            "site_discovered" => {
                let site_id = message.required("site_id")?;
                let site_name = message.text_param("site_name").map(str::to_string);
                self.emit(ClientEvent::site_discovered(site_id, site_name)).await;
                Ok(Handled::Broadcast("site_discovered"))
            }
            "set_emotion" => {
                let emotion = message.required("emotion")?.to_string();
                let cue = emotion.to_uppercase();
                self.emit(ClientEvent::SetEmotion { emotion }).await;
                if let Err(e) = self
                    .publisher
                    .publish_emotion(&self.robots.emotion_target, &cue)
                    .await
                {
                    warn!("Failed to publish emotion cue {}: {}", cue, e);
                }
                Ok(Handled::Broadcast("set_emotion"))
            }
            _ => self.publish(message).await,
        }
    }

    async fn publish(&self, message: ClientMessage) -> Result<Handled, HubError> {
        let target = message
            .text_param("target")
            .unwrap_or(&self.robots.default_target)
            .to_string();
        let envelope = CommandEnvelope::new(
            target.clone(),
            CommandKind::parse(&message.command),
            CommandOrigin::Client,
        )
        .with_params(message.params);

        match render(&envelope)? {
            RobotPayload::Wire(wire) => {
                self.publisher.publish_command(&target, &wire).await?;
                Ok(Handled::Published { target, wire })
            }
            RobotPayload::Action(action) => {
                self.publisher.publish_action(&target, &action).await?;
                Ok(Handled::Action { target, action })
            }
        }
    }

    async fn emit(&self, event: ClientEvent) {
        if self.events.send(event).await.is_err() {
            error!("Client event queue closed");
        }
    }
}
