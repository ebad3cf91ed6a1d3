//! Outbound publishing seam
//!
//! Everything that talks to robots goes through [`CommandPublisher`], so the
//! drain worker, the voice router and the client dispatcher never hold a
//! broker client directly.

use crate::error::BusError;
use crate::topics;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Publish a wire-grammar command to `robot/<target>/command`
    async fn publish_command(&self, target: &str, wire: &str) -> Result<(), BusError>;

    /// Publish a JSON action object to `robot/<target>/command`
    ///
    /// Station firmware parses its command topic as JSON and reads `action`.
    async fn publish_action(&self, target: &str, action: &JsonValue) -> Result<(), BusError>;

    /// Publish the retained robot configuration
    async fn publish_config(&self, payload: &JsonValue) -> Result<(), BusError>;

    /// Publish `{"type": cue}` to `robot/<target>/emotion`
    async fn publish_emotion(&self, target: &str, cue: &str) -> Result<(), BusError>;

    fn is_connected(&self) -> bool;

    /// Incremented on every successful broker handshake
    fn epoch(&self) -> u64;
}

/// Message captured by [`RecordingPublisher`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

/// In-process publisher that keeps every message instead of sending it
///
/// Can be switched offline, or told to start failing after a number of
/// successful publishes.
pub struct RecordingPublisher {
    config_topic: String,
    messages: Mutex<Vec<PublishedMessage>>,
    connected: AtomicBool,
    epoch: AtomicU64,
    fail_after: Mutex<Option<usize>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            config_topic: "robot/config".to_string(),
            messages: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            epoch: AtomicU64::new(1),
            fail_after: Mutex::new(None),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Simulate a reconnect
    pub fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Let `successes` more publishes through, then fail every one after
    pub fn fail_after(&self, successes: usize) {
        *self.fail_after.lock() = Some(successes);
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().clone()
    }

    /// Payloads sent to `robot/<target>/command`, in order
    pub fn commands_for(&self, target: &str) -> Vec<String> {
        let topic = format!("robot/{}/command", target);
        self.messages
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    fn record(&self, topic: String, payload: String, retained: bool) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }
        {
            let mut budget = self.fail_after.lock();
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(BusError::Disconnected);
                }
                *remaining -= 1;
            }
        }
        self.messages.lock().push(PublishedMessage {
            topic,
            payload,
            retained,
        });
        Ok(())
    }
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandPublisher for RecordingPublisher {
    async fn publish_command(&self, target: &str, wire: &str) -> Result<(), BusError> {
        let topic = topics::command_topic(target)?;
        self.record(topic, wire.to_string(), false)
    }

    async fn publish_action(&self, target: &str, action: &JsonValue) -> Result<(), BusError> {
        let topic = topics::command_topic(target)?;
        self.record(topic, serde_json::to_string(action)?, false)
    }

    async fn publish_config(&self, payload: &JsonValue) -> Result<(), BusError> {
        let topic = self.config_topic.clone();
        self.record(topic, serde_json::to_string(payload)?, true)
    }

    async fn publish_emotion(&self, target: &str, cue: &str) -> Result<(), BusError> {
        let topic = topics::emotion_topic(target)?;
        self.record(topic, json!({ "type": cue }).to_string(), false)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}
