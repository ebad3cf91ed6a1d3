//! Inbound bus traffic
//!
//! A single dispatcher task drains the event loop channel in order:
//! telemetry is merged into the cache, station status becomes a client event.

use crate::error::BusError;
use crate::topics::{self, InboundTopic};
use bytes::Bytes;
use exhibit_core::{ClientEvent, StationEvent, TelemetryCache, TelemetryUpdate};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Raw publish handed over by the event loop
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// What a message turned into
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Telemetry,
    Station(StationEvent),
}

#[derive(Deserialize)]
struct StatusPayload {
    status: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    station_id: Option<String>,
}

pub struct InboundDispatcher {
    telemetry: Arc<TelemetryCache>,
    events: mpsc::Sender<ClientEvent>,
}

impl InboundDispatcher {
    pub fn new(telemetry: Arc<TelemetryCache>, events: mpsc::Sender<ClientEvent>) -> Self {
        Self { telemetry, events }
    }

    /// Decode and route a single message
    pub async fn dispatch(&self, message: &InboundMessage) -> Result<Dispatched, BusError> {
        match topics::parse_inbound(&message.topic)? {
            InboundTopic::Telemetry { robot_id } => {
                let update: TelemetryUpdate = serde_json::from_slice(&message.payload)?;
                if update.is_empty() {
                    return Err(BusError::Payload(format!(
                        "Telemetry from {} carries no known fields",
                        robot_id
                    )));
                }
                self.telemetry.merge(&update);
                Ok(Dispatched::Telemetry)
            }
            InboundTopic::Status { robot_id } => {
                let payload: StatusPayload = serde_json::from_slice(&message.payload)?;
                let event = StationEvent {
                    station_id: payload.station_id.unwrap_or(robot_id),
                    status: payload.status,
                    action: payload.action,
                };
                debug!("Station {} is {}", event.station_id, event.status);
                self.events
                    .send(ClientEvent::StationStatus(event.clone()))
                    .await
                    .map_err(|_| BusError::Client("Client event queue closed".to_string()))?;
                Ok(Dispatched::Station(event))
            }
        }
    }

    /// Drain `inbound` until it closes or shutdown is signalled
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let message = tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                _ = shutdown.changed() => break,
            };

            if let Err(e) = self.dispatch(&message).await {
                warn!("Dropping bus message on {}: {}", message.topic, e);
            }
        }
        info!("Inbound dispatcher stopped");
    }
}
