//! Broker connection owner
//!
//! The rumqttc event loop runs in its own task. It keeps the link state
//! current, re-subscribes after every handshake and forwards inbound
//! publishes over a bounded channel. Nothing else touches the event loop.

use crate::error::BusError;
use crate::inbound::InboundMessage;
use crate::publisher::CommandPublisher;
use crate::topics::{self, STATUS_FILTER, TELEMETRY_FILTER};
use async_trait::async_trait;
use exhibit_core::BusConfig;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request queue
const REQUEST_CAPACITY: usize = 64;
/// Time allowed for the disconnect packet to go out on shutdown
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Shared view of the broker link
#[derive(Debug, Default)]
pub struct LinkState {
    connected: AtomicBool,
    epoch: AtomicU64,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Mark the link up and return the new epoch
    pub fn mark_connected(&self) -> u64 {
        self.connected.store(true, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark the link down; returns true if it was up
    pub fn mark_lost(&self) -> bool {
        self.connected.swap(false, Ordering::SeqCst)
    }
}

/// Publishing handle onto the broker
#[derive(Clone)]
pub struct BusGateway {
    client: AsyncClient,
    link: Arc<LinkState>,
    config_topic: String,
}

impl BusGateway {
    /// Create the client and spawn the event loop task
    pub fn start(
        config: &BusConfig,
        inbound: mpsc::Sender<InboundMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let link = Arc::new(LinkState::new());

        info!("Connecting to broker at {}:{}", config.host, config.port);
        let handle = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            link.clone(),
            inbound,
            config.reconnect_backoff(),
            shutdown,
        ));

        let gateway = Self {
            client,
            link,
            config_topic: config.config_topic.clone(),
        };
        (gateway, handle)
    }

    pub fn link(&self) -> Arc<LinkState> {
        self.link.clone()
    }

    async fn publish(&self, topic: String, payload: Vec<u8>, retain: bool) -> Result<(), BusError> {
        if !self.link.is_connected() {
            return Err(BusError::Disconnected);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(BusError::from)
    }
}

#[async_trait]
impl CommandPublisher for BusGateway {
    async fn publish_command(&self, target: &str, wire: &str) -> Result<(), BusError> {
        let topic = topics::command_topic(target)?;
        debug!("-> {} {}", topic, wire);
        self.publish(topic, wire.as_bytes().to_vec(), false).await
    }

    async fn publish_action(&self, target: &str, action: &JsonValue) -> Result<(), BusError> {
        let topic = topics::command_topic(target)?;
        let body = serde_json::to_vec(action)?;
        self.publish(topic, body, false).await
    }

    async fn publish_config(&self, payload: &JsonValue) -> Result<(), BusError> {
        let body = serde_json::to_vec(payload)?;
        self.publish(self.config_topic.clone(), body, true).await
    }

    async fn publish_emotion(&self, target: &str, cue: &str) -> Result<(), BusError> {
        let topic = topics::emotion_topic(target)?;
        let body = serde_json::to_vec(&json!({ "type": cue }))?;
        self.publish(topic, body, false).await
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn epoch(&self) -> u64 {
        self.link.epoch()
    }
}

fn subscribe_all(client: &AsyncClient) {
    for filter in [TELEMETRY_FILTER, STATUS_FILTER] {
        if let Err(e) = client.try_subscribe(filter, QoS::AtLeastOnce) {
            error!("Failed to subscribe to {}: {}", filter, e);
        }
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    link: Arc<LinkState>,
    inbound: mpsc::Sender<InboundMessage>,
    backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if stop_requested(&shutdown) {
            break;
        }

        let event = tokio::select! {
            event = eventloop.poll() => event,
            _ = shutdown.changed() => break,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                let epoch = link.mark_connected();
                info!("Broker link up (epoch {})", epoch);
                subscribe_all(&client);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if inbound.send(message).await.is_err() {
                    warn!("Inbound dispatcher is gone, dropping bus message");
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                if link.mark_lost() {
                    warn!("Broker closed the connection");
                }
            }
            Ok(_) => {}
            Err(e) => {
                if link.mark_lost() {
                    warn!("Broker link lost: {}", e);
                } else {
                    debug!("Broker unavailable: {}", e);
                }
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    if link.mark_lost() {
        if let Err(e) = client.try_disconnect() {
            debug!("Disconnect request failed: {}", e);
        }
        // Drive the loop until the disconnect is flushed or the grace period ends.
        let _ = tokio::time::timeout(DISCONNECT_GRACE, async {
            while eventloop.poll().await.is_ok() {}
        })
        .await;
    }
    info!("Bus event loop stopped");
}
