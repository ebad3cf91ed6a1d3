//! Fan-out of telemetry and events to every connected client
//!
//! Delivery never blocks: each client has a bounded queue and a full or
//! closed queue counts as a dead client. Dead clients are removed after the
//! iteration, so one slow reader cannot hold up the rest.

use crate::registry::{ConnectionRegistry, OutboundFrame};
use exhibit_core::{ClientEvent, TelemetryCache};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Result of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub removed: usize,
}

#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    telemetry: Arc<TelemetryCache>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, telemetry: Arc<TelemetryCache>) -> Self {
        Self {
            registry,
            telemetry,
        }
    }

    /// Send the current telemetry snapshot to every client
    pub fn broadcast_telemetry(&self) -> BroadcastReport {
        self.broadcast_event(&ClientEvent::Telemetry(self.telemetry.read()))
    }

    pub fn broadcast_event(&self, event: &ClientEvent) -> BroadcastReport {
        match event.to_json() {
            Ok(json) => self.broadcast_frame(Arc::from(json)),
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.kind(), e);
                BroadcastReport::default()
            }
        }
    }

    /// Deliver a pre-serialized frame
    pub fn broadcast_frame(&self, frame: OutboundFrame) -> BroadcastReport {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for connection in self.registry.snapshot() {
            match connection.sender.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Client {} is not keeping up, dropping it", connection.id);
                    dead.push(connection.id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Client {} queue closed", connection.id);
                    dead.push(connection.id);
                }
            }
        }

        let removed = self.registry.remove_many(&dead);
        BroadcastReport { delivered, removed }
    }

    /// Broadcast telemetry on a fixed tick until shutdown
    pub async fn run_telemetry_loop(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if self.registry.connection_count() > 0 {
                self.broadcast_telemetry();
            }
        }
        info!("Telemetry broadcaster stopped");
    }

    /// Forward queued events to clients in order until shutdown
    pub async fn run_event_pump(
        self,
        mut events: mpsc::Receiver<ClientEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = shutdown.changed() => break,
            };
            let report = self.broadcast_event(&event);
            debug!(
                "{} event delivered to {} clients ({} removed)",
                event.kind(),
                report.delivered,
                report.removed
            );
        }
        info!("Event pump stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exhibit_core::TelemetryUpdate;

    #[tokio::test]
    async fn test_failing_clients_are_removed() {
        let registry = Arc::new(ConnectionRegistry::default());
        let broadcaster = Broadcaster::new(registry.clone(), Arc::new(TelemetryCache::new()));

        let (live_tx, mut live_rx) = mpsc::channel(4);
        registry.register(None, live_tx).unwrap();

        let (closed_tx, closed_rx) = mpsc::channel(4);
        registry.register(None, closed_tx).unwrap();
        drop(closed_rx);

        let (full_tx, _full_rx) = mpsc::channel(1);
        full_tx.try_send(Arc::from("backlog")).unwrap();
        registry.register(None, full_tx).unwrap();

        let report = broadcaster.broadcast_telemetry();
        assert_eq!(report, BroadcastReport { delivered: 1, removed: 2 });
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(&*live_rx.recv().await.unwrap(), r#"{"type":"telemetry"}"#);
    }

    #[tokio::test]
    async fn test_telemetry_frame_reflects_cache() {
        let registry = Arc::new(ConnectionRegistry::default());
        let cache = Arc::new(TelemetryCache::new());
        cache.merge(&TelemetryUpdate {
            battery: Some(98.0),
            ..Default::default()
        });
        let broadcaster = Broadcaster::new(registry.clone(), cache);

        let (tx, mut rx) = mpsc::channel(4);
        registry.register(None, tx).unwrap();
        broadcaster.broadcast_telemetry();

        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "telemetry");
        assert_eq!(value["battery"], 98);
    }

    #[tokio::test]
    async fn test_no_clients_is_a_no_op() {
        let broadcaster = Broadcaster::new(
            Arc::new(ConnectionRegistry::default()),
            Arc::new(TelemetryCache::new()),
        );
        assert_eq!(broadcaster.broadcast_telemetry(), BroadcastReport::default());
    }
}
