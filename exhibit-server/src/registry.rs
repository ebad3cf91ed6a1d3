// Connection registry
// Tracks connected clients and their outbound queues

use crate::error::HubError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Serialized frame queued for one client; shared by every recipient of a broadcast
pub type OutboundFrame = Arc<str>;

/// Registered client
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub remote: Option<SocketAddr>,
    pub sender: mpsc::Sender<OutboundFrame>,
    pub connected_at: DateTime<Utc>,
}

/// All live client connections
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    max_connections: Option<usize>,
}

impl ConnectionRegistry {
    /// Create new registry, unlimited when `max_connections` is `None`
    pub fn new(max_connections: Option<usize>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Register a connection
    pub fn register(
        &self,
        remote: Option<SocketAddr>,
        sender: mpsc::Sender<OutboundFrame>,
    ) -> Result<ConnectionId, HubError> {
        let mut connections = self.connections.write();
        if let Some(limit) = self.max_connections {
            if connections.len() >= limit {
                return Err(HubError::Capacity(limit));
            }
        }

        let id = Uuid::new_v4();
        connections.insert(
            id,
            ConnectionHandle {
                id,
                remote,
                sender,
                connected_at: Utc::now(),
            },
        );
        info!("Client registered: {} ({:?})", id, remote);
        Ok(id)
    }

    /// Unregister a connection; absent ids are ignored
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.write().remove(id).is_some();
        if removed {
            info!("Client unregistered: {}", id);
        }
        removed
    }

    /// Point-in-time copy of every connection
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.read().values().cloned().collect()
    }

    /// Remove a batch of connections, returns how many were present
    pub fn remove_many(&self, ids: &[ConnectionId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut connections = self.connections.write();
        let removed = ids.iter().filter(|id| connections.remove(id).is_some()).count();
        debug!("Removed {} dead connections", removed);
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}
