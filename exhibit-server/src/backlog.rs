//! Persisted command backlog and robot profile sources
//!
//! `RestBacklog` talks to a PostgREST (Supabase) endpoint. `MemoryBacklog`
//! keeps everything in-process and is used when no REST backend is configured.

use crate::error::BacklogError;
use async_trait::async_trait;
use chrono::Utc;
use exhibit_core::{BacklogConfig, BacklogEntry, BacklogId, BacklogStatus, RobotProfile};
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

pub type Result<T> = std::result::Result<T, BacklogError>;

#[async_trait]
pub trait BacklogStore: Send + Sync {
    /// Pending entries for `target`, oldest first
    async fn fetch_pending(&self, target: &str) -> Result<Vec<BacklogEntry>>;

    /// Move an entry forward in its lifecycle
    async fn mark(&self, id: &BacklogId, status: BacklogStatus) -> Result<()>;
}

#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// The active robot profile, if any
    async fn active_profile(&self) -> Result<Option<RobotProfile>>;
}

/// In-process backlog
#[derive(Default)]
pub struct MemoryBacklog {
    entries: RwLock<Vec<BacklogEntry>>,
    next_id: AtomicU64,
}

impl MemoryBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending entry and return its id
    pub fn enqueue(&self, target: &str, command: &str, params: Map<String, JsonValue>) -> BacklogId {
        let id = BacklogId((self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string());
        self.insert(BacklogEntry {
            id: id.clone(),
            target: target.to_string(),
            command: command.to_string(),
            params,
            status: BacklogStatus::Pending,
            created_at: Utc::now(),
        });
        id
    }

    /// Insert a fully formed entry, keeping creation order
    pub fn insert(&self, entry: BacklogEntry) {
        let mut entries = self.entries.write();
        let position = entries.partition_point(|e| e.created_at <= entry.created_at);
        entries.insert(position, entry);
    }

    pub fn status_of(&self, id: &BacklogId) -> Option<BacklogStatus> {
        self.entries.read().iter().find(|e| &e.id == id).map(|e| e.status)
    }

    /// Every entry in creation order
    pub fn entries(&self) -> Vec<BacklogEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl BacklogStore for MemoryBacklog {
    async fn fetch_pending(&self, target: &str) -> Result<Vec<BacklogEntry>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.target == target && e.status == BacklogStatus::Pending)
            .cloned()
            .collect())
    }

    async fn mark(&self, id: &BacklogId, status: BacklogStatus) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| BacklogError::NotFound(id.clone()))?;

        if !entry.status.can_transition_to(status) {
            return Err(BacklogError::InvalidTransition {
                id: id.clone(),
                to: status,
            });
        }
        entry.status = status;
        Ok(())
    }
}

/// Profile taken from configuration
pub struct StaticProfile {
    profile: Option<RobotProfile>,
}

impl StaticProfile {
    pub fn new(profile: Option<RobotProfile>) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl ProfileSource for StaticProfile {
    async fn active_profile(&self) -> Result<Option<RobotProfile>> {
        Ok(self.profile.clone())
    }
}

/// PostgREST backlog and profile source
pub struct RestBacklog {
    client: Client,
    base_url: String,
    api_key: String,
    command_table: String,
    profile_table: String,
}

impl RestBacklog {
    /// Build from configuration; `None` when URL or key is missing
    pub fn from_config(config: &BacklogConfig) -> Option<Self> {
        if !config.has_remote() {
            return None;
        }
        let base_url = config.supabase_url.as_deref()?.trim_end_matches('/').to_string();
        let api_key = config.supabase_key.clone()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|_| Client::new());

        Some(Self {
            client,
            base_url,
            api_key,
            command_table: config.command_table.clone(),
            profile_table: config.profile_table.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, urlencoding::encode(table))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn read_rows<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<Vec<T>> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BacklogError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Decode rows one at a time so a single bad row does not stall the backlog
fn decode_entries(rows: Vec<JsonValue>) -> Vec<BacklogEntry> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<BacklogEntry>(row.clone()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Ignoring malformed backlog row {}: {}", row.get("id").unwrap_or(&row), e);
                None
            }
        })
        .collect()
}

/// PostgREST filter allowing only forward transitions into `to`
fn transition_guard(to: BacklogStatus) -> &'static str {
    match to {
        BacklogStatus::Processing => "eq.pending",
        _ => "in.(pending,processing)",
    }
}

#[async_trait]
impl BacklogStore for RestBacklog {
    async fn fetch_pending(&self, target: &str) -> Result<Vec<BacklogEntry>> {
        let target_filter = format!("eq.{}", target);
        let request = self.client.get(self.table_url(&self.command_table)).query(&[
            ("select", "*"),
            ("status", "eq.pending"),
            ("target", target_filter.as_str()),
            ("order", "created_at.asc"),
        ]);
        let response = self.authorized(request).send().await?;
        let rows: Vec<JsonValue> = Self::read_rows(response).await?;
        Ok(decode_entries(rows))
    }

    async fn mark(&self, id: &BacklogId, status: BacklogStatus) -> Result<()> {
        if status == BacklogStatus::Pending {
            return Err(BacklogError::InvalidTransition {
                id: id.clone(),
                to: status,
            });
        }

        let id_filter = format!("eq.{}", id);
        let request = self
            .client
            .patch(self.table_url(&self.command_table))
            .query(&[("id", id_filter.as_str()), ("status", transition_guard(status))])
            .header("Prefer", "return=representation")
            .json(&json!({ "status": status.as_str() }));
        let response = self.authorized(request).send().await?;

        let updated: Vec<JsonValue> = Self::read_rows(response).await?;
        if updated.is_empty() {
            // Either the id is unknown or the entry already left the pending states.
            return Err(BacklogError::InvalidTransition {
                id: id.clone(),
                to: status,
            });
        }
        debug!("Backlog entry {} -> {}", id, status);
        Ok(())
    }
}

#[async_trait]
impl ProfileSource for RestBacklog {
    async fn active_profile(&self) -> Result<Option<RobotProfile>> {
        let request = self.client.get(self.table_url(&self.profile_table)).query(&[
            ("select", "*"),
            ("is_active", "eq.true"),
            ("limit", "1"),
        ]);
        let response = self.authorized(request).send().await?;
        let rows: Vec<RobotProfile> = Self::read_rows(response).await?;
        Ok(rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backlog_fetches_pending_for_target_in_order() {
        let backlog = MemoryBacklog::new();
        let first = backlog.enqueue("ev3_robot", "stop", Map::new());
        backlog.enqueue("other_robot", "stop", Map::new());
        let third = backlog.enqueue("ev3_robot", "emergency", Map::new());
        backlog.mark(&first, BacklogStatus::Completed).await.unwrap();

        let pending = backlog.fetch_pending("ev3_robot").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, third);
    }

    #[tokio::test]
    async fn test_terminal_states_are_never_revisited() {
        let backlog = MemoryBacklog::new();
        let id = backlog.enqueue("ev3_robot", "stop", Map::new());

        backlog.mark(&id, BacklogStatus::Skipped).await.unwrap();
        assert!(matches!(
            backlog.mark(&id, BacklogStatus::Completed).await,
            Err(BacklogError::InvalidTransition { .. })
        ));
        assert!(matches!(
            backlog.mark(&id, BacklogStatus::Pending).await,
            Err(BacklogError::InvalidTransition { .. })
        ));
        assert_eq!(backlog.status_of(&id), Some(BacklogStatus::Skipped));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let backlog = MemoryBacklog::new();
        assert!(matches!(
            backlog.mark(&BacklogId::from("404"), BacklogStatus::Completed).await,
            Err(BacklogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_static_profile() {
        let source = StaticProfile::new(Some(RobotProfile::default()));
        let profile = source.active_profile().await.unwrap().unwrap();
        assert_eq!(profile.motor_ports["left"], "outB");
        assert!(StaticProfile::new(None).active_profile().await.unwrap().is_none());
    }

    #[test]
    fn test_rest_backlog_requires_url_and_key() {
        let mut config = BacklogConfig::default();
        assert!(RestBacklog::from_config(&config).is_none());

        config.supabase_url = Some("https://db.example/".to_string());
        config.supabase_key = Some("anon".to_string());
        let rest = RestBacklog::from_config(&config).unwrap();
        assert_eq!(rest.table_url("command_queue"), "https://db.example/rest/v1/command_queue");
    }

    #[test]
    fn test_malformed_rows_are_dropped_individually() {
        let rows = vec![
            json!({"id": 1, "target": "ev3_robot", "command": "stop", "params": {},
                   "status": "pending", "created_at": "2026-03-01T10:00:00Z"}),
            json!({"id": 2, "target": "ev3_robot", "command": "stop",
                   "status": "pending", "created_at": "not a timestamp"}),
            json!({"id": 3, "target": "ev3_robot", "command": "move",
                   "params": {"direction": "left"},
                   "status": "pending", "created_at": "2026-03-01T10:00:02Z"}),
        ];

        let entries = decode_entries(rows);
        let ids: Vec<_> = entries.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec![BacklogId::from("1"), BacklogId::from("3")]);
        assert_eq!(entries[1].command, "move");
    }

    #[test]
    fn test_transition_guard_only_allows_forward_moves() {
        assert_eq!(transition_guard(BacklogStatus::Processing), "eq.pending");
        assert_eq!(transition_guard(BacklogStatus::Completed), "in.(pending,processing)");
        assert_eq!(transition_guard(BacklogStatus::Skipped), "in.(pending,processing)");
    }
}
