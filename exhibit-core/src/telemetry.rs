//! Most recent known robot state
//!
//! The bus inbound dispatcher is the only writer; the broadcaster and the
//! health endpoint read copies.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Position on the exhibit map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Point-in-time copy of the telemetry cache. Fields stay `None` until first reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial telemetry as published by a robot
///
/// Numbers are accepted in any JSON form and normalized on merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryUpdate {
    #[serde(default)]
    pub battery: Option<f64>,
    #[serde(default)]
    pub pos: Option<Position>,
    /// Milliseconds; firmware may report fractions
    #[serde(default)]
    pub latency: Option<f64>,
}

impl TelemetryUpdate {
    pub fn is_empty(&self) -> bool {
        self.battery.is_none() && self.pos.is_none() && self.latency.is_none()
    }
}

/// Field-merging telemetry store
#[derive(Debug, Default)]
pub struct TelemetryCache {
    snapshot: RwLock<TelemetrySnapshot>,
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite only the fields present in `update` and stamp the snapshot
    pub fn merge(&self, update: &TelemetryUpdate) {
        self.merge_at(update, Utc::now());
    }

    pub fn merge_at(&self, update: &TelemetryUpdate, at: DateTime<Utc>) {
        let mut snapshot = self.snapshot.write();
        if let Some(battery) = update.battery {
            if battery.is_finite() {
                snapshot.battery = Some(battery.round().clamp(0.0, 100.0) as u8);
            }
        }
        if let Some(pos) = update.pos {
            snapshot.pos = Some(pos);
        }
        if let Some(latency) = update.latency {
            if latency.is_finite() {
                snapshot.latency = Some(latency.round().max(0.0) as u64);
            }
        }
        snapshot.updated_at = Some(at);
    }

    pub fn read(&self) -> TelemetrySnapshot {
        self.snapshot.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn battery(level: f64) -> TelemetryUpdate {
        TelemetryUpdate {
            battery: Some(level),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_is_idempotent_per_field() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let once = TelemetryCache::new();
        once.merge_at(&battery(80.0), at);

        let twice = TelemetryCache::new();
        twice.merge_at(&battery(80.0), at);
        twice.merge_at(&battery(80.0), at);

        assert_eq!(once.read(), twice.read());
        assert_eq!(twice.read().battery, Some(80));
    }

    #[test]
    fn test_partial_merge_preserves_other_fields() {
        let cache = TelemetryCache::new();
        cache.merge(&battery(80.0));
        cache.merge(&TelemetryUpdate {
            pos: Some(Position { x: 1.0, y: 1.0 }),
            ..Default::default()
        });

        let snapshot = cache.read();
        assert_eq!(snapshot.battery, Some(80));
        assert_eq!(snapshot.pos, Some(Position { x: 1.0, y: 1.0 }));
        assert!(snapshot.latency.is_none());
        assert!(snapshot.updated_at.is_some());
    }

    #[test]
    fn test_battery_is_clamped() {
        let cache = TelemetryCache::new();
        cache.merge(&battery(140.0));
        assert_eq!(cache.read().battery, Some(100));
        cache.merge(&battery(-3.0));
        assert_eq!(cache.read().battery, Some(0));
    }

    #[test]
    fn test_fractional_latency_merges_with_other_fields() {
        let update: TelemetryUpdate =
            serde_json::from_str(r#"{"battery": 50, "latency": 15.5}"#).unwrap();
        let cache = TelemetryCache::new();
        cache.merge(&update);

        let snapshot = cache.read();
        assert_eq!(snapshot.battery, Some(50));
        assert_eq!(snapshot.latency, Some(16));

        cache.merge(&TelemetryUpdate {
            latency: Some(-3.0),
            ..Default::default()
        });
        assert_eq!(cache.read().latency, Some(0));
    }

    #[test]
    fn test_last_write_wins_for_same_field() {
        let cache = TelemetryCache::new();
        cache.merge(&TelemetryUpdate {
            latency: Some(15.0),
            ..Default::default()
        });
        cache.merge(&TelemetryUpdate {
            latency: Some(22.0),
            ..Default::default()
        });
        assert_eq!(cache.read().latency, Some(22));
    }

    #[test]
    fn test_empty_snapshot_serializes_without_fields() {
        let json = serde_json::to_value(TelemetrySnapshot::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
