// Hub configuration
//
// Layering: built-in defaults, then an optional TOML/JSON file, then
// EXHIBIT__SECTION__KEY environment variables. Secrets keep their
// conventional names (SUPABASE_URL, SUPABASE_KEY, GEMINI_API_KEY[_1..6]).

use crate::error::{Error, Result};
use crate::types::RobotProfile;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Number of numbered Gemini key slots read from the environment
pub const GEMINI_KEY_SLOTS: usize = 6;

/// Client-facing listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub ws_port: u16,
    /// Upper bound on simultaneous clients, unlimited when unset
    pub max_connections: Option<usize>,
    /// Per-connection outbound queue depth
    pub outbound_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            ws_port: 8765,
            max_connections: None,
            outbound_capacity: 64,
        }
    }
}

/// MQTT broker link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub reconnect_backoff_secs: u64,
    /// Depth of the event loop -> dispatcher channel
    pub inbound_capacity: usize,
    pub config_topic: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "exhibit-hub".to_string(),
            keep_alive_secs: 30,
            reconnect_backoff_secs: 5,
            inbound_capacity: 256,
            config_topic: "robot/config".to_string(),
        }
    }
}

impl BusConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

/// Robot addressing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotsConfig {
    /// Target for commands that do not name one
    pub default_target: String,
    /// Robot that receives emotion cues
    pub emotion_target: String,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            default_target: "ev3_robot".to_string(),
            emotion_target: "mobile_guide".to_string(),
        }
    }
}

/// Backlog drain worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub resync_interval_secs: u64,
    /// Shedding kicks in above this many pending entries
    pub high_water: usize,
    /// Entries kept when shedding
    pub retain: usize,
    pub error_backoff_ms: u64,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 50,
            resync_interval_secs: 10,
            high_water: 5,
            retain: 3,
            error_backoff_ms: 1000,
        }
    }
}

impl DrainConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Client fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub telemetry_interval_ms: u64,
    /// Depth of the shared client event queue
    pub event_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            telemetry_interval_ms: 1000,
            event_capacity: 256,
        }
    }
}

impl BroadcastConfig {
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }
}

/// Persisted command backlog and robot profile source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacklogConfig {
    /// REST endpoint root; the in-memory store is used when unset
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub command_table: String,
    pub profile_table: String,
    pub request_timeout_secs: u64,
    /// Profile used when no REST backend is configured
    pub static_profile: Option<RobotProfile>,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_key: None,
            command_table: "command_queue".to_string(),
            profile_table: "robot_profiles".to_string(),
            request_timeout_secs: 5,
            static_profile: None,
        }
    }
}

impl BacklogConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// True when both URL and key are present
    pub fn has_remote(&self) -> bool {
        matches!((&self.supabase_url, &self.supabase_key), (Some(u), Some(k)) if !u.is_empty() && !k.is_empty())
    }
}

/// Voice assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub api_base: String,
    pub model: String,
    pub api_keys: Vec<String>,
    pub timeout_secs: u64,
    /// Speed percent used for voice-initiated movement
    pub move_speed: u32,
    /// Conversation turns kept as context
    pub history_turns: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_keys: Vec::new(),
            timeout_secs: 8,
            move_speed: 60,
            history_turns: 6,
        }
    }
}

impl VoiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete hub configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub network: NetworkConfig,
    pub bus: BusConfig,
    pub robots: RobotsConfig,
    pub drain: DrainConfig,
    pub broadcast: BroadcastConfig,
    pub backlog: BacklogConfig,
    pub voice: VoiceConfig,
    pub logging: LoggingConfig,
}

impl HubConfig {
    /// Load defaults, an optional file and `EXHIBIT__*` overrides, then pick up secrets
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Configuration(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("EXHIBIT")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: HubConfig = builder.build()?.try_deserialize()?;
        loaded.apply_secrets(|name| std::env::var(name).ok());
        debug!(
            "Configuration loaded from {} ({} Gemini keys, REST backlog: {})",
            path.map(|p| p.display().to_string()).unwrap_or_else(|| "defaults".to_string()),
            loaded.voice.api_keys.len(),
            loaded.backlog.has_remote()
        );
        Ok(loaded)
    }

    /// Fill secrets from a variable lookup. Values already present are kept.
    pub fn apply_secrets<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if self.backlog.supabase_url.is_none() {
            self.backlog.supabase_url = non_empty("SUPABASE_URL");
        }
        if self.backlog.supabase_key.is_none() {
            self.backlog.supabase_key = non_empty("SUPABASE_KEY");
        }

        let names = std::iter::once("GEMINI_API_KEY".to_string())
            .chain((1..=GEMINI_KEY_SLOTS).map(|i| format!("GEMINI_API_KEY_{}", i)));
        for name in names {
            if let Some(key) = non_empty(&name) {
                if !self.voice.api_keys.contains(&key) {
                    self.voice.api_keys.push(key);
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::Configuration(msg.to_string()));

        if self.network.ws_port == 0 {
            return invalid("network.ws_port cannot be 0");
        }
        if self.network.outbound_capacity == 0 {
            return invalid("network.outbound_capacity must be > 0");
        }
        if self.network.max_connections == Some(0) {
            return invalid("network.max_connections must be > 0 when set");
        }

        if self.bus.host.trim().is_empty() {
            return invalid("bus.host cannot be empty");
        }
        if self.bus.inbound_capacity == 0 {
            return invalid("bus.inbound_capacity must be > 0");
        }
        if self.bus.reconnect_backoff_secs == 0 {
            return invalid("bus.reconnect_backoff_secs must be > 0");
        }

        for (name, target) in [
            ("robots.default_target", &self.robots.default_target),
            ("robots.emotion_target", &self.robots.emotion_target),
        ] {
            if target.is_empty() || target.contains(['/', '+', '#']) {
                return Err(Error::Configuration(format!(
                    "{} must be a single topic level, got {:?}",
                    name, target
                )));
            }
        }

        if self.drain.retain == 0 {
            return invalid("drain.retain must be > 0");
        }
        if self.drain.retain > self.drain.high_water {
            return invalid("drain.retain cannot be greater than drain.high_water");
        }
        if self.drain.poll_interval_ms == 0 || self.drain.resync_interval_secs == 0 {
            return invalid("drain intervals must be > 0");
        }

        if self.broadcast.telemetry_interval_ms == 0 {
            return invalid("broadcast.telemetry_interval_ms must be > 0");
        }
        if self.broadcast.event_capacity == 0 {
            return invalid("broadcast.event_capacity must be > 0");
        }

        if self.voice.timeout_secs == 0 {
            return invalid("voice.timeout_secs must be > 0");
        }
        if self.voice.move_speed > 100 {
            return invalid("voice.move_speed is a percentage (0-100)");
        }

        Ok(())
    }
}

/// Parse a configuration document, JSON first, then TOML
impl FromStr for HubConfig {
    type Err = Error;

    fn from_str(content: &str) -> Result<Self> {
        if let Ok(config) = serde_json::from_str::<HubConfig>(content) {
            return Ok(config);
        }
        toml::from_str::<HubConfig>(content).map_err(|e| Error::Deserialization(e.to_string()))
    }
}
