use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;

/// Spoken language of a voice interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "vi-VN")]
    Vietnamese,
    #[serde(rename = "en-US")]
    English,
}

impl Language {
    /// Resolve a BCP-47 style tag. Anything that is not Vietnamese is English.
    pub fn from_tag(tag: &str) -> Self {
        if tag.trim().to_lowercase().starts_with("vi") {
            Language::Vietnamese
        } else {
            Language::English
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Language::Vietnamese => "vi-VN",
            Language::English => "en-US",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Drive direction understood by the `move` wire command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl MoveDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveDirection::Forward => "forward",
            MoveDirection::Backward => "backward",
            MoveDirection::Left => "left",
            MoveDirection::Right => "right",
            MoveDirection::Stop => "stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "forward" => Some(MoveDirection::Forward),
            "backward" | "back" => Some(MoveDirection::Backward),
            "left" => Some(MoveDirection::Left),
            "right" => Some(MoveDirection::Right),
            "stop" => Some(MoveDirection::Stop),
            _ => None,
        }
    }
}

/// Command kind carried by a [`CommandEnvelope`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandKind {
    Move,
    AuxMove,
    Stop,
    Emergency,
    /// Unrecognized kind, passed through to the robot verbatim
    Custom(String),
}

impl CommandKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "move" => CommandKind::Move,
            "aux_move" => CommandKind::AuxMove,
            "stop" => CommandKind::Stop,
            "emergency" => CommandKind::Emergency,
            other => CommandKind::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommandKind::Move => "move",
            CommandKind::AuxMove => "aux_move",
            CommandKind::Stop => "stop",
            CommandKind::Emergency => "emergency",
            CommandKind::Custom(name) => name,
        }
    }
}

impl From<String> for CommandKind {
    fn from(name: String) -> Self {
        CommandKind::parse(&name)
    }
}

impl From<CommandKind> for String {
    fn from(kind: CommandKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the hub produced a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOrigin {
    Client,
    Backlog,
    Voice,
}

/// Structured robot command, translated to the wire grammar right before publishing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub target: String,
    pub kind: CommandKind,
    #[serde(default)]
    pub params: Map<String, JsonValue>,
    pub origin: CommandOrigin,
}

impl CommandEnvelope {
    pub fn new(target: impl Into<String>, kind: CommandKind, origin: CommandOrigin) -> Self {
        Self {
            target: target.into(),
            kind,
            params: Map::new(),
            origin,
        }
    }

    pub fn with_params(mut self, params: Map<String, JsonValue>) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, name: &str, value: impl Into<JsonValue>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Plain `stop` for the given target
    pub fn stop(target: impl Into<String>, origin: CommandOrigin) -> Self {
        Self::new(target, CommandKind::Stop, origin)
    }

    /// `move` with an explicit direction and speed percent
    pub fn movement(
        target: impl Into<String>,
        direction: MoveDirection,
        speed: u32,
        origin: CommandOrigin,
    ) -> Self {
        Self::new(target, CommandKind::Move, origin)
            .with_param("direction", direction.as_str())
            .with_param("speed", speed)
    }

    pub fn from_backlog(entry: &BacklogEntry) -> Self {
        Self {
            target: entry.target.clone(),
            kind: CommandKind::parse(&entry.command),
            params: entry.params.clone(),
            origin: CommandOrigin::Backlog,
        }
    }
}

/// Identifier of a persisted backlog entry. Stores hand out either integers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BacklogId(pub String);

impl BacklogId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BacklogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BacklogId {
    fn from(id: &str) -> Self {
        BacklogId(id.to_string())
    }
}

impl<'de> Deserialize<'de> for BacklogId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => BacklogId(s),
            RawId::Number(n) => BacklogId(n.to_string()),
        })
    }
}

/// Lifecycle of a backlog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacklogStatus {
    Pending,
    Processing,
    Completed,
    Skipped,
}

impl BacklogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BacklogStatus::Pending => "pending",
            BacklogStatus::Processing => "processing",
            BacklogStatus::Completed => "completed",
            BacklogStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BacklogStatus::Completed | BacklogStatus::Skipped)
    }

    /// Transitions only move forward; terminal states are never revisited.
    pub fn can_transition_to(&self, next: BacklogStatus) -> bool {
        match (self, next) {
            (BacklogStatus::Pending, BacklogStatus::Processing)
            | (BacklogStatus::Pending, BacklogStatus::Completed)
            | (BacklogStatus::Pending, BacklogStatus::Skipped)
            | (BacklogStatus::Processing, BacklogStatus::Completed)
            | (BacklogStatus::Processing, BacklogStatus::Skipped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BacklogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted, not yet delivered command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub id: BacklogId,
    pub target: String,
    pub command: String,
    #[serde(default, deserialize_with = "null_as_empty_map")]
    pub params: Map<String, JsonValue>,
    pub status: BacklogStatus,
    pub created_at: DateTime<Utc>,
}

fn null_as_empty_map<'de, D>(deserializer: D) -> Result<Map<String, JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, JsonValue>>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_profile_name() -> String {
    "Robot".to_string()
}

/// Hardware profile pushed to robots on the retained configuration topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotProfile {
    #[serde(default = "default_profile_name")]
    pub name: String,
    /// Port role (`left`, `right`, `aux1`, ...) to output port (`outB`, ...)
    #[serde(default)]
    pub motor_ports: BTreeMap<String, String>,
    #[serde(default)]
    pub sensor_config: Map<String, JsonValue>,
    /// Speed role (`forward`, `turn`, ...) to percent
    #[serde(default)]
    pub speed_profile: BTreeMap<String, u32>,
    #[serde(default)]
    pub is_active: bool,
}

impl Default for RobotProfile {
    /// Stock two-motor layout with both auxiliary ports wired
    fn default() -> Self {
        let motor_ports = [("left", "outB"), ("right", "outC"), ("aux1", "outA"), ("aux2", "outD")]
            .into_iter()
            .map(|(role, port)| (role.to_string(), port.to_string()))
            .collect();
        let speed_profile = [("forward", 100), ("backward", 100), ("turn", 50)]
            .into_iter()
            .map(|(role, speed)| (role.to_string(), speed))
            .collect();

        Self {
            name: default_profile_name(),
            motor_ports,
            sensor_config: Map::new(),
            speed_profile,
            is_active: true,
        }
    }
}

impl RobotProfile {
    /// Payload published on the configuration topic
    pub fn config_payload(&self) -> JsonValue {
        json!({
            "name": self.name,
            "motor_ports": self.motor_ports,
            "sensor_config": self.sensor_config,
            "speeds": self.speed_profile,
        })
    }
}

/// Status report from a station, consumed once by the broadcaster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationEvent {
    pub station_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_tag() {
        assert_eq!(Language::from_tag("vi-VN"), Language::Vietnamese);
        assert_eq!(Language::from_tag("VI"), Language::Vietnamese);
        assert_eq!(Language::from_tag("en-US"), Language::English);
        assert_eq!(Language::from_tag("fr-FR"), Language::English);
        assert_eq!(Language::default(), Language::Vietnamese);
    }

    #[test]
    fn test_command_kind_round_trip_names() {
        assert_eq!(CommandKind::parse("aux_move"), CommandKind::AuxMove);
        assert_eq!(CommandKind::parse("beep"), CommandKind::Custom("beep".to_string()));
        assert_eq!(CommandKind::Custom("beep".to_string()).as_str(), "beep");
    }

    #[test]
    fn test_backlog_status_transitions() {
        assert!(BacklogStatus::Pending.can_transition_to(BacklogStatus::Completed));
        assert!(BacklogStatus::Pending.can_transition_to(BacklogStatus::Skipped));
        assert!(!BacklogStatus::Completed.can_transition_to(BacklogStatus::Pending));
        assert!(!BacklogStatus::Skipped.can_transition_to(BacklogStatus::Completed));
        assert!(!BacklogStatus::Pending.can_transition_to(BacklogStatus::Pending));
    }

    #[test]
    fn test_backlog_entry_accepts_numeric_id_and_null_params() {
        let entry: BacklogEntry = serde_json::from_value(json!({
            "id": 42,
            "target": "ev3_robot",
            "command": "stop",
            "params": null,
            "status": "pending",
            "created_at": "2026-03-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(entry.id, BacklogId("42".to_string()));
        assert!(entry.params.is_empty());
        assert_eq!(entry.status, BacklogStatus::Pending);
    }

    #[test]
    fn test_profile_config_payload_uses_speeds_key() {
        let profile: RobotProfile = serde_json::from_value(json!({
            "motor_ports": {"left": "outB", "right": "outC"},
            "speed_profile": {"forward": 100, "turn": 50},
            "is_active": true
        }))
        .unwrap();

        let payload = profile.config_payload();
        assert_eq!(payload["name"], "Robot");
        assert_eq!(payload["motor_ports"]["left"], "outB");
        assert_eq!(payload["speeds"]["turn"], 50);
        assert!(payload.get("speed_profile").is_none());
    }
}
