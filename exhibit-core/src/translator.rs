//! Structured command -> robot wire grammar
//!
//! Grammar understood by the robot firmware:
//! - `move:<direction>:<speed>`
//! - `aux_move:<port>:<value>:<unit>`
//! - `stop`, `emergency`
//! - any other kind is sent as its bare name
//!
//! Exhibit stations parse their command topic as JSON instead, so
//! `station_action` renders as `{"action": <name>, ...params}`.
//!
//! Defaults are applied here and nowhere else.

use crate::error::TranslationError;
use crate::types::{CommandEnvelope, CommandKind};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

const DEFAULT_DIRECTION: &str = "stop";
const DEFAULT_SPEED: i64 = 100;
const DEFAULT_AUX_PORT: &str = "aux1";
const DEFAULT_AUX_UNIT: &str = "rotations";

/// Command kind addressed to station firmware
pub const STATION_ACTION: &str = "station_action";

/// Payload for `robot/<target>/command`
#[derive(Debug, Clone, PartialEq)]
pub enum RobotPayload {
    /// Wire grammar string for the mobile robot
    Wire(String),
    /// JSON action object for a station
    Action(JsonValue),
}

impl fmt::Display for RobotPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RobotPayload::Wire(wire) => f.write_str(wire),
            RobotPayload::Action(action) => write!(f, "{}", action),
        }
    }
}

/// Render `envelope` for its target's command topic
pub fn render(envelope: &CommandEnvelope) -> Result<RobotPayload, TranslationError> {
    match &envelope.kind {
        CommandKind::Custom(name) if name == STATION_ACTION => {
            station_action(&envelope.params).map(RobotPayload::Action)
        }
        _ => translate(envelope).map(RobotPayload::Wire),
    }
}

/// `{"action": ...}` plus the remaining parameters; `target` is addressing only
fn station_action(params: &Map<String, JsonValue>) -> Result<JsonValue, TranslationError> {
    let action = match present(params, "action") {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        other => {
            return Err(TranslationError::MalformedParameter {
                name: "action",
                expected: "non-empty string",
                actual: other.map(describe).unwrap_or_else(|| "nothing".to_string()),
            })
        }
    };

    let mut object = Map::new();
    object.insert("action".to_string(), JsonValue::String(action));
    for (key, value) in params {
        if key != "action" && key != "target" && !value.is_null() {
            object.insert(key.clone(), value.clone());
        }
    }
    Ok(JsonValue::Object(object))
}

/// Render `envelope` in the wire grammar
pub fn translate(envelope: &CommandEnvelope) -> Result<String, TranslationError> {
    let params = &envelope.params;
    match &envelope.kind {
        CommandKind::Move => {
            let direction = text_param(params, "direction", DEFAULT_DIRECTION)?;
            let speed = integer_param(params, "speed", DEFAULT_SPEED)?;
            Ok(format!("move:{}:{}", direction, speed))
        }
        CommandKind::AuxMove => {
            let port = text_param(params, "port", DEFAULT_AUX_PORT)?;
            let value = number_param(params, "value")?;
            let unit = text_param(params, "unit", DEFAULT_AUX_UNIT)?;
            Ok(format!("aux_move:{}:{}:{}", port, value, unit))
        }
        CommandKind::Stop => Ok("stop".to_string()),
        CommandKind::Emergency => Ok("emergency".to_string()),
        CommandKind::Custom(name) => {
            if name.trim().is_empty() {
                return Err(TranslationError::EmptyCommand);
            }
            Ok(name.clone())
        }
    }
}

fn present<'a>(params: &'a Map<String, JsonValue>, name: &str) -> Option<&'a JsonValue> {
    params.get(name).filter(|v| !v.is_null())
}

fn describe(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(b) => format!("boolean {}", b),
        JsonValue::Number(n) => format!("number {}", n),
        JsonValue::String(s) => format!("string {:?}", s),
        JsonValue::Array(_) => "array".to_string(),
        JsonValue::Object(_) => "object".to_string(),
    }
}

fn text_param(
    params: &Map<String, JsonValue>,
    name: &'static str,
    default: &str,
) -> Result<String, TranslationError> {
    let value = match present(params, name) {
        None => return Ok(default.to_string()),
        Some(JsonValue::String(s)) if s.trim().is_empty() => return Ok(default.to_string()),
        Some(JsonValue::String(s)) => s.trim(),
        Some(other) => {
            return Err(TranslationError::MalformedParameter {
                name,
                expected: "string",
                actual: describe(other),
            })
        }
    };

    // A delimiter or whitespace inside a token would shift every later field.
    if value.chars().any(|c| c == ':' || c.is_whitespace() || c.is_control()) {
        return Err(TranslationError::InvalidToken {
            name,
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}

fn integer_param(
    params: &Map<String, JsonValue>,
    name: &'static str,
    default: i64,
) -> Result<i64, TranslationError> {
    let malformed = |value: &JsonValue| TranslationError::MalformedParameter {
        name,
        expected: "integer",
        actual: describe(value),
    };

    match present(params, name) {
        None => Ok(default),
        Some(value @ JsonValue::Number(n)) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(f as i64)
                }
                _ => Err(malformed(value)),
            }
        }
        Some(value @ JsonValue::String(s)) => s.trim().parse::<i64>().map_err(|_| malformed(value)),
        Some(other) => Err(malformed(other)),
    }
}

/// Numeric parameter that may be fractional; defaults to `0`
fn number_param(params: &Map<String, JsonValue>, name: &'static str) -> Result<String, TranslationError> {
    let malformed = |value: &JsonValue| TranslationError::MalformedParameter {
        name,
        expected: "number",
        actual: describe(value),
    };

    let parsed = match present(params, name) {
        None => return Ok("0".to_string()),
        Some(value @ JsonValue::Number(n)) => {
            if let Some(i) = n.as_i64() {
                return Ok(i.to_string());
            }
            n.as_f64().ok_or_else(|| malformed(value))?
        }
        Some(value @ JsonValue::String(s)) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(i.to_string());
            }
            trimmed.parse::<f64>().map_err(|_| malformed(value))?
        }
        Some(other) => return Err(malformed(other)),
    };

    if !parsed.is_finite() {
        return Err(TranslationError::MalformedParameter {
            name,
            expected: "finite number",
            actual: parsed.to_string(),
        });
    }
    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommandOrigin, MoveDirection};
    use serde_json::json;

    fn envelope(kind: &str, params: JsonValue) -> CommandEnvelope {
        let params = params.as_object().cloned().unwrap_or_default();
        CommandEnvelope::new("ev3_robot", CommandKind::parse(kind), CommandOrigin::Client)
            .with_params(params)
    }

    #[test]
    fn test_move_with_params() {
        let cmd = envelope("move", json!({"direction": "forward", "speed": 75}));
        assert_eq!(translate(&cmd).unwrap(), "move:forward:75");
    }

    #[test]
    fn test_station_action_renders_json() {
        let cmd = envelope(STATION_ACTION, json!({"action": "open_gate", "target": "station_1"}));
        let payload = render(&cmd).unwrap();
        assert_eq!(payload, RobotPayload::Action(json!({"action": "open_gate"})));
        assert_eq!(payload.to_string(), r#"{"action":"open_gate"}"#);

        let cmd = envelope(STATION_ACTION, json!({"action": " beep ", "count": 2, "note": null}));
        assert_eq!(
            render(&cmd).unwrap(),
            RobotPayload::Action(json!({"action": "beep", "count": 2}))
        );
    }

    #[test]
    fn test_station_action_needs_action_name() {
        for params in [json!({}), json!({"action": ""}), json!({"action": 3})] {
            assert!(matches!(
                render(&envelope(STATION_ACTION, params)),
                Err(TranslationError::MalformedParameter { name: "action", .. })
            ));
        }
    }

    #[test]
    fn test_render_keeps_wire_grammar_for_robot_commands() {
        let cmd = envelope("move", json!({"direction": "left", "speed": 40}));
        assert_eq!(render(&cmd).unwrap(), RobotPayload::Wire("move:left:40".to_string()));
    }

    #[test]
    fn test_move_defaults() {
        assert_eq!(translate(&envelope("move", json!({}))).unwrap(), "move:stop:100");
        assert_eq!(
            translate(&envelope("move", json!({"direction": null, "speed": null}))).unwrap(),
            "move:stop:100"
        );
    }

    #[test]
    fn test_movement_constructor() {
        let cmd = CommandEnvelope::movement("ev3_robot", MoveDirection::Backward, 60, CommandOrigin::Voice);
        assert_eq!(translate(&cmd).unwrap(), "move:backward:60");
    }

    #[test]
    fn test_aux_move_with_params() {
        let cmd = envelope("aux_move", json!({"port": "aux2", "value": 2, "unit": "rotations"}));
        assert_eq!(translate(&cmd).unwrap(), "aux_move:aux2:2:rotations");
    }

    #[test]
    fn test_aux_move_defaults_and_fractional_value() {
        assert_eq!(translate(&envelope("aux_move", json!({}))).unwrap(), "aux_move:aux1:0:rotations");
        let cmd = envelope("aux_move", json!({"value": 1.5, "unit": "degrees"}));
        assert_eq!(translate(&cmd).unwrap(), "aux_move:aux1:1.5:degrees");
    }

    #[test]
    fn test_numeric_strings_are_accepted() {
        let cmd = envelope("move", json!({"direction": "left", "speed": "60"}));
        assert_eq!(translate(&cmd).unwrap(), "move:left:60");
        let cmd = envelope("move", json!({"speed": 80.0}));
        assert_eq!(translate(&cmd).unwrap(), "move:stop:80");
    }

    #[test]
    fn test_plain_kinds() {
        assert_eq!(translate(&envelope("stop", json!({"speed": "ignored"}))).unwrap(), "stop");
        assert_eq!(translate(&envelope("emergency", json!({}))).unwrap(), "emergency");
        assert_eq!(translate(&envelope("beep", json!({}))).unwrap(), "beep");
    }

    #[test]
    fn test_malformed_speed_fails() {
        let err = translate(&envelope("move", json!({"speed": "fast"}))).unwrap_err();
        assert!(matches!(err, TranslationError::MalformedParameter { name: "speed", .. }));

        let err = translate(&envelope("move", json!({"speed": 12.5}))).unwrap_err();
        assert!(matches!(err, TranslationError::MalformedParameter { name: "speed", .. }));

        let err = translate(&envelope("move", json!({"speed": [1]}))).unwrap_err();
        assert!(matches!(err, TranslationError::MalformedParameter { name: "speed", .. }));
    }

    #[test]
    fn test_malformed_aux_value_fails() {
        let err = translate(&envelope("aux_move", json!({"value": "two"}))).unwrap_err();
        assert!(matches!(err, TranslationError::MalformedParameter { name: "value", .. }));

        let err = translate(&envelope("aux_move", json!({"value": true}))).unwrap_err();
        assert!(matches!(err, TranslationError::MalformedParameter { name: "value", .. }));
    }

    #[test]
    fn test_delimiter_injection_fails() {
        let err = translate(&envelope("move", json!({"direction": "forward:999"}))).unwrap_err();
        assert!(matches!(err, TranslationError::InvalidToken { name: "direction", .. }));

        let err = translate(&envelope("aux_move", json!({"port": "aux 1"}))).unwrap_err();
        assert!(matches!(err, TranslationError::InvalidToken { name: "port", .. }));
    }

    #[test]
    fn test_empty_custom_kind_fails() {
        assert_eq!(translate(&envelope("", json!({}))), Err(TranslationError::EmptyCommand));
    }

    proptest::proptest! {
        #[test]
        fn prop_move_never_yields_extra_fields(direction in "\\PC*", speed in proptest::num::i64::ANY) {
            let cmd = envelope("move", json!({"direction": direction, "speed": speed}));
            if let Ok(wire) = translate(&cmd) {
                proptest::prop_assert_eq!(wire.split(':').count(), 3);
                proptest::prop_assert!(!wire.chars().any(char::is_whitespace));
            }
        }
    }
}
