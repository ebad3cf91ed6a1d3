//! Topic layout
//!
//! ```text
//! robot/<id>/command    hub -> robot   wire grammar string, or {"action": ...} for stations
//! robot/<id>/emotion    hub -> robot   {"type": <cue>}
//! robot/<id>/telemetry  robot -> hub   partial telemetry JSON
//! robot/<id>/status     robot -> hub   station status JSON
//! robot/config          hub -> robots  retained profile
//! ```

use crate::error::BusError;

pub const TELEMETRY_FILTER: &str = "robot/+/telemetry";
pub const STATUS_FILTER: &str = "robot/+/status";

const ROOT: &str = "robot";

/// Topic the hub subscribes to, with the publishing robot's id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTopic {
    Telemetry { robot_id: String },
    Status { robot_id: String },
}

/// Reject ids that would change the topic shape
pub fn check_id(id: &str) -> Result<(), BusError> {
    if id.is_empty() || id.contains(['/', '+', '#']) || id.chars().any(char::is_control) {
        return Err(BusError::Topic(format!("Invalid robot id: {:?}", id)));
    }
    Ok(())
}

pub fn command_topic(target: &str) -> Result<String, BusError> {
    check_id(target)?;
    Ok(format!("{}/{}/command", ROOT, target))
}

pub fn emotion_topic(target: &str) -> Result<String, BusError> {
    check_id(target)?;
    Ok(format!("{}/{}/emotion", ROOT, target))
}

pub fn parse_inbound(topic: &str) -> Result<InboundTopic, BusError> {
    let mut levels = topic.split('/');
    match (levels.next(), levels.next(), levels.next(), levels.next()) {
        (Some(ROOT), Some(id), Some(leaf), None) if check_id(id).is_ok() => {
            let robot_id = id.to_string();
            match leaf {
                "telemetry" => Ok(InboundTopic::Telemetry { robot_id }),
                "status" => Ok(InboundTopic::Status { robot_id }),
                _ => Err(BusError::Topic(format!("Unhandled topic: {}", topic))),
            }
        }
        _ => Err(BusError::Topic(format!("Unhandled topic: {}", topic))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_topics() {
        assert_eq!(command_topic("ev3_robot").unwrap(), "robot/ev3_robot/command");
        assert_eq!(emotion_topic("mobile_guide").unwrap(), "robot/mobile_guide/emotion");
    }

    #[test]
    fn test_wildcards_in_target_are_rejected() {
        assert!(command_topic("+").is_err());
        assert!(command_topic("a/b").is_err());
        assert!(command_topic("").is_err());
    }

    #[test]
    fn test_parse_inbound() {
        assert_eq!(
            parse_inbound("robot/ev3_robot/telemetry").unwrap(),
            InboundTopic::Telemetry {
                robot_id: "ev3_robot".to_string()
            }
        );
        assert_eq!(
            parse_inbound("robot/station_1/status").unwrap(),
            InboundTopic::Status {
                robot_id: "station_1".to_string()
            }
        );
        assert!(parse_inbound("robot/config").is_err());
        assert!(parse_inbound("robot/a/status/extra").is_err());
        assert!(parse_inbound("other/a/status").is_err());
    }
}
