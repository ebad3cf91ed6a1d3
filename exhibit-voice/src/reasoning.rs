//! Reasoning collaborator contract
//!
//! Providers answer with `{"text": ..., "robot_move": ..., "emotion": ...}`,
//! sometimes wrapped in a markdown code fence.

use crate::error::{ReasoningError, Result};
use async_trait::async_trait;
use exhibit_core::{Language, MoveDirection};
use serde::{Deserialize, Serialize};

/// One exchange kept as context for the next request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub reply: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningRequest {
    pub text: String,
    pub lang: Language,
    /// Oldest first
    pub history: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningReply {
    pub text: String,
    pub robot_move: Option<MoveDirection>,
    pub emotion: Option<String>,
}

#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn respond(&self, request: &ReasoningRequest) -> Result<ReasoningReply>;
}

#[derive(Deserialize)]
struct RawReply {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    robot_move: Option<String>,
    #[serde(default)]
    emotion: Option<String>,
}

/// Remove a surrounding ``` fence (with or without a language tag)
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string on the opening line, e.g. "json".
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a provider reply. Unknown movement values become `None`.
pub fn parse_reply(raw: &str) -> Result<ReasoningReply> {
    let parsed: RawReply = serde_json::from_str(strip_fences(raw))?;

    let text = parsed
        .text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ReasoningError::InvalidReply("Reply has no text".to_string()))?;

    let robot_move = parsed.robot_move.as_deref().and_then(MoveDirection::parse);
    let emotion = parsed
        .emotion
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    Ok(ReasoningReply {
        text,
        robot_move,
        emotion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{\"a\":1}\n```  "), "{\"a\":1}");
        assert_eq!(strip_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = parse_reply(
            "```json\n{\"text\": \"Đi thẳng nhé\", \"robot_move\": \"forward\", \"emotion\": \"HAPPY\"}\n```",
        )
        .unwrap();
        assert_eq!(reply.text, "Đi thẳng nhé");
        assert_eq!(reply.robot_move, Some(MoveDirection::Forward));
        assert_eq!(reply.emotion.as_deref(), Some("HAPPY"));
    }

    #[test]
    fn test_null_and_unknown_moves_are_none() {
        let reply = parse_reply(r#"{"text": "Hello", "robot_move": null}"#).unwrap();
        assert_eq!(reply.robot_move, None);

        let reply = parse_reply(r#"{"text": "Hello", "robot_move": "dance"}"#).unwrap();
        assert_eq!(reply.robot_move, None);
        assert_eq!(reply.emotion, None);
    }

    #[test]
    fn test_missing_text_is_invalid() {
        assert!(matches!(
            parse_reply(r#"{"robot_move": "forward"}"#),
            Err(ReasoningError::InvalidReply(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"text": "  "}"#),
            Err(ReasoningError::InvalidReply(_))
        ));
        assert!(parse_reply("I think you should go forward").is_err());
    }
}
