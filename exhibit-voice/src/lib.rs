//! exhibit-voice: spoken interaction with the exhibit robots
//!
//! Provides:
//! - A safety interlock evaluated before any reasoning call
//! - The reasoning provider contract and a Gemini implementation
//! - The voice router that turns replies into robot commands and client events

pub mod error;
pub mod providers;
pub mod reasoning;
pub mod router;
pub mod safety;


pub use error::{ReasoningError, Result};
pub use providers::GeminiProvider;
pub use reasoning::{ConversationTurn, ReasoningProvider, ReasoningReply, ReasoningRequest};
pub use router::{VoiceOutcome, VoiceRouter, VoiceSettings};
