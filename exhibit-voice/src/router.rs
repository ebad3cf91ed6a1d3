//! Voice command routing
//!
//! Order of operations for every utterance:
//! 1. safety keywords stop the robot without consulting the provider
//! 2. otherwise the provider is asked, bounded by a timeout
//! 3. any movement intent is published, then the spoken reply is queued
//!
//! Safety stops may overtake a request still waiting on the provider. Such a
//! request keeps its spoken reply but its movement is dropped.
//!
//! Provider failures become a localized apology and never reach the caller.

use crate::error::ReasoningError;
use crate::reasoning::{ConversationTurn, ReasoningProvider, ReasoningReply, ReasoningRequest};
use crate::safety;
use exhibit_bus::CommandPublisher;
use exhibit_core::{
    translate, ClientEvent, CommandEnvelope, CommandOrigin, Language, MoveDirection, RobotsConfig,
    VoiceConfig,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Router settings
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub target: String,
    pub emotion_target: String,
    pub move_speed: u32,
    pub timeout: Duration,
    pub history_turns: usize,
}

impl VoiceSettings {
    pub fn from_config(voice: &VoiceConfig, robots: &RobotsConfig) -> Self {
        Self {
            target: robots.default_target.clone(),
            emotion_target: robots.emotion_target.clone(),
            move_speed: voice.move_speed,
            timeout: voice.timeout(),
            history_turns: voice.history_turns,
        }
    }
}

/// How an utterance was handled
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceOutcome {
    pub text: String,
    pub emotion: Option<String>,
    pub movement: Option<MoveDirection>,
    pub safety_stop: bool,
    pub fallback: bool,
}

pub struct VoiceRouter {
    provider: Arc<dyn ReasoningProvider>,
    publisher: Arc<dyn CommandPublisher>,
    events: mpsc::Sender<ClientEvent>,
    settings: VoiceSettings,
    history: Mutex<VecDeque<ConversationTurn>>,
    /// Safety stops issued so far
    stops: AtomicU64,
}

impl VoiceRouter {
    pub fn new(
        provider: Arc<dyn ReasoningProvider>,
        publisher: Arc<dyn CommandPublisher>,
        events: mpsc::Sender<ClientEvent>,
        settings: VoiceSettings,
    ) -> Self {
        Self {
            provider,
            publisher,
            events,
            history: Mutex::new(VecDeque::with_capacity(settings.history_turns)),
            settings,
            stops: AtomicU64::new(0),
        }
    }

    /// Handle one utterance end to end
    pub async fn handle(&self, text: &str, lang: Language) -> VoiceOutcome {
        let outcome = if safety::is_safety_stop(text) {
            info!("Safety keyword in voice input, stopping {}", self.settings.target);
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.send(CommandEnvelope::stop(&self.settings.target, CommandOrigin::Voice))
                .await;
            VoiceOutcome {
                text: safety::acknowledgement(lang).to_string(),
                emotion: None,
                movement: Some(MoveDirection::Stop),
                safety_stop: true,
                fallback: false,
            }
        } else {
            let stops_before = self.stops.load(Ordering::SeqCst);
            match self.ask(text, lang).await {
                Ok(mut reply) => {
                    self.remember(text, &reply.text);
                    if self.stops.load(Ordering::SeqCst) != stops_before
                        && reply.robot_move.map_or(false, |d| d != MoveDirection::Stop)
                    {
                        info!("Safety stop arrived while thinking, dropping {:?}", reply.robot_move);
                        reply.robot_move = None;
                    }
                    if let Some(direction) = reply.robot_move {
                        self.send(self.movement(direction)).await;
                    }
                    if let Some(emotion) = &reply.emotion {
                        self.cue_emotion(emotion).await;
                    }
                    VoiceOutcome {
                        text: reply.text,
                        emotion: reply.emotion,
                        movement: reply.robot_move,
                        safety_stop: false,
                        fallback: false,
                    }
                }
                Err(e) => {
                    warn!("Voice provider {} failed: {}", self.provider.name(), e);
                    VoiceOutcome {
                        text: safety::apology(lang).to_string(),
                        emotion: None,
                        movement: None,
                        safety_stop: false,
                        fallback: true,
                    }
                }
            }
        };

        let event = ClientEvent::VoiceResponse {
            text: outcome.text.clone(),
            emotion: outcome.emotion.clone(),
            lang,
        };
        if self.events.send(event).await.is_err() {
            error!("Client event queue closed, voice response not delivered");
        }
        outcome
    }

    /// Copy of the retained conversation, oldest first
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.history.lock().iter().cloned().collect()
    }

    async fn ask(&self, text: &str, lang: Language) -> Result<ReasoningReply, ReasoningError> {
        let request = ReasoningRequest {
            text: text.to_string(),
            lang,
            history: self.history(),
        };
        tokio::time::timeout(self.settings.timeout, self.provider.respond(&request))
            .await
            .map_err(|_| ReasoningError::Timeout(self.settings.timeout))?
    }

    fn remember(&self, user: &str, reply: &str) {
        if self.settings.history_turns == 0 {
            return;
        }
        let mut history = self.history.lock();
        while history.len() >= self.settings.history_turns {
            history.pop_front();
        }
        history.push_back(ConversationTurn {
            user: user.to_string(),
            reply: reply.to_string(),
        });
    }

    fn movement(&self, direction: MoveDirection) -> CommandEnvelope {
        match direction {
            MoveDirection::Stop => CommandEnvelope::stop(&self.settings.target, CommandOrigin::Voice),
            _ => CommandEnvelope::movement(
                &self.settings.target,
                direction,
                self.settings.move_speed,
                CommandOrigin::Voice,
            ),
        }
    }

    async fn send(&self, envelope: CommandEnvelope) {
        let wire = match translate(&envelope) {
            Ok(wire) => wire,
            Err(e) => {
                error!("Voice command could not be translated: {}", e);
                return;
            }
        };
        if let Err(e) = self.publisher.publish_command(&envelope.target, &wire).await {
            error!("Failed to publish voice command '{}': {}", wire, e);
        }
    }

    async fn cue_emotion(&self, emotion: &str) {
        let cue = emotion.to_uppercase();
        if let Err(e) = self
            .publisher
            .publish_emotion(&self.settings.emotion_target, &cue)
            .await
        {
            warn!("Failed to publish emotion cue {}: {}", cue, e);
        }
    }
}
