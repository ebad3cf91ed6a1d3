use crate::error::{ReasoningError, Result};
use crate::reasoning::{parse_reply, ReasoningProvider, ReasoningReply, ReasoningRequest};
use async_trait::async_trait;
use exhibit_core::{Language, VoiceConfig};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Google Generative Language `generateContent` client
///
/// Every call uses the next key in the configured list so the request quota
/// is spread across keys.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    model: String,
    api_keys: Vec<String>,
    next_key: AtomicUsize,
}

impl GeminiProvider {
    pub fn new(config: &VoiceConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_keys: config.api_keys.clone(),
            next_key: AtomicUsize::new(0),
        }
    }

    pub fn key_count(&self) -> usize {
        self.api_keys.len()
    }

    fn rotate_key(&self) -> Result<&str> {
        if self.api_keys.is_empty() {
            return Err(ReasoningError::MissingApiKey("gemini".to_string()));
        }
        let index = self.next_key.fetch_add(1, Ordering::Relaxed) % self.api_keys.len();
        Ok(&self.api_keys[index])
    }

    fn endpoint(&self, key: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            urlencoding::encode(&self.model),
            urlencoding::encode(key)
        )
    }
}

fn system_prompt(lang: Language) -> String {
    format!(
        "You are the Heritage Keeper, a friendly guide robot at a heritage exhibit. \
         Give short, engaging facts about the heritage sites on display and help \
         visitors drive the robot when they ask.\n\
         Rules:\n\
         1. Answer in at most 2-3 sentences; the answer is spoken aloud.\n\
         2. Answer in {}.\n\
         3. If the visitor wants the robot to move, set robot_move.\n\
         Reply with JSON only:\n\
         {{\"text\": \"spoken answer\", \
         \"robot_move\": \"forward\" | \"backward\" | \"left\" | \"right\" | \"stop\" | null, \
         \"emotion\": \"HAPPY\" | \"SAD\" | \"SURPRISED\" | \"THINKING\" | null}}",
        lang.tag()
    )
}

/// `generateContent` body: history as alternating turns, then the new utterance
pub fn build_body(request: &ReasoningRequest) -> JsonValue {
    let mut contents: Vec<JsonValue> = Vec::with_capacity(request.history.len() * 2 + 1);
    for turn in &request.history {
        contents.push(json!({"role": "user", "parts": [{"text": turn.user}]}));
        contents.push(json!({"role": "model", "parts": [{"text": turn.reply}]}));
    }
    contents.push(json!({"role": "user", "parts": [{"text": request.text}]}));

    json!({
        "systemInstruction": {"parts": [{"text": system_prompt(request.lang)}]},
        "contents": contents,
        "generationConfig": {"responseMimeType": "application/json"},
    })
}

/// Pull the first candidate's text out of a `generateContent` response
pub fn candidate_text(response: &JsonValue) -> Result<&str> {
    response["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or_else(|| ReasoningError::InvalidReply("Response has no candidate text".to_string()))
}

#[async_trait]
impl ReasoningProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn respond(&self, request: &ReasoningRequest) -> Result<ReasoningReply> {
        let key = self.rotate_key()?;
        let body = build_body(request);

        let response = self.client.post(self.endpoint(key)).json(&body).send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ReasoningError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ReasoningError::InvalidReply(format!("HTTP {}: {}", status, text)));
        }

        let json: JsonValue = response.json().await?;
        let raw = candidate_text(&json)?;
        debug!("gemini replied: {}", raw);
        parse_reply(raw)
    }
}
