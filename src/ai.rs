use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

/// Models tried in order when the provider reports the current one missing.
pub const FALLBACK_MODELS: &[&str] = &["gemini-1.5-flash", "gemini-1.5-pro", "gemini-pro"];

/// Rate-limit retries, not counting model fallback.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("rate limited: {message}")]
    RateLimited { message: String },
    #[error("model not available: {0}")]
    ModelNotFound(String),
    #[error("empty completion")]
    Empty,
    #[error("completion provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait CompletionProvider: Send + Sync + 'static {
    async fn complete(
        &self,
        model: &str,
        instructions: &str,
        turns: &[ChatTurn],
    ) -> Result<String, CompletionError>;
}

/// Runs a completion with the local recovery policy: model-not-found walks
/// the fallback chain, rate limits back off (provider hint when present,
/// otherwise 2s/4s/6s) for up to [`MAX_ATTEMPTS`] tries, and every other
/// error surfaces immediately.
pub async fn generate_reply(
    provider: &dyn CompletionProvider,
    instructions: &str,
    turns: &[ChatTurn],
) -> Result<String, CompletionError> {
    let mut model_idx = 0;
    let mut attempt = 0;

    loop {
        let model = FALLBACK_MODELS[model_idx];
        match provider.complete(model, instructions, turns).await {
            Ok(text) if !text.trim().is_empty() => return Ok(text),
            Ok(_) => return Err(CompletionError::Empty),
            Err(CompletionError::ModelNotFound(missing)) => {
                model_idx += 1;
                if model_idx >= FALLBACK_MODELS.len() {
                    return Err(CompletionError::ModelNotFound(missing));
                }
                warn!(missing = %missing, fallback = FALLBACK_MODELS[model_idx], "model unavailable, trying fallback");
            }
            Err(CompletionError::RateLimited { message }) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(CompletionError::RateLimited { message });
                }
                let delay = retry_delay(attempt - 1, parse_retry_hint(&message));
                warn!(attempt, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Provider hint wins; otherwise (attempt+1) * 2 seconds.
pub fn retry_delay(attempt: u32, hint: Option<Duration>) -> Duration {
    hint.unwrap_or_else(|| Duration::from_secs(2 * u64::from(attempt + 1)))
}

/// Extracts "Please retry in 1.5s" style hints from provider error text.
pub fn parse_retry_hint(message: &str) -> Option<Duration> {
    let (_, rest) = message.split_once("Please retry in ")?;
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let seconds: f64 = digits.parse().ok()?;
    Some(Duration::from_millis((seconds * 1000.0).ceil() as u64))
}

/// Stand-in used when no completion API key is configured.
pub struct DisabledCompletionProvider;

#[async_trait]
impl CompletionProvider for DisabledCompletionProvider {
    async fn complete(
        &self,
        _model: &str,
        _instructions: &str,
        _turns: &[ChatTurn],
    ) -> Result<String, CompletionError> {
        Err(CompletionError::Provider(
            "completion provider is not configured".to_string(),
        ))
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("collabspace")
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl CompletionProvider for GeminiClient {
    async fn complete(
        &self,
        model: &str,
        instructions: &str,
        turns: &[ChatTurn],
    ) -> Result<String, CompletionError> {
        // Instructions ride as a primed exchange ahead of the transcript.
        let mut contents = vec![
            json!({ "role": "user", "parts": [{ "text": instructions }] }),
            json!({ "role": "model", "parts": [{ "text": "Understood. I am ready to assist." }] }),
        ];
        for turn in turns {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            };
            contents.push(json!({ "role": role, "parts": [{ "text": turn.content }] }));
        }

        let response = self
            .http
            .post(format!(
                "{}/models/{model}:generateContent",
                self.base_url
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({
                "contents": contents,
                "generationConfig": { "maxOutputTokens": 2000, "temperature": 0.7 },
            }))
            .send()
            .await
            .map_err(|err| CompletionError::Provider(err.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let message = response.text().await.unwrap_or_default();
            return Err(CompletionError::RateLimited { message });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CompletionError::ModelNotFound(model.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CompletionError::Provider(format!("{status}: {message}")));
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|err| CompletionError::Provider(err.to_string()))?;

        let text: String = payload
            .candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|part| part.text.as_str())
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(CompletionError::Empty);
        }
        Ok(text)
    }
}
