//! Cascade LLM - chat-completions judge backend
//!
//! Sends each stage's system prompt and JSON context to an OpenAI-compatible
//! `/chat/completions` endpoint and parses the reply into a
//! [`RawJudgment`]. Replies wrapped in Markdown code fences are accepted.
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_core::{FallbackJudge, HeuristicJudge};
//! use cascade_llm::{ChatCompletionsConfig, ChatCompletionsJudge};
//! use std::sync::Arc;
//!
//! let remote = ChatCompletionsJudge::new(ChatCompletionsConfig::from_env())?;
//! let judge = FallbackJudge::new(Arc::new(remote), Arc::new(HeuristicJudge::new()));
//! ```

#![warn(unreachable_pub)]

use async_trait::async_trait;
use cascade_core::{ExternalJudge, JudgeError, JudgeRequest, RawJudgment};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Default chat-completions endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default model
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const MAX_ERROR_BODY: usize = 320;

/// Connection settings for [`ChatCompletionsJudge`]
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletionsConfig {
    /// Full URL of the chat-completions endpoint
    pub endpoint: String,
    /// Model name sent with every request
    pub model: String,
    /// Bearer token, omitted from requests when `None`
    pub api_key: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
}

impl Default for ChatCompletionsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            temperature: 0.3,
            request_timeout_secs: 60,
        }
    }
}

impl ChatCompletionsConfig {
    /// Defaults with the API key taken from `OPENAI_API_KEY`
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()),
            ..Self::default()
        }
    }

    /// With endpoint
    #[inline]
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// With model
    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// With request timeout
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Judge backed by an OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone)]
pub struct ChatCompletionsJudge {
    client: Client,
    config: ChatCompletionsConfig,
}

impl ChatCompletionsJudge {
    /// Create new judge
    ///
    /// # Errors
    /// Returns [`JudgeError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: ChatCompletionsConfig) -> Result<Self, JudgeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| JudgeError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Settings in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ChatCompletionsConfig {
        &self.config
    }

    fn payload(&self, request: &JudgeRequest) -> Value {
        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_message() },
            ],
        })
    }

    fn transport_error(&self, error: &reqwest::Error) -> JudgeError {
        if error.is_timeout() {
            JudgeError::Timeout {
                duration_secs: self.config.request_timeout_secs,
            }
        } else {
            JudgeError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl ExternalJudge for ChatCompletionsJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<RawJudgment, JudgeError> {
        tracing::debug!("[{}] POST {}", request.stage, self.config.endpoint);

        let mut builder = self.client.post(&self.config.endpoint);
        if let Some(api_key) = self.config.api_key.as_deref() {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .json(&self.payload(request))
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(JudgeError::Status {
                status,
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| JudgeError::Malformed(format!("invalid chat response: {e}")))?;

        let choice = body
            .choices
            .first()
            .ok_or_else(|| JudgeError::Malformed("response did not include choices".into()))?;

        parse_judgment(&extract_text(&choice.message.content))
    }
}

/// Parse a model reply into a raw judgment
///
/// # Errors
/// Returns [`JudgeError::Malformed`] if the reply is not a JSON object.
pub fn parse_judgment(reply: &str) -> Result<RawJudgment, JudgeError> {
    serde_json::from_str(strip_code_fences(reply))
        .map_err(|e| JudgeError::Malformed(format!("{e}: {}", truncate(reply, 80))))
}

/// Strip a surrounding Markdown code fence, with or without a language tag
#[must_use]
pub fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Message content may be a string or an array of typed parts
fn extract_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{truncated}...")
    } else {
        truncated
    }
}
