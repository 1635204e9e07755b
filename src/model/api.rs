//! OpenAI-compatible chat completion client.
//!
//! Provides the typed turn representation shared by the whole crate, plus a
//! client that sends `/chat/completions` requests with stop markers and
//! retries transient upstream failures on a Fibonacci backoff schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AgentConfig;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// The author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single turn in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Convenience constructor for a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Convenience constructor for a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Convenience constructor for an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// The generated message inside a choice. Some servers send `null` content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// A single completion choice returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: usize,
    pub message: ResponseMessage,
    /// The reason the model stopped generating (e.g. `"stop"`, `"length"`).
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage statistics for a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// A chat completion response from the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Sampling parameters attached to every request.
#[derive(Debug, Clone)]
pub struct SamplingParams {
    pub max_tokens: usize,
    pub temperature: f64,
    /// Generation halts before any of these markers.
    pub stop: Vec<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a completion request.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Timeouts, rate limits, dropped connections and 5xx responses.
    #[error("transient completion failure: {0}")]
    Transient(String),
    /// Anything that retrying cannot fix (bad request, context overflow, ...).
    #[error("completion failed: {0}")]
    Fatal(String),
    #[error("completion failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: usize, last: String },
}

impl OracleError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> OracleError {
    let message = format!("API returned {status}: {body}");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        OracleError::Transient(message)
    } else {
        OracleError::Fatal(message)
    }
}

fn classify_transport(err: &reqwest::Error) -> OracleError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        OracleError::Transient(err.to_string())
    } else {
        OracleError::Fatal(err.to_string())
    }
}

/// Delay before retry number `attempt` (0-based): `base * fib(attempt + 1)`,
/// capped at one minute.
pub fn backoff_delay(base_secs: f64, attempt: usize) -> Duration {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 0..attempt {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    Duration::from_secs_f64((base_secs * a as f64).min(60.0))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct LlmClient {
    /// The base URL for API requests (e.g. `"http://localhost:8000/v1"`).
    api_base: String,
    api_key: String,
    model: String,
    max_retries: usize,
    backoff_base_secs: f64,
    http: reqwest::Client,
}

impl LlmClient {
    /// Build a client from the agent configuration.
    pub fn new(config: &AgentConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model_name.clone(),
            max_retries: config.max_retries,
            backoff_base_secs: config.backoff_base_secs,
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate the next assistant turn for `messages`.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<String, OracleError> {
        let body = request_body(&self.model, messages, params, false);
        self.send_with_retries(&body).await
    }

    /// Continue generating from the content of the final assistant turn in
    /// `messages` instead of opening a fresh one.
    pub async fn continue_final_message(
        &self,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<String, OracleError> {
        let body = request_body(&self.model, messages, params, true);
        self.send_with_retries(&body).await
    }

    async fn send_with_retries(&self, body: &serde_json::Value) -> Result<String, OracleError> {
        let mut attempt = 0;
        loop {
            match self.send_once(body).await {
                Ok(text) => return Ok(text),
                Err(OracleError::Transient(reason)) if attempt < self.max_retries => {
                    let delay = backoff_delay(self.backoff_base_secs, attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "transient completion failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(OracleError::Transient(last)) => {
                    return Err(OracleError::RetriesExhausted {
                        attempts: attempt + 1,
                        last,
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Calls `POST {api_base}/chat/completions` once.
    async fn send_once(&self, body: &serde_json::Value) -> Result<String, OracleError> {
        let url = format!("{}/chat/completions", self.api_base);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let chat_response: ChatResponse = resp
            .json()
            .await
            .map_err(|e| OracleError::Fatal(format!("failed to parse completion response: {e}")))?;

        if let Some(usage) = &chat_response.usage {
            debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion succeeded"
            );
        }

        first_choice_text(&chat_response)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn request_body(
    model: &str,
    messages: &[ChatMessage],
    params: &SamplingParams,
    continuation: bool,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": params.max_tokens,
        "temperature": params.temperature,
        "stop": params.stop,
    });
    if continuation {
        body["continue_final_message"] = serde_json::Value::Bool(true);
        body["add_generation_prompt"] = serde_json::Value::Bool(false);
    }
    body
}

fn first_choice_text(response: &ChatResponse) -> Result<String, OracleError> {
    response
        .choices
        .first()
        .map(|c| c.message.content.clone().unwrap_or_default())
        .ok_or_else(|| OracleError::Fatal("completion response contained no choices".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SamplingParams {
        SamplingParams {
            max_tokens: 512,
            temperature: 0.0,
            stop: vec!["\nObservation:".into(), "\nTask:".into()],
        }
    }

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You are helpful.");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content, "You are helpful.");
        assert_eq!(ChatMessage::user("Hello").role, Role::User);
        assert_eq!(ChatMessage::assistant("Hi there").role, Role::Assistant);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }

    #[test]
    fn test_plain_body_has_no_continuation_flags() {
        let body = request_body("m", &[ChatMessage::user("hi")], &params(), false);
        assert_eq!(body["model"], "m");
        assert_eq!(body["stop"][0], "\nObservation:");
        assert!(body.get("continue_final_message").is_none());
    }

    #[test]
    fn test_continuation_body_sets_flags() {
        let body = request_body("m", &[ChatMessage::assistant("Thought: ")], &params(), true);
        assert_eq!(body["continue_final_message"], true);
        assert_eq!(body["add_generation_prompt"], false);
    }

    #[test]
    fn test_status_classification() {
        use reqwest::StatusCode;
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "context length").is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "").is_transient());
    }

    #[test]
    fn test_backoff_is_fibonacci_and_capped() {
        let secs: Vec<u64> = (0..6).map(|n| backoff_delay(1.0, n).as_secs()).collect();
        assert_eq!(secs, vec![1, 1, 2, 3, 5, 8]);
        assert_eq!(backoff_delay(1.0, 40), Duration::from_secs(60));
    }

    #[test]
    fn test_first_choice_text_handles_null_content() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"content":null},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert_eq!(first_choice_text(&resp).unwrap(), "");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(first_choice_text(&empty), Err(OracleError::Fatal(_))));
    }
}
