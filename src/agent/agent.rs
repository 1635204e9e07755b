//! The evaluated agent: an LLM behind an OpenAI-compatible endpoint.
//!
//! Two call shapes are supported:
//!
//! - plain: produce the next assistant turn for the history;
//! - continuation: append a synthetic assistant turn holding a prefix (the
//!   workflow hint and a `Thought: ` marker) and let the model keep writing
//!   from that exact text.
//!
//! Both stop before the model starts inventing the environment's side of the
//! conversation.

use tracing::debug;

use crate::config::AgentConfig;
use crate::model::api::{ChatMessage, LlmClient, OracleError, SamplingParams};

/// Generation halts at any of these markers.
pub const STOP_MARKERS: [&str; 3] = ["\nObservation:", "\nTask:", "\n---"];

/// Anything that can play the agent's side of an episode.
#[allow(async_fn_in_trait)]
pub trait Agent {
    /// Produce one assistant turn for `history`.
    async fn respond(&self, history: &[ChatMessage]) -> Result<String, OracleError>;

    /// Produce one assistant turn that continues from `prefix`.
    ///
    /// The returned text is only the continuation; `prefix` is not repeated.
    async fn continue_from(
        &self,
        history: &[ChatMessage],
        prefix: &str,
    ) -> Result<String, OracleError>;
}

// ---------------------------------------------------------------------------
// LLM agent
// ---------------------------------------------------------------------------

/// An agent backed by a chat-completions model.
#[derive(Debug, Clone)]
pub struct LlmAgent {
    client: LlmClient,
    params: SamplingParams,
}

impl LlmAgent {
    pub fn new(config: &AgentConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: LlmClient::new(config)?,
            params: SamplingParams {
                max_tokens: config.max_completion_tokens,
                temperature: config.temperature,
                stop: STOP_MARKERS.iter().map(|s| s.to_string()).collect(),
            },
        })
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }
}

impl Agent for LlmAgent {
    async fn respond(&self, history: &[ChatMessage]) -> Result<String, OracleError> {
        let text = self.client.complete(history, &self.params).await?;
        debug!(model = %self.client.model(), chars = text.len(), "Agent responded");
        Ok(text)
    }

    async fn continue_from(
        &self,
        history: &[ChatMessage],
        prefix: &str,
    ) -> Result<String, OracleError> {
        let messages = with_prefix(history, prefix);
        let text = self
            .client
            .continue_final_message(&messages, &self.params)
            .await?;
        debug!(model = %self.client.model(), chars = text.len(), "Agent continued from prefix");
        Ok(text)
    }
}

/// `history` followed by an assistant turn holding `prefix`.
fn with_prefix(history: &[ChatMessage], prefix: &str) -> Vec<ChatMessage> {
    let mut messages = history.to_vec();
    messages.push(ChatMessage::assistant(prefix));
    messages
}

// ---------------------------------------------------------------------------
// Scripted agent for testing
// ---------------------------------------------------------------------------

/// Replays queued replies and records every call it receives.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    replies: std::sync::Mutex<std::collections::VecDeque<Result<String, OracleError>>>,
    calls: std::sync::Mutex<Vec<ScriptedCall>>,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedCall {
    pub history_len: usize,
    pub prefix: Option<String>,
}

#[cfg(test)]
impl ScriptedAgent {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agent = Self::default();
        for reply in replies {
            agent.push(Ok(reply.into()));
        }
        agent
    }

    pub fn push(&self, reply: Result<String, OracleError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self, history: &[ChatMessage], prefix: Option<&str>) -> Result<String, OracleError> {
        self.calls.lock().unwrap().push(ScriptedCall {
            history_len: history.len(),
            prefix: prefix.map(str::to_string),
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Fatal("script exhausted".into())))
    }
}

#[cfg(test)]
impl Agent for ScriptedAgent {
    async fn respond(&self, history: &[ChatMessage]) -> Result<String, OracleError> {
        self.next(history, None)
    }

    async fn continue_from(
        &self,
        history: &[ChatMessage],
        prefix: &str,
    ) -> Result<String, OracleError> {
        self.next(history, Some(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::api::Role;

    #[test]
    fn test_sampling_params_come_from_config() {
        let config = AgentConfig {
            max_completion_tokens: 256,
            temperature: 0.3,
            ..AgentConfig::default()
        };
        let agent = LlmAgent::new(&config).unwrap();
        assert_eq!(agent.params.max_tokens, 256);
        assert_eq!(agent.params.temperature, 0.3);
        assert_eq!(agent.params.stop, vec!["\nObservation:", "\nTask:", "\n---"]);
        assert_eq!(agent.model(), config.model_name);
    }

    #[test]
    fn test_prefix_becomes_final_assistant_turn() {
        let history = vec![ChatMessage::user("task"), ChatMessage::assistant("Action: look")];
        let messages = with_prefix(&history, "Plan\nThought: ");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].content, "Plan\nThought: ");
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_agent_replays_and_records() {
        let agent = ScriptedAgent::new(["Action: look"]);
        let history = vec![ChatMessage::user("task")];
        assert_eq!(agent.respond(&history).await.unwrap(), "Action: look");
        assert!(agent.continue_from(&history, "p").await.is_err());
        assert_eq!(
            agent.calls(),
            vec![
                ScriptedCall {
                    history_len: 1,
                    prefix: None
                },
                ScriptedCall {
                    history_len: 1,
                    prefix: Some("p".into())
                },
            ]
        );
    }
}
