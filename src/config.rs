use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Complete configuration for one evaluation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub agent: AgentConfig,
    pub env: EnvConfig,
    pub task: TaskConfig,
    /// Where the workflow hint is spliced into the prompt pipeline.
    pub incorporation: IncorporationMode,
}

/// Where a workflow hint is incorporated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IncorporationMode {
    /// Spliced into the initial task description.
    #[default]
    Query,
    /// Appended to every environment observation turn.
    Observation,
    /// Supplied to the agent as an assistant prefix to continue from.
    Thought,
}

/// How the seeded conversation is laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IclFormat {
    /// One combined user turn holding instruction, examples and task.
    #[default]
    First,
    /// System turn, example transcripts as real turns, then the task turn.
    Conversation,
}

/// Which simulator family a run evaluates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EnvKind {
    #[default]
    Alfworld,
    Sciworld,
}

impl EnvKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alfworld => "alfworld",
            Self::Sciworld => "sciworld",
        }
    }
}

/// Completion-service settings for the agent oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier sent with every request.
    pub model_name: String,
    /// Base URL of an OpenAI-compatible API.
    pub api_base: String,
    /// Bearer token (falls back to `OPENAI_API_KEY` in the binary).
    pub api_key: String,
    pub max_completion_tokens: usize,
    pub temperature: f64,
    /// Retries on transient upstream failures before giving up.
    pub max_retries: usize,
    pub request_timeout_secs: u64,
    /// Unit of the Fibonacci backoff schedule.
    pub backoff_base_secs: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model_name: "llama3.1-8b".into(),
            api_base: "http://localhost:8000/v1".into(),
            api_key: String::new(),
            max_completion_tokens: 512,
            temperature: 0.0,
            max_retries: 8,
            request_timeout_secs: 120,
            backoff_base_secs: 1.0,
        }
    }
}

impl AgentConfig {
    /// The last path component of the model name (`org/model` -> `model`).
    pub fn short_model_name(&self) -> &str {
        self.model_name
            .rsplit('/')
            .next()
            .unwrap_or(&self.model_name)
    }
}

/// Environment adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub env_class: EnvKind,
    pub icl_format: IclFormat,
    /// Number of in-context example transcripts per prompt.
    pub icl_num: usize,
    /// Household step ceiling.
    pub max_steps: usize,
    /// Household ceiling on unparsable agent turns.
    pub max_bad_steps: usize,
    /// Science ceiling on consecutive unrecognised actions.
    pub max_error_steps: usize,
    /// Science ceiling for sub-tasks missing from the step-limit table.
    pub default_max_steps: usize,
    /// Science simplification preset passed on load.
    pub simplification: String,
    /// Base URL of the simulator bridge.
    pub server_url: String,
    /// Optional JSON file with the instruction block and in-context examples.
    pub prompt_path: Option<PathBuf>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            env_class: EnvKind::Alfworld,
            icl_format: IclFormat::First,
            icl_num: 1,
            max_steps: 50,
            max_bad_steps: 50,
            max_error_steps: 10,
            default_max_steps: 30,
            simplification: "easy".into(),
            server_url: "http://localhost:3000".into(),
            prompt_path: None,
        }
    }
}

/// Where task definitions and workflow hints come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Directory holding split indices and lookup tables.
    pub data_path: PathBuf,
    /// Newline-delimited workflow hint records.
    pub workflow_path: Option<PathBuf>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data"),
            workflow_path: None,
        }
    }
}

impl EvalConfig {
    /// Read a config from a JSON file. Missing fields take their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }
}
