//! Completion-service client and prompt assembly.
//!
//! This module provides:
//! - [`api::LlmClient`] -- OpenAI-compatible chat completion client with stop
//!   markers, assistant-prefix continuation and transient-failure retries.
//! - [`prompt`] -- the initial-prompt assembler and the fixed wording used to
//!   splice workflow hints into queries, observations and reasoning prefixes.

pub mod api;
pub mod prompt;

pub use api::{ChatMessage, LlmClient, OracleError, Role, SamplingParams};
pub use prompt::{InitialPrompt, PromptAssets};
