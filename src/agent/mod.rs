//! Agent module: the model whose behaviour is being evaluated.
//!
//! The [`Agent`] trait is the seam the interaction loop calls through;
//! [`LlmAgent`] implements it over a chat-completions endpoint.

pub mod agent;

// Re-export the primary types for convenient access.
pub use agent::{Agent, LlmAgent, STOP_MARKERS};

#[cfg(test)]
pub use agent::{ScriptedAgent, ScriptedCall};
