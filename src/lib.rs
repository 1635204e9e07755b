//! Metaplan evaluation: drive LLM agents through multi-step text environments.
//!
//! An agent reads a textual observation, answers with free text containing an
//! `Action:` line, and the environment replies with the next observation and a
//! reward. Episodes run until success, failure, or an exhausted budget, and an
//! optional workflow hint can be spliced into the query, the observation
//! stream, or the agent's continuation prefix.

pub mod agent;
pub mod config;
pub mod env;
pub mod episode;
pub mod eval;
pub mod model;
pub mod task;
