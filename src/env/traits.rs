//! Core environment traits and the simulator boundary.
//!
//! Every adapter implements [`Environment`] so the interaction loop can drive
//! it uniformly. Adapters sit on top of an external simulator reached through
//! [`HouseholdSimulator`] or [`ScienceSimulator`]; the run controller owns the
//! simulator handle and lends it to one adapter at a time.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::episode::EpisodeState;

/// An environment adapter: one task, one episode.
#[allow(async_fn_in_trait)]
pub trait Environment {
    /// Start a fresh episode and return the initial observation.
    ///
    /// Errors here mean the simulator or the prompt assets are unusable.
    async fn reset(&mut self) -> Result<String>;

    /// Apply one agent turn and return the observation shown to the agent.
    ///
    /// Never fails: parse errors, rejected actions and simulator faults all
    /// become observation turns and counter updates on the episode state.
    async fn step(&mut self, agent_output: &str) -> String;

    /// The episode state as of the last call.
    fn state(&self) -> &EpisodeState;

    /// The workflow hint attached to the current task, if any.
    fn workflow(&self) -> Option<&str>;

    /// Give up the adapter and keep its episode state.
    fn into_state(self) -> EpisodeState
    where
        Self: Sized;
}

// ---------------------------------------------------------------------------
// Household simulator
// ---------------------------------------------------------------------------

/// A freshly loaded household game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdReset {
    /// Raw observation, including the welcome banner.
    pub observation: String,
    /// Path of the game file; its directory names encode the task type.
    pub gamefile: String,
}

/// One household step. The simulator batches every field; a batch of one
/// action yields vectors of length one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HouseholdBatch {
    pub observations: Vec<String>,
    pub scores: Vec<f64>,
    pub dones: Vec<bool>,
    /// Whether the goal has been reached.
    pub won: Vec<bool>,
}

/// A long-lived, single-consumer household simulator session.
#[allow(async_fn_in_trait)]
pub trait HouseholdSimulator {
    /// Discard the current game and load game `game_index`.
    async fn reset(&mut self, game_index: usize) -> Result<HouseholdReset>;

    /// Apply a batch of actions.
    async fn step(&mut self, actions: &[String]) -> Result<HouseholdBatch>;

    /// Release the session.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Science simulator
// ---------------------------------------------------------------------------

/// A freshly reset science scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScienceReset {
    pub observation: String,
    /// Natural-language task description.
    #[serde(rename = "taskDesc")]
    pub task_desc: String,
}

/// Extra step information from the science simulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScienceInfo {
    /// Unclipped task score, the reward the adapter tracks.
    pub raw_score: f64,
}

/// One science step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScienceStep {
    pub observation: String,
    pub score: f64,
    pub done: bool,
    pub info: ScienceInfo,
}

/// Failure of a science step.
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// The simulator refused the action as invalid.
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// A long-lived, single-consumer science simulator session.
#[allow(async_fn_in_trait)]
pub trait ScienceSimulator {
    /// Load a sub-task variation, discarding any previous scenario.
    async fn load(&mut self, task_name: &str, variation: usize, simplification: &str)
        -> Result<()>;

    /// Reset the loaded scenario to its initial state.
    async fn reset(&mut self) -> Result<ScienceReset>;

    async fn step(&mut self, action: &str) -> Result<ScienceStep, SimulatorError>;

    /// Release the session.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
