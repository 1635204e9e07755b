//! Environment adapters over the external simulators.
//!
//! Every adapter implements the [`Environment`] trait so the interaction loop
//! can drive it uniformly.
//!
//! Included environments:
//! - **ALFWorld** ([`alfworld`]) -- text-based household tasks (pick, clean,
//!   heat, cool, examine, pick-two).
//! - **ScienceWorld** ([`sciworld`]) -- elementary science experiments with
//!   per-sub-task step ceilings and a monotone score.
//!
//! Each environment module exposes an HTTP bridge to a simulator process and
//! a `Mock*` simulator that replays canned games, so the whole evaluation
//! loop can be exercised without external dependencies.

pub mod alfworld;
pub mod parser;
pub mod sciworld;
pub mod traits;

use crate::config::{EnvConfig, IclFormat, IncorporationMode};
use crate::episode::EpisodeState;
use crate::model::api::ChatMessage;
use crate::model::prompt::{self, InitialPrompt, PromptAssets};
use crate::task::WorkflowIndex;

pub use alfworld::{AlfWorldEnv, AlfWorldServer, MockAlfWorld};
pub use parser::{ActionGrammar, ActionParseError};
pub use sciworld::{MockSciWorld, SciWorldEnv, SciWorldServer};
pub use traits::{
    Environment, HouseholdBatch, HouseholdReset, HouseholdSimulator, ScienceReset,
    ScienceSimulator, ScienceStep, SimulatorError,
};

/// Run-wide inputs every adapter is constructed with.
#[derive(Debug, Clone, Copy)]
pub struct EnvContext<'a> {
    pub config: &'a EnvConfig,
    pub incorporation: IncorporationMode,
    pub prompts: &'a PromptAssets,
    /// Hints looked up by task text when the task carries none.
    pub hints: &'a WorkflowIndex,
}

impl<'a> EnvContext<'a> {
    /// The hint to splice into the initial query, if that is where hints go.
    fn query_hint<'w>(&self, workflow: Option<&'w str>) -> Option<&'w str> {
        match self.incorporation {
            IncorporationMode::Query => workflow,
            _ => None,
        }
    }

    /// Seed a fresh episode with the initial prompt in the configured shape.
    fn seed_state(&self, prompt: InitialPrompt) -> EpisodeState {
        match self.config.icl_format {
            IclFormat::First => {
                EpisodeState::with_history(vec![ChatMessage::user(prompt.observation)])
            }
            IclFormat::Conversation => EpisodeState::with_history(prompt.messages),
        }
    }

    /// Append the hint to an observation turn in observation mode.
    fn with_observation_hint(&self, observation: String, workflow: Option<&str>) -> String {
        match (self.incorporation, workflow) {
            (IncorporationMode::Observation, Some(w)) => {
                format!("{observation}\n\n{}", prompt::workflow_block(w))
            }
            _ => observation,
        }
    }
}

// ---------------------------------------------------------------------------
// AnyEnv: enum dispatch over the two adapters
// ---------------------------------------------------------------------------

/// Either adapter, selected per task at runtime without `dyn` (which is
/// incompatible with async trait methods).
pub enum AnyEnv<'a, H, S> {
    AlfWorld(AlfWorldEnv<'a, H>),
    SciWorld(SciWorldEnv<'a, S>),
}

impl<'a, H: HouseholdSimulator, S: ScienceSimulator> Environment for AnyEnv<'a, H, S> {
    async fn reset(&mut self) -> anyhow::Result<String> {
        match self {
            Self::AlfWorld(e) => e.reset().await,
            Self::SciWorld(e) => e.reset().await,
        }
    }

    async fn step(&mut self, agent_output: &str) -> String {
        match self {
            Self::AlfWorld(e) => e.step(agent_output).await,
            Self::SciWorld(e) => e.step(agent_output).await,
        }
    }

    fn state(&self) -> &EpisodeState {
        match self {
            Self::AlfWorld(e) => e.state(),
            Self::SciWorld(e) => e.state(),
        }
    }

    fn workflow(&self) -> Option<&str> {
        match self {
            Self::AlfWorld(e) => e.workflow(),
            Self::SciWorld(e) => e.workflow(),
        }
    }

    fn into_state(self) -> EpisodeState {
        match self {
            Self::AlfWorld(e) => e.into_state(),
            Self::SciWorld(e) => e.into_state(),
        }
    }
}
