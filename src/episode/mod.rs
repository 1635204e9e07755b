//! Episode state and persistence.
//!
//! - [`state::EpisodeState`] -- conversation history, counters, reward and
//!   termination status of one task attempt.
//! - [`store::EpisodeStore`] -- one JSON record per finished task, used to
//!   skip completed tasks when a run is resumed.

pub mod state;
pub mod store;

pub use state::{Budget, EpisodeState, RewardPolicy, StepResult, TerminateReason};
pub use store::EpisodeStore;
