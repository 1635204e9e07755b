//! Evaluation driver.
//!
//! - [`interaction::run_episode`] -- alternate agent turns and adapter steps
//!   until an episode finishes.
//! - [`runner::EvalRunner`] -- evaluate a shard of tasks with resume-by-skip
//!   and aggregate success rate and reward.

pub mod interaction;
pub mod runner;

pub use interaction::run_episode;
pub use runner::{
    default_output_dir, summarize, EvalRunner, RunMetrics, RunOptions, RunReport, Simulator,
};
