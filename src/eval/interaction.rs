//! The per-task interaction loop.
//!
//! Resets the adapter, then alternates agent turns and adapter steps until
//! the episode state reports it has finished. The adapter owns every
//! termination path except one: a hard oracle failure, which ends the episode
//! here with `input_too_long`.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::config::IncorporationMode;
use crate::env::Environment;
use crate::episode::{EpisodeState, TerminateReason};
use crate::model::prompt::thought_prefix;

/// Run one episode to completion and hand back its final state.
///
/// Only a failing `reset` is an error; everything after that ends in a
/// finished state.
pub async fn run_episode<E, A>(
    mut env: E,
    agent: &A,
    incorporation: IncorporationMode,
    task_id: &str,
) -> Result<EpisodeState>
where
    E: Environment,
    A: Agent,
{
    let initial = env.reset().await?;
    debug!(task_id, prompt = %initial, "Initial observation");

    while !env.state().is_finished() {
        let history = env.state().history();
        let reply = match (incorporation, env.workflow()) {
            (IncorporationMode::Thought, Some(workflow)) => {
                agent.continue_from(history, &thought_prefix(workflow)).await
            }
            _ => agent.respond(history).await,
        };

        let agent_output = match reply {
            Ok(text) => text,
            Err(e) => {
                warn!(task_id, error = %e, "Agent failed; ending episode");
                let mut state = env.into_state();
                state.finish(TerminateReason::InputTooLong);
                return Ok(state);
            }
        };
        debug!(task_id, output = %agent_output, "Agent turn");

        let observation = env.step(&agent_output).await;
        if !env.state().is_finished() {
            debug!(task_id, %observation, "Observation");
        }
    }

    let state = env.into_state();
    info!(
        task_id,
        steps = state.steps(),
        success = state.success(),
        reward = ?state.reward(),
        terminate_reason = state.terminate_reason().map(|r| r.as_str()).unwrap_or("none"),
        "Task finished"
    );
    Ok(state)
}
