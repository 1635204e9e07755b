//! The mutable record of one task attempt.
//!
//! An [`EpisodeState`] holds the conversation so far, the step counters, the
//! reward, and the termination status. Adapters feed it one [`StepResult`] per
//! agent turn through [`EpisodeState::advance`]; the state applies the reward
//! policy and the budgets in [`Budget`] and finalizes itself at most once.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::api::{ChatMessage, Role};

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateReason {
    Success,
    /// Step ceiling reached, or too many unparsable turns.
    MaxSteps,
    /// Too many consecutive actions the simulator did not recognise.
    MaxErrorSteps,
    /// The completion service could not produce a turn.
    InputTooLong,
}

impl TerminateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::MaxSteps => "max_steps",
            Self::MaxErrorSteps => "max_error_steps",
            Self::InputTooLong => "input_too_long",
        }
    }
}

/// How a newly observed reward is folded into the running value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardPolicy {
    /// The latest observation replaces the previous value.
    Latest,
    /// The running maximum is kept; the score never goes down.
    Max,
}

impl RewardPolicy {
    fn fold(self, current: Option<f64>, observed: f64) -> f64 {
        match (self, current) {
            (Self::Max, Some(prev)) => prev.max(observed),
            _ => observed,
        }
    }
}

/// Per-episode ceilings and reward policy, fixed by the adapter at reset.
#[derive(Debug, Clone, PartialEq)]
pub struct Budget {
    pub max_steps: usize,
    /// Ceiling on unparsable turns, reported as `max_steps`.
    pub max_bad_steps: Option<usize>,
    /// Ceiling on consecutive unrecognised actions.
    pub max_error_steps: Option<usize>,
    pub reward_policy: RewardPolicy,
}

/// The outcome of one adapter step, as seen by the episode state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepResult {
    /// The agent's text carried no parsable action; the simulator was not called.
    Malformed,
    /// The simulator applied the action.
    Applied {
        reward: f64,
        done: bool,
        /// The simulator reported that no known action matched the input.
        unrecognized: bool,
    },
    /// The simulator refused the action outright.
    Rejected,
}

/// One task attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeState {
    history: Vec<ChatMessage>,
    steps: usize,
    #[serde(default)]
    bad_steps: usize,
    #[serde(default)]
    error_steps: usize,
    reward: Option<f64>,
    finished: bool,
    success: bool,
    terminate_reason: Option<TerminateReason>,
}

impl EpisodeState {
    /// A fresh state with empty history and zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh state seeded with an initial conversation.
    pub fn with_history(history: Vec<ChatMessage>) -> Self {
        Self {
            history,
            ..Self::default()
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn bad_steps(&self) -> usize {
        self.bad_steps
    }

    pub fn error_steps(&self) -> usize {
        self.error_steps
    }

    pub fn reward(&self) -> Option<f64> {
        self.reward
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn terminate_reason(&self) -> Option<TerminateReason> {
        self.terminate_reason
    }

    /// Append a turn. Ignored once the episode has finished.
    pub fn record_turn(&mut self, role: Role, content: impl Into<String>) {
        if self.finished {
            debug!("ignoring turn recorded after episode finished");
            return;
        }
        self.history.push(ChatMessage::new(role, content));
    }

    /// Count one agent-environment exchange and apply the budget.
    ///
    /// A simulator `done` always wins over a ceiling reached on the same step.
    /// Among ceilings, the step/bad-step ceiling wins over the error-step one.
    pub fn advance(&mut self, result: StepResult, budget: &Budget) {
        if self.finished {
            debug!("ignoring step result after episode finished");
            return;
        }

        self.steps += 1;
        let observed = match result {
            StepResult::Malformed => {
                self.bad_steps += 1;
                Some(0.0)
            }
            StepResult::Applied {
                reward,
                unrecognized,
                ..
            } => {
                if unrecognized {
                    self.error_steps += 1;
                } else {
                    self.error_steps = 0;
                }
                Some(reward)
            }
            StepResult::Rejected => None,
        };
        if let Some(reward) = observed {
            self.reward = Some(budget.reward_policy.fold(self.reward, reward));
        }

        let done = matches!(result, StepResult::Applied { done: true, .. });
        let over_steps = self.steps >= budget.max_steps
            || budget.max_bad_steps.is_some_and(|max| self.bad_steps >= max);
        let over_errors = budget
            .max_error_steps
            .is_some_and(|max| self.error_steps >= max);

        let reason = if done {
            Some(TerminateReason::Success)
        } else if over_steps {
            Some(TerminateReason::MaxSteps)
        } else if over_errors {
            Some(TerminateReason::MaxErrorSteps)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.finish(reason);
        }
    }

    /// Mark the episode as ended. Only the first call has any effect.
    pub fn finish(&mut self, reason: TerminateReason) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.success = reason == TerminateReason::Success;
        self.terminate_reason = Some(reason);
    }
}
