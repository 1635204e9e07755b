//! ScienceWorld environment.
//!
//! Episodes are scored by the simulator's raw task score, which the adapter
//! keeps as a running maximum. A run of consecutive unrecognised actions ends
//! the episode early.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::parser::ActionGrammar;
use super::traits::{
    Environment, ScienceInfo, ScienceReset, ScienceSimulator, ScienceStep, SimulatorError,
};
use super::EnvContext;
use crate::episode::{Budget, EpisodeState, RewardPolicy, StepResult};
use crate::model::api::Role;
use crate::model::prompt::prompt_with_icl;
use crate::task::{SciWorldTask, StepLimits};

/// Observation shown when the agent's turn carries no usable action.
pub const PARSE_FAILURE_OBSERVATION: &str =
    "Observation: Invalid format. The input must contains 'Action: '";

/// Observation shown when the simulator refuses an action.
pub const INVALID_ACTION_OBSERVATION: &str = "Observation: Invalid action!";

/// Substring of the simulator's reply to an action it cannot interpret.
pub const UNKNOWN_ACTION: &str = "No known action matches that input";

// ---------------------------------------------------------------------------
// HTTP-backed ScienceWorld simulator
// ---------------------------------------------------------------------------

/// A ScienceWorld simulator reached over HTTP.
///
/// Routes: `POST /load`, `POST /reset`, `POST /step`, `POST /close`. A step
/// the simulator refuses comes back as HTTP 422 with an `error` message.
#[derive(Debug)]
pub struct SciWorldServer {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ResetResponse {
    observation: String,
    info: ResetInfo,
}

#[derive(Debug, Deserialize)]
struct ResetInfo {
    #[serde(rename = "taskDesc")]
    task_desc: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl SciWorldServer {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn send(&self, route: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        self.http
            .post(format!("{}/{route}", self.base_url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to reach ScienceWorld server on {route}"))
    }

    async fn post<T: DeserializeOwned>(&self, route: &str, body: serde_json::Value) -> Result<T> {
        self.send(route, body)
            .await?
            .error_for_status()
            .with_context(|| format!("ScienceWorld server rejected {route}"))?
            .json()
            .await
            .with_context(|| format!("failed to parse ScienceWorld {route} response"))
    }
}

impl ScienceSimulator for SciWorldServer {
    async fn load(&mut self, task_name: &str, variation: usize, simplification: &str) -> Result<()> {
        let body = serde_json::json!({
            "task_name": task_name,
            "variation": variation,
            "simplification": simplification,
            "generate_gold_path": false,
        });
        let _: serde_json::Value = self.post("load", body).await?;
        Ok(())
    }

    async fn reset(&mut self) -> Result<ScienceReset> {
        let resp: ResetResponse = self.post("reset", serde_json::json!({})).await?;
        Ok(ScienceReset {
            observation: resp.observation,
            task_desc: resp.info.task_desc,
        })
    }

    async fn step(&mut self, action: &str) -> Result<ScienceStep, SimulatorError> {
        let resp = self
            .send("step", serde_json::json!({ "action": action }))
            .await?;
        if resp.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body: ErrorBody = resp
                .json()
                .await
                .context("failed to parse ScienceWorld error body")?;
            return Err(SimulatorError::InvalidAction(body.error));
        }
        let step: ScienceStep = resp
            .error_for_status()
            .context("ScienceWorld server rejected step")?
            .json()
            .await
            .context("failed to parse ScienceWorld step response")?;
        Ok(step)
    }

    async fn close(&mut self) -> Result<()> {
        let _: serde_json::Value = self.post("close", serde_json::json!({})).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mock ScienceWorld simulator for testing
// ---------------------------------------------------------------------------

/// A canned scenario: a task description and scored responses to actions.
#[derive(Debug, Clone)]
pub struct MockScenario {
    task_desc: String,
    /// action -> (observation, score, done)
    responses: HashMap<String, (String, f64, bool)>,
    /// Actions the mock refuses as invalid.
    invalid: Vec<String>,
}

impl MockScenario {
    pub fn new(task_desc: impl Into<String>) -> Self {
        Self {
            task_desc: task_desc.into(),
            responses: HashMap::new(),
            invalid: Vec::new(),
        }
    }

    pub fn respond(
        mut self,
        action: impl Into<String>,
        observation: impl Into<String>,
        score: f64,
        done: bool,
    ) -> Self {
        self.responses
            .insert(action.into(), (observation.into(), score, done));
        self
    }

    pub fn reject(mut self, action: impl Into<String>) -> Self {
        self.invalid.push(action.into());
        self
    }
}

/// A scripted mock of ScienceWorld keyed by sub-task name.
///
/// Sub-tasks without a scenario fall back to the first registered one.
/// Unscripted actions get the simulator's "no known action" reply.
#[derive(Debug, Clone)]
pub struct MockSciWorld {
    scenarios: Vec<(String, MockScenario)>,
    loaded: Option<usize>,
    /// Every (task name, variation) loaded, in order.
    loads: Vec<(String, usize)>,
    closed: bool,
}

impl MockSciWorld {
    pub fn new() -> Self {
        Self::with_scenarios(vec![(
            "find-living-thing".into(),
            MockScenario::new("Your task is to find a(n) living thing. First, focus on the thing. Then, move it to the purple box in the workshop.")
                .respond("teleport to greenhouse", "You teleport to the greenhouse.", 0.0, false)
                .respond("look around", "This room is called the greenhouse. In it, you see: a flower pot 1 (containing a peach seed).", 0.0, false)
                .respond("focus on peach seed", "You focus on the peach seed.", 50.0, false)
                .respond("pick up flower pot 1", "You move the flower pot 1 to the inventory.", 58.0, false)
                .respond("teleport to workshop", "You teleport to the workshop.", 58.0, false)
                .respond("move flower pot 1 to purple box", "You move the flower pot 1 to the purple box.", 100.0, true)
                .reject("focus on"),
        )])
    }

    pub fn with_scenarios(scenarios: Vec<(String, MockScenario)>) -> Self {
        Self {
            scenarios,
            loaded: None,
            loads: Vec::new(),
            closed: false,
        }
    }

    pub fn loads(&self) -> &[(String, usize)] {
        &self.loads
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn scenario(&self) -> Result<&MockScenario> {
        let idx = self.loaded.context("no scenario loaded")?;
        Ok(&self.scenarios[idx].1)
    }
}

impl Default for MockSciWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl ScienceSimulator for MockSciWorld {
    async fn load(&mut self, task_name: &str, variation: usize, _simplification: &str) -> Result<()> {
        if self.scenarios.is_empty() {
            anyhow::bail!("mock ScienceWorld has no scenarios");
        }
        let idx = self
            .scenarios
            .iter()
            .position(|(name, _)| name == task_name)
            .unwrap_or(0);
        self.loaded = Some(idx);
        self.loads.push((task_name.to_string(), variation));
        Ok(())
    }

    async fn reset(&mut self) -> Result<ScienceReset> {
        let scenario = self.scenario()?;
        Ok(ScienceReset {
            observation: "This room is called the hallway.".into(),
            task_desc: scenario.task_desc.clone(),
        })
    }

    async fn step(&mut self, action: &str) -> Result<ScienceStep, SimulatorError> {
        let scenario = self.scenario()?;
        if scenario.invalid.iter().any(|a| a == action) {
            return Err(SimulatorError::InvalidAction(action.to_string()));
        }
        let (observation, score, done) = scenario
            .responses
            .get(action)
            .cloned()
            .unwrap_or_else(|| (format!("{UNKNOWN_ACTION}."), 0.0, false));
        Ok(ScienceStep {
            observation,
            score,
            done,
            info: ScienceInfo { raw_score: score },
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Drives one ScienceWorld scenario for one episode.
pub struct SciWorldEnv<'a, S> {
    task: &'a SciWorldTask,
    sim: &'a mut S,
    ctx: EnvContext<'a>,
    budget: Budget,
    workflow: Option<String>,
    state: EpisodeState,
}

impl<'a, S: ScienceSimulator> SciWorldEnv<'a, S> {
    pub fn new(
        task: &'a SciWorldTask,
        sim: &'a mut S,
        ctx: EnvContext<'a>,
        limits: &StepLimits,
    ) -> Self {
        let budget = Budget {
            max_steps: limits.for_task(&task.sub_task_name),
            max_bad_steps: None,
            max_error_steps: Some(ctx.config.max_error_steps),
            reward_policy: RewardPolicy::Max,
        };
        Self {
            task,
            sim,
            ctx,
            budget,
            workflow: task.workflow.clone(),
            state: EpisodeState::new(),
        }
    }

    pub fn max_steps(&self) -> usize {
        self.budget.max_steps
    }
}

impl<'a, S: ScienceSimulator> Environment for SciWorldEnv<'a, S> {
    async fn reset(&mut self) -> Result<String> {
        self.sim
            .load(
                &self.task.sub_task_name,
                self.task.variation_idx,
                &self.ctx.config.simplification,
            )
            .await
            .with_context(|| format!("failed to load ScienceWorld task {}", self.task.task_id))?;
        let reset = self.sim.reset().await.context("failed to reset ScienceWorld")?;

        if self.workflow.is_none() {
            self.workflow = self.ctx.hints.for_task(&reset.task_desc).map(str::to_string);
        }

        let examples = self.ctx.prompts.examples_for(None)?;
        let prompt = prompt_with_icl(
            &self.ctx.prompts.instruction,
            examples,
            &reset.task_desc,
            self.ctx.config.icl_num,
            self.ctx.query_hint(self.workflow.as_deref()),
        );
        let initial = prompt.observation.clone();
        self.state = self.ctx.seed_state(prompt);

        info!(
            task_id = %self.task.task_id,
            sub_task = %self.task.sub_task_name,
            max_steps = self.budget.max_steps,
            has_workflow = self.workflow.is_some(),
            "ScienceWorld env reset"
        );
        Ok(initial)
    }

    async fn step(&mut self, agent_output: &str) -> String {
        if self.state.is_finished() {
            warn!(task_id = %self.task.task_id, "step called on a finished episode");
            return String::new();
        }
        self.state.record_turn(Role::Assistant, agent_output);

        let action = match ActionGrammar::Science.parse(agent_output) {
            Ok(action) => action,
            Err(e) => {
                debug!(task_id = %self.task.task_id, error = %e, "Unparsable science step");
                let observation = PARSE_FAILURE_OBSERVATION.to_string();
                self.state.record_turn(Role::User, observation.clone());
                self.state.advance(StepResult::Malformed, &self.budget);
                return observation;
            }
        };

        let (observation, result) = match self.sim.step(&action).await {
            Ok(step) => {
                let unrecognized = step.observation.contains(UNKNOWN_ACTION);
                (
                    format!("Observation: {}", step.observation),
                    StepResult::Applied {
                        reward: step.info.raw_score,
                        done: step.done,
                        unrecognized,
                    },
                )
            }
            Err(SimulatorError::InvalidAction(reason)) => {
                debug!(task_id = %self.task.task_id, %action, %reason, "Invalid science action");
                (INVALID_ACTION_OBSERVATION.to_string(), StepResult::Rejected)
            }
            Err(SimulatorError::Transport(e)) => {
                warn!(task_id = %self.task.task_id, %action, error = %e, "ScienceWorld step failed");
                (INVALID_ACTION_OBSERVATION.to_string(), StepResult::Rejected)
            }
        };
        let observation = self
            .ctx
            .with_observation_hint(observation, self.workflow.as_deref());

        self.state.record_turn(Role::User, observation.clone());
        self.state.advance(result, &self.budget);
        debug!(
            task_id = %self.task.task_id,
            steps = self.state.steps(),
            error_steps = self.state.error_steps(),
            reward = ?self.state.reward(),
            finished = self.state.is_finished(),
            "ScienceWorld step"
        );
        observation
    }

    fn state(&self) -> &EpisodeState {
        &self.state
    }

    fn workflow(&self) -> Option<&str> {
        self.workflow.as_deref()
    }

    fn into_state(self) -> EpisodeState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvConfig, EnvKind, IncorporationMode};
    use crate::episode::TerminateReason;
    use crate::model::prompt::{PromptAssets, WORKFLOW_INTRO};
    use crate::task::WorkflowIndex;

    struct Fixture {
        config: EnvConfig,
        prompts: PromptAssets,
        hints: WorkflowIndex,
        limits: StepLimits,
    }

    impl Fixture {
        fn new() -> Self {
            let mut limits = HashMap::new();
            limits.insert("find-living-thing".to_string(), 40);
            Self {
                config: EnvConfig::default(),
                prompts: PromptAssets::builtin(EnvKind::Sciworld),
                hints: WorkflowIndex::new(),
                limits: StepLimits::new(limits, 30),
            }
        }

        fn ctx(&self, incorporation: IncorporationMode) -> EnvContext<'_> {
            EnvContext {
                config: &self.config,
                incorporation,
                prompts: &self.prompts,
                hints: &self.hints,
            }
        }
    }

    fn task(workflow: Option<&str>) -> SciWorldTask {
        SciWorldTask {
            task_id: "4_1".into(),
            sub_task_name: "find-living-thing".into(),
            variation_idx: 1,
            workflow: workflow.map(str::to_string),
        }
    }

    fn act(action: &str) -> String {
        format!("Thought: next.\nAction: {action}")
    }

    #[tokio::test]
    async fn test_reset_loads_scenario_and_uses_step_limit() {
        let fx = Fixture::new();
        let mut sim = MockSciWorld::new();
        let task = task(None);
        {
            let mut env =
                SciWorldEnv::new(&task, &mut sim, fx.ctx(IncorporationMode::Query), &fx.limits);
            let initial = env.reset().await.unwrap();
            assert!(initial.ends_with("move it to the purple box in the workshop."));
            assert_eq!(env.max_steps(), 40);
            assert_eq!(env.state().history().len(), 1);
        }
        assert_eq!(sim.loads(), [("find-living-thing".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_reward_is_running_maximum() {
        let fx = Fixture::new();
        let mut sim = MockSciWorld::new();
        let task = task(None);
        let mut env =
            SciWorldEnv::new(&task, &mut sim, fx.ctx(IncorporationMode::Query), &fx.limits);
        env.reset().await.unwrap();

        let mut seen = Vec::new();
        for action in [
            "teleport to greenhouse",
            "focus on peach seed",
            "pick up flower pot 1",
            "look around",
            "dance",
        ] {
            env.step(&act(action)).await;
            seen.push(env.state().reward().unwrap());
        }
        env.step("no marker at all").await;
        seen.push(env.state().reward().unwrap());

        assert_eq!(seen, vec![0.0, 50.0, 58.0, 58.0, 58.0, 58.0]);
        assert!(seen.windows(2).all(|w| w[1] >= w[0]));
    }

    #[tokio::test]
    async fn test_completing_the_scenario_succeeds() {
        let fx = Fixture::new();
        let mut sim = MockSciWorld::new();
        let task = task(None);
        let mut env =
            SciWorldEnv::new(&task, &mut sim, fx.ctx(IncorporationMode::Query), &fx.limits);
        env.reset().await.unwrap();
        for action in [
            "teleport to greenhouse",
            "focus on peach seed",
            "pick up flower pot 1",
            "teleport to workshop",
            "move flower pot 1 to purple box",
        ] {
            env.step(&act(action)).await;
        }

        let state = env.into_state();
        assert!(state.success());
        assert_eq!(state.terminate_reason(), Some(TerminateReason::Success));
        assert_eq!(state.reward(), Some(100.0));
        assert_eq!(state.steps(), 5);
    }

    #[tokio::test]
    async fn test_consecutive_unknown_actions_hit_error_ceiling() {
        let fx = Fixture::new();
        let mut sim = MockSciWorld::new();
        let task = task(None);
        let mut env =
            SciWorldEnv::new(&task, &mut sim, fx.ctx(IncorporationMode::Query), &fx.limits);
        env.reset().await.unwrap();

        for i in 0..9 {
            let observation = env.step(&act("fly to the moon")).await;
            assert!(observation.contains(UNKNOWN_ACTION));
            assert_eq!(env.state().error_steps(), i + 1);
            assert!(!env.state().is_finished());
        }
        env.step(&act("fly to the moon")).await;

        let state = env.state();
        assert!(state.is_finished());
        assert!(!state.success());
        assert_eq!(state.terminate_reason(), Some(TerminateReason::MaxErrorSteps));
        assert_eq!(state.steps(), 10);
    }

    #[tokio::test]
    async fn test_recognised_action_resets_error_counter() {
        let fx = Fixture::new();
        let mut sim = MockSciWorld::new();
        let task = task(None);
        let mut env =
            SciWorldEnv::new(&task, &mut sim, fx.ctx(IncorporationMode::Query), &fx.limits);
        env.reset().await.unwrap();

        for _ in 0..9 {
            env.step(&act("fly to the moon")).await;
        }
        env.step(&act("look around")).await;
        assert_eq!(env.state().error_steps(), 0);
        for _ in 0..9 {
            env.step(&act("fly to the moon")).await;
        }

        assert!(!env.state().is_finished());
        assert_eq!(env.state().error_steps(), 9);
    }

    #[tokio::test]
    async fn test_invalid_action_is_reported_and_counted_once() {
        let fx = Fixture::new();
        let mut sim = MockSciWorld::new();
        let task = task(None);
        let mut env =
            SciWorldEnv::new(&task, &mut sim, fx.ctx(IncorporationMode::Query), &fx.limits);
        env.reset().await.unwrap();
        env.step(&act("fly to the moon")).await;

        let observation = env.step(&act("focus on")).await;
        assert_eq!(observation, INVALID_ACTION_OBSERVATION);
        let state = env.state();
        assert_eq!(state.steps(), 2);
        assert_eq!(state.error_steps(), 1);
        assert!(!state.is_finished());
    }

    #[tokio::test]
    async fn test_parse_failure_counts_as_a_step() {
        let mut fx = Fixture::new();
        fx.limits = StepLimits::new(HashMap::new(), 2);
        let mut sim = MockSciWorld::new();
        let task = task(None);
        let mut env =
            SciWorldEnv::new(&task, &mut sim, fx.ctx(IncorporationMode::Query), &fx.limits);
        env.reset().await.unwrap();

        assert_eq!(env.step("Action:go").await, PARSE_FAILURE_OBSERVATION);
        assert!(!env.state().is_finished());
        env.step("nothing").await;

        let state = env.state();
        assert_eq!(state.terminate_reason(), Some(TerminateReason::MaxSteps));
        assert_eq!(state.reward(), Some(0.0));
    }

    #[tokio::test]
    async fn test_observation_mode_hint_follows_invalid_action_too() {
        let fx = Fixture::new();
        let mut sim = MockSciWorld::new();
        let task = task(Some("Step 1: go to the greenhouse"));
        let mut env =
            SciWorldEnv::new(&task, &mut sim, fx.ctx(IncorporationMode::Observation), &fx.limits);
        env.reset().await.unwrap();

        let observation = env.step(&act("focus on")).await;
        assert_eq!(
            observation,
            format!("{INVALID_ACTION_OBSERVATION}\n\n{WORKFLOW_INTRO}\nStep 1: go to the greenhouse")
        );
    }
}
