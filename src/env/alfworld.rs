//! ALFWorld text-based household environment.
//!
//! ALFWorld presents the agent with interactive household tasks (pick up
//! objects, clean items, heat food, etc.) described entirely in natural
//! language.
//!
//! This module provides:
//! - [`AlfWorldServer`], a [`HouseholdSimulator`] that talks to an ALFWorld
//!   bridge process over HTTP.
//! - [`MockAlfWorld`], a scripted simulator for tests and `--mock` runs.
//! - [`AlfWorldEnv`], the adapter that turns agent text into simulator
//!   actions and keeps the episode state.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::parser::ActionGrammar;
use super::traits::{Environment, HouseholdBatch, HouseholdReset, HouseholdSimulator};
use super::EnvContext;
use crate::episode::{Budget, EpisodeState, RewardPolicy, StepResult};
use crate::model::api::Role;
use crate::model::prompt::prompt_with_icl;
use crate::task::{AlfWorldTask, TaskType};

/// Observation shown when the agent's turn carries no usable action.
pub const PARSE_FAILURE_OBSERVATION: &str =
    "Observation: Error Input. Your input must contains 'Action: '";

const LOCATION_PREFIX: &str = "You arrive at loc ";

/// Drop the welcome banner: everything up to the first blank line. The
/// remaining paragraphs are joined with single newlines.
pub fn strip_banner(raw: &str) -> String {
    match raw.split_once("\n\n") {
        Some((_, rest)) => rest.split("\n\n").collect::<Vec<_>>().join("\n"),
        None => raw.to_string(),
    }
}

/// Drop the `You arrive at loc N. ` prefix some observations carry.
pub fn strip_location_prefix(observation: &str) -> &str {
    if observation.starts_with(LOCATION_PREFIX) {
        if let Some(idx) = observation.find(". ") {
            return &observation[idx + 2..];
        }
    }
    observation
}

fn goal_line(observation: &str) -> &str {
    observation
        .lines()
        .rev()
        .find(|line| line.starts_with("Your task is to"))
        .unwrap_or(observation)
}

// ---------------------------------------------------------------------------
// HTTP-backed ALFWorld simulator
// ---------------------------------------------------------------------------

/// An ALFWorld simulator reached over HTTP.
///
/// The bridge keeps one TextWorld batch environment of size 1 and exposes:
/// - `POST {base_url}/reset` -- body `{"game_index": N}`
/// - `POST {base_url}/step`  -- body `{"actions": ["..."]}`
/// - `POST {base_url}/close`
#[derive(Debug)]
pub struct AlfWorldServer {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ResetResponse {
    observation: Vec<String>,
    info: ResetInfo,
}

#[derive(Debug, Deserialize)]
struct ResetInfo {
    #[serde(rename = "extra.gamefile")]
    gamefile: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StepResponse {
    observation: Vec<String>,
    #[serde(default)]
    scores: Vec<f64>,
    dones: Vec<bool>,
    #[serde(default)]
    info: StepInfo,
}

#[derive(Debug, Default, Deserialize)]
struct StepInfo {
    #[serde(default)]
    won: Vec<bool>,
}

impl AlfWorldServer {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn post<T: DeserializeOwned>(&self, route: &str, body: serde_json::Value) -> Result<T> {
        self.http
            .post(format!("{}/{route}", self.base_url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to reach ALFWorld server on {route}"))?
            .error_for_status()
            .with_context(|| format!("ALFWorld server rejected {route}"))?
            .json()
            .await
            .with_context(|| format!("failed to parse ALFWorld {route} response"))
    }
}

impl HouseholdSimulator for AlfWorldServer {
    async fn reset(&mut self, game_index: usize) -> Result<HouseholdReset> {
        let resp: ResetResponse = self
            .post("reset", serde_json::json!({ "game_index": game_index }))
            .await?;
        let observation = resp
            .observation
            .into_iter()
            .next()
            .context("ALFWorld reset returned no observation")?;
        let gamefile = resp
            .info
            .gamefile
            .into_iter()
            .next()
            .context("ALFWorld reset returned no game file")?;
        Ok(HouseholdReset {
            observation,
            gamefile,
        })
    }

    async fn step(&mut self, actions: &[String]) -> Result<HouseholdBatch> {
        let resp: StepResponse = self
            .post("step", serde_json::json!({ "actions": actions }))
            .await?;
        Ok(HouseholdBatch {
            observations: resp.observation,
            scores: resp.scores,
            dones: resp.dones,
            won: resp.info.won,
        })
    }

    async fn close(&mut self) -> Result<()> {
        let _: serde_json::Value = self.post("close", serde_json::json!({})).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mock ALFWorld simulator for testing
// ---------------------------------------------------------------------------

/// A canned game: an opening observation and the action sequence that wins.
#[derive(Debug, Clone)]
pub struct MockGame {
    gamefile: String,
    observation: String,
    /// (expected action, observation) pairs; the last one wins the game.
    script: Vec<(String, String)>,
}

impl MockGame {
    pub fn new(gamefile: impl Into<String>, observation: impl Into<String>) -> Self {
        Self {
            gamefile: gamefile.into(),
            observation: observation.into(),
            script: Vec::new(),
        }
    }

    /// Append the next expected action and the observation it produces.
    pub fn then(mut self, action: impl Into<String>, observation: impl Into<String>) -> Self {
        self.script.push((action.into(), observation.into()));
        self
    }

    pub fn winning_actions(&self) -> impl Iterator<Item = &str> {
        self.script.iter().map(|(action, _)| action.as_str())
    }
}

/// A scripted mock of ALFWorld.
///
/// Game `i` of a split maps to `games[i % games.len()]`. An action that is
/// not the next scripted one yields `Nothing happens.`; playing the whole
/// script wins.
#[derive(Debug, Clone)]
pub struct MockAlfWorld {
    games: Vec<MockGame>,
    current: usize,
    cursor: usize,
    /// Every action received since construction, in order.
    actions: Vec<String>,
    closed: bool,
}

impl MockAlfWorld {
    /// A mock pre-loaded with games covering several task families.
    pub fn new() -> Self {
        Self::with_games(Self::default_games())
    }

    pub fn with_games(games: Vec<MockGame>) -> Self {
        Self {
            games,
            current: 0,
            cursor: 0,
            actions: Vec::new(),
            closed: false,
        }
    }

    pub fn games(&self) -> &[MockGame] {
        &self.games
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn default_games() -> Vec<MockGame> {
        const BANNER: &str = "-= Welcome to TextWorld, ALFRED! =-";
        vec![
            MockGame::new(
                "json_2.1.1/valid_unseen/pick_clean_then_place_in_recep-Apple-None-Fridge-1/trial_T20190906_000001/game.tw-pddl",
                format!("{BANNER}\n\nYou are in the middle of a room. Looking quickly around you, you see a cabinet 1, a countertop 1, a fridge 1, and a sinkbasin 1.\n\nYour task is to: put a clean apple in fridge."),
            )
            .then("go to countertop 1", "You arrive at loc 3. On the countertop 1, you see an apple 1, a bread 1, and a knife 1.")
            .then("take apple 1 from countertop 1", "You pick up the apple 1 from the countertop 1.")
            .then("go to sinkbasin 1", "On the sinkbasin 1, you see nothing.")
            .then("clean apple 1 with sinkbasin 1", "You clean the apple 1 using the sinkbasin 1.")
            .then("go to fridge 1", "The fridge 1 is closed.")
            .then("put apple 1 in/on fridge 1", "You put the apple 1 in/on the fridge 1."),
            MockGame::new(
                "json_2.1.1/valid_unseen/pick_heat_then_place_in_recep-Potato-None-CounterTop-2/trial_T20190907_000002/game.tw-pddl",
                format!("{BANNER}\n\nYou are in the middle of a room. Looking quickly around you, you see a countertop 1, a fridge 1, and a microwave 1.\n\nYour task is to: heat some potato and put it in countertop."),
            )
            .then("go to fridge 1", "The fridge 1 is closed.")
            .then("open fridge 1", "You open the fridge 1. The fridge 1 is open. In it, you see a potato 1.")
            .then("take potato 1 from fridge 1", "You pick up the potato 1 from the fridge 1.")
            .then("go to microwave 1", "The microwave 1 is closed.")
            .then("heat potato 1 with microwave 1", "You heat the potato 1 using the microwave 1.")
            .then("go to countertop 1", "On the countertop 1, you see nothing.")
            .then("put potato 1 in/on countertop 1", "You put the potato 1 in/on the countertop 1."),
            MockGame::new(
                "json_2.1.1/valid_unseen/look_at_obj_in_light-Book-None-DeskLamp-3/trial_T20190908_000003/game.tw-pddl",
                format!("{BANNER}\n\nYou are in the middle of a room. Looking quickly around you, you see a desk 1, a drawer 1, and a sidetable 1.\n\nYour task is to: examine the book with the desklamp."),
            )
            .then("go to desk 1", "You arrive at loc 7. On the desk 1, you see a book 1.")
            .then("take book 1 from desk 1", "You pick up the book 1 from the desk 1.")
            .then("go to sidetable 1", "On the sidetable 1, you see a desklamp 1.")
            .then("use desklamp 1", "You turn on the desklamp 1."),
        ]
    }
}

impl Default for MockAlfWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl HouseholdSimulator for MockAlfWorld {
    async fn reset(&mut self, game_index: usize) -> Result<HouseholdReset> {
        if self.games.is_empty() {
            anyhow::bail!("mock ALFWorld has no games");
        }
        self.current = game_index % self.games.len();
        self.cursor = 0;
        let game = &self.games[self.current];
        Ok(HouseholdReset {
            observation: game.observation.clone(),
            gamefile: game.gamefile.clone(),
        })
    }

    async fn step(&mut self, actions: &[String]) -> Result<HouseholdBatch> {
        let [action] = actions else {
            anyhow::bail!("mock ALFWorld expects exactly one action, got {}", actions.len());
        };
        self.actions.push(action.clone());

        let script = &self.games[self.current].script;
        let observation = match script.get(self.cursor) {
            Some((expected, observation)) if expected == action => {
                self.cursor += 1;
                observation.clone()
            }
            _ => "Nothing happens.".to_string(),
        };
        let won = self.cursor == script.len();

        Ok(HouseholdBatch {
            observations: vec![observation],
            scores: vec![if won { 1.0 } else { 0.0 }],
            dones: vec![won],
            won: vec![won],
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

/// Drives one ALFWorld game for one episode.
pub struct AlfWorldEnv<'a, S> {
    task: &'a AlfWorldTask,
    sim: &'a mut S,
    ctx: EnvContext<'a>,
    budget: Budget,
    workflow: Option<String>,
    task_type: Option<TaskType>,
    state: EpisodeState,
}

impl<'a, S: HouseholdSimulator> AlfWorldEnv<'a, S> {
    pub fn new(task: &'a AlfWorldTask, sim: &'a mut S, ctx: EnvContext<'a>) -> Self {
        let budget = Budget {
            max_steps: ctx.config.max_steps,
            max_bad_steps: Some(ctx.config.max_bad_steps),
            max_error_steps: None,
            reward_policy: RewardPolicy::Latest,
        };
        Self {
            task,
            sim,
            ctx,
            budget,
            workflow: task.workflow.clone(),
            task_type: None,
            state: EpisodeState::new(),
        }
    }

    /// Task family of the loaded game, known after `reset`.
    pub fn task_type(&self) -> Option<TaskType> {
        self.task_type
    }

    /// Send one action; returns (observation, won, done).
    async fn conduct(&mut self, action: &str) -> Result<(String, bool, bool)> {
        let batch = self.sim.step(&[action.to_string()]).await?;
        let observation = batch
            .observations
            .into_iter()
            .next()
            .context("simulator returned no observation")?;
        let done = batch
            .dones
            .first()
            .copied()
            .context("simulator returned no done flag")?;
        let won = batch.won.first().copied().unwrap_or(false);
        Ok((strip_location_prefix(&observation).to_string(), won, done))
    }
}

impl<'a, S: HouseholdSimulator> Environment for AlfWorldEnv<'a, S> {
    async fn reset(&mut self) -> Result<String> {
        let raw = self
            .sim
            .reset(self.task.game_index)
            .await
            .with_context(|| format!("failed to load ALFWorld game {}", self.task.game_index))?;
        let task_type = TaskType::from_gamefile(&raw.gamefile)?;
        let observation = strip_location_prefix(&strip_banner(&raw.observation)).to_string();

        if self.workflow.is_none() {
            let hints = self.ctx.hints;
            self.workflow = hints
                .for_task(&observation)
                .or_else(|| hints.for_task(goal_line(&observation)))
                .map(str::to_string);
        }

        let examples = self.ctx.prompts.examples_for(Some(task_type.icl_key()))?;
        let prompt = prompt_with_icl(
            &self.ctx.prompts.instruction,
            examples,
            &observation,
            self.ctx.config.icl_num,
            self.ctx.query_hint(self.workflow.as_deref()),
        );
        let initial = prompt.observation.clone();
        self.state = self.ctx.seed_state(prompt);
        self.task_type = Some(task_type);

        info!(
            task_id = %self.task.task_id,
            task_type = task_type.icl_key(),
            has_workflow = self.workflow.is_some(),
            "ALFWorld env reset"
        );
        Ok(initial)
    }

    async fn step(&mut self, agent_output: &str) -> String {
        if self.state.is_finished() {
            warn!(task_id = %self.task.task_id, "step called on a finished episode");
            return String::new();
        }
        self.state.record_turn(Role::Assistant, agent_output);

        let outcome = match ActionGrammar::Household.parse(agent_output) {
            Ok(action) => self.conduct(&action).await,
            Err(e) => Err(e.into()),
        };
        let (observation, result) = match outcome {
            Ok((raw, won, done)) => {
                let observation = self
                    .ctx
                    .with_observation_hint(format!("Observation: {raw}"), self.workflow.as_deref());
                let reward = if won { 1.0 } else { 0.0 };
                (
                    observation,
                    StepResult::Applied {
                        reward,
                        done,
                        unrecognized: false,
                    },
                )
            }
            Err(e) => {
                debug!(task_id = %self.task.task_id, error = %e, "Bad household step");
                (PARSE_FAILURE_OBSERVATION.to_string(), StepResult::Malformed)
            }
        };

        self.state.record_turn(Role::User, observation.clone());
        self.state.advance(result, &self.budget);
        debug!(
            task_id = %self.task.task_id,
            steps = self.state.steps(),
            bad_steps = self.state.bad_steps(),
            finished = self.state.is_finished(),
            "ALFWorld step"
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
