//! The run controller: load the shard's tasks, skip the ones that already
//! have a record, evaluate the rest one at a time and report metrics.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use super::interaction::run_episode;
use crate::agent::Agent;
use crate::config::{EnvKind, EvalConfig};
use crate::env::{
    AlfWorldEnv, AnyEnv, EnvContext, HouseholdSimulator, SciWorldEnv, ScienceSimulator,
};
use crate::episode::{EpisodeState, EpisodeStore};
use crate::model::prompt::PromptAssets;
use crate::task::{self, Partition, Split, StepLimits, Task, WorkflowIndex};

/// Number of tasks (counted from the start of the shard) a debug run visits.
pub const DEBUG_TASK_LIMIT: usize = 5;

/// `outputs/<seen|unseen|train>/<model>/<experiment>/<metaplan type>`.
pub fn default_output_dir(
    config: &EvalConfig,
    split: Split,
    exp_name: &str,
    metaplan_type: &str,
) -> PathBuf {
    PathBuf::from("outputs")
        .join(split.output_label())
        .join(config.agent.short_model_name())
        .join(exp_name)
        .join(metaplan_type)
}

// ---------------------------------------------------------------------------
// Simulator handle
// ---------------------------------------------------------------------------

/// The simulator session for a run, owned by the caller for the run's
/// whole duration and lent to one adapter at a time.
pub enum Simulator<H, S> {
    Household(H),
    Science(S),
}

impl<H: HouseholdSimulator, S: ScienceSimulator> Simulator<H, S> {
    pub fn kind(&self) -> EnvKind {
        match self {
            Self::Household(_) => EnvKind::Alfworld,
            Self::Science(_) => EnvKind::Sciworld,
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        match self {
            Self::Household(sim) => sim.close().await,
            Self::Science(sim) => sim.close().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Aggregate outcome over a set of episode records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetrics {
    pub total: usize,
    pub successes: usize,
    pub success_rate: f64,
    /// Sum of the recorded rewards divided by `total`; `None` when no record
    /// carries a reward.
    pub average_reward: Option<f64>,
}

impl RunMetrics {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a EpisodeState>) -> Self {
        let mut total = 0;
        let mut successes = 0;
        let mut reward_sum = 0.0;
        let mut rewarded = 0;
        for state in records {
            total += 1;
            if state.success() {
                successes += 1;
            }
            if let Some(reward) = state.reward() {
                reward_sum += reward;
                rewarded += 1;
            }
        }

        let success_rate = if total == 0 {
            0.0
        } else {
            successes as f64 / total as f64
        };
        let average_reward = (rewarded > 0).then(|| reward_sum / total as f64);
        Self {
            total,
            successes,
            success_rate,
            average_reward,
        }
    }

    pub fn log(&self) {
        if let Some(avg) = self.average_reward {
            info!(average_reward = format!("{avg:.4}"), "Average reward");
        }
        info!(
            success_rate = format!("{:.4}", self.success_rate),
            successes = self.successes,
            total = self.total,
            "Success rate"
        );
    }
}

/// Recompute metrics from the records in an output directory.
pub fn summarize(dir: &Path) -> Result<RunMetrics> {
    if !dir.is_dir() {
        anyhow::bail!("output directory {} does not exist", dir.display());
    }
    let records = EpisodeStore::open(dir)?.completed()?;
    Ok(RunMetrics::from_records(records.values()))
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Per-invocation settings that do not belong in the experiment file.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub split: Split,
    pub partition: Partition,
    /// Re-run tasks that already have a record.
    pub override_existing: bool,
    /// Visit only the first [`DEBUG_TASK_LIMIT`] tasks.
    pub debug: bool,
}

/// What a run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Tasks evaluated by this invocation.
    pub ran: usize,
    /// Tasks skipped because a record already existed.
    pub skipped: usize,
    /// Tasks whose episode could not be started; they have no record.
    pub failed: usize,
    /// Metrics over every record in the output directory.
    pub metrics: RunMetrics,
}

/// Evaluates a shard of tasks and persists one record per task.
pub struct EvalRunner {
    config: EvalConfig,
    options: RunOptions,
    prompts: PromptAssets,
    hints: WorkflowIndex,
    limits: StepLimits,
    store: EpisodeStore,
}

impl EvalRunner {
    /// Load prompt assets, workflow hints and (for science runs) step limits.
    pub fn new(config: EvalConfig, options: RunOptions, store: EpisodeStore) -> Result<Self> {
        let kind = config.env.env_class;
        let prompts = match &config.env.prompt_path {
            Some(path) => PromptAssets::load_from_file(path)?,
            None => PromptAssets::builtin(kind),
        };
        let hints = match &config.task.workflow_path {
            Some(path) => WorkflowIndex::load_from_file(path)?,
            None => WorkflowIndex::new(),
        };
        if hints.is_empty() {
            info!("No workflow hints loaded; tasks run without hints");
        } else {
            info!(hints = hints.len(), "Workflow hints ready");
        }
        let limits = match kind {
            EnvKind::Sciworld => {
                let path = config.task.data_path.join("max_steps.json");
                if path.exists() {
                    StepLimits::load_from_file(&path, config.env.default_max_steps)?
                } else {
                    warn!(path = %path.display(), "No step-limit table; using the default for every task");
                    StepLimits::new(Default::default(), config.env.default_max_steps)
                }
            }
            EnvKind::Alfworld => StepLimits::new(Default::default(), config.env.max_steps),
        };

        info!(
            config = %serde_json::to_string(&config).context("Failed to serialize config")?,
            "Experiment config"
        );
        Ok(Self {
            config,
            options,
            prompts,
            hints,
            limits,
            store,
        })
    }

    pub fn store(&self) -> &EpisodeStore {
        &self.store
    }

    /// Load this shard's tasks and evaluate them.
    pub async fn run<H, S, A>(&self, sim: &mut Simulator<H, S>, agent: &A) -> Result<RunReport>
    where
        H: HouseholdSimulator,
        S: ScienceSimulator,
        A: Agent,
    {
        let tasks = task::load_tasks(
            self.config.env.env_class,
            &self.config.task,
            self.options.split,
            self.options.partition,
            &self.hints,
        )?;
        self.run_tasks(&tasks, sim, agent).await
    }

    /// [`run`](Self::run), then close the simulator whether or not the run
    /// succeeded.
    pub async fn run_and_close<H, S, A>(
        &self,
        sim: &mut Simulator<H, S>,
        agent: &A,
    ) -> Result<RunReport>
    where
        H: HouseholdSimulator,
        S: ScienceSimulator,
        A: Agent,
    {
        let outcome = self.run(sim, agent).await;
        if let Err(e) = sim.close().await {
            warn!(error = %e, "Failed to close simulator");
        }
        outcome
    }

    /// Evaluate `tasks`, skipping those with an existing record unless
    /// overriding.
    pub async fn run_tasks<H, S, A>(
        &self,
        tasks: &[Task],
        sim: &mut Simulator<H, S>,
        agent: &A,
    ) -> Result<RunReport>
    where
        H: HouseholdSimulator,
        S: ScienceSimulator,
        A: Agent,
    {
        if let Some(task) = tasks.iter().find(|t| t.kind() != sim.kind()) {
            anyhow::bail!(
                "task {} needs a {} simulator, got {}",
                task.task_id(),
                task.kind().as_str(),
                sim.kind().as_str()
            );
        }

        let mut records: BTreeMap<String, EpisodeState> = if self.options.override_existing {
            BTreeMap::new()
        } else {
            self.store.completed()?
        };
        if !records.is_empty() {
            info!(done = records.len(), "Existing output found");
        }

        let skipped = tasks
            .iter()
            .filter(|t| records.contains_key(t.task_id()))
            .count();
        if skipped == tasks.len() {
            let metrics = RunMetrics::from_records(records.values());
            metrics.log();
            info!("All tasks done. Exiting.");
            return Ok(RunReport {
                ran: 0,
                skipped,
                failed: 0,
                metrics,
            });
        }

        info!(
            total = tasks.len(),
            todo = tasks.len() - skipped,
            "Running interactive loop"
        );
        let mut ran = 0;
        let mut failed = 0;
        for (i, task) in tasks.iter().enumerate() {
            if self.options.debug && i == DEBUG_TASK_LIMIT {
                break;
            }
            if records.contains_key(task.task_id()) {
                continue;
            }

            let state = match self.run_task(task, sim, agent).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(
                        task_id = task.task_id(),
                        error = format!("{e:#}"),
                        "Task could not start; leaving it without a record"
                    );
                    failed += 1;
                    continue;
                }
            };
            self.store.save(task.task_id(), &state)?;
            records.insert(task.task_id().to_string(), state);
            ran += 1;
        }

        info!(ran, failed, output = %self.store.dir().display(), "All tasks done");
        let metrics = RunMetrics::from_records(records.values());
        metrics.log();
        Ok(RunReport {
            ran,
            skipped,
            failed,
            metrics,
        })
    }

    async fn run_task<H, S, A>(
        &self,
        task: &Task,
        sim: &mut Simulator<H, S>,
        agent: &A,
    ) -> Result<EpisodeState>
    where
        H: HouseholdSimulator,
        S: ScienceSimulator,
        A: Agent,
    {
        let ctx = EnvContext {
            config: &self.config.env,
            incorporation: self.config.incorporation,
            prompts: &self.prompts,
            hints: &self.hints,
        };
        info!(
            task_id = task.task_id(),
            env = task.kind().as_str(),
            workflow_by_id = task.workflow().is_some(),
            "Starting task"
        );

        let env: AnyEnv<'_, H, S> = match (task, sim) {
            (Task::AlfWorld(t), Simulator::Household(h)) => {
                AnyEnv::AlfWorld(AlfWorldEnv::new(t, h, ctx))
            }
            (Task::SciWorld(t), Simulator::Science(s)) => {
                AnyEnv::SciWorld(SciWorldEnv::new(t, s, ctx, &self.limits))
            }
            (task, sim) => anyhow::bail!(
                "task {} needs a {} simulator, got {}",
                task.task_id(),
                task.kind().as_str(),
                sim.kind().as_str()
            ),
        };
        run_episode(env, agent, self.config.incorporation, task.task_id()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ScriptedAgent;
    use crate::env::alfworld::MockGame;
    use crate::env::{MockAlfWorld, MockSciWorld};
    use crate::episode::TerminateReason;
    use crate::model::api::OracleError;
    use crate::task::AlfWorldTask;

    type MockSim = Simulator<MockAlfWorld, MockSciWorld>;

    fn household_config(max_steps: usize) -> EvalConfig {
        let mut config = EvalConfig::default();
        config.env.max_steps = max_steps;
        config
    }

    fn tasks(n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| Task::AlfWorld(AlfWorldTask::new(i, None)))
            .collect()
    }

    fn finished(reason: TerminateReason, reward: f64) -> EpisodeState {
        let mut state = EpisodeState::new();
        state.advance(
            crate::episode::StepResult::Applied {
                reward,
                done: false,
                unrecognized: false,
            },
            &crate::episode::Budget {
                max_steps: 100,
                max_bad_steps: None,
                max_error_steps: None,
                reward_policy: crate::episode::RewardPolicy::Latest,
            },
        );
        state.finish(reason);
        state
    }

    #[tokio::test]
    async fn test_resume_skips_tasks_with_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::open(dir.path()).unwrap();
        for id in ["0", "1", "2"] {
            store.save(id, &finished(TerminateReason::Success, 1.0)).unwrap();
        }
        let before: Vec<String> = ["0", "1", "2"]
            .iter()
            .map(|id| std::fs::read_to_string(store.record_path(id)).unwrap())
            .collect();

        let runner =
            EvalRunner::new(household_config(2), RunOptions::default(), store).unwrap();
        let agent = ScriptedAgent::new(["no action", "no action", "no action", "no action"]);
        let mut sim: MockSim = Simulator::Household(MockAlfWorld::new());
        let report = runner.run_tasks(&tasks(5), &mut sim, &agent).await.unwrap();

        assert_eq!(report.ran, 2);
        assert_eq!(report.skipped, 3);
        assert_eq!(agent.calls().len(), 4);

        let records = runner.store().completed().unwrap();
        let ids: Vec<&str> = records.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
        for (id, text) in ["0", "1", "2"].iter().zip(&before) {
            assert_eq!(&std::fs::read_to_string(runner.store().record_path(id)).unwrap(), text);
        }
        assert_eq!(
            records["3"].terminate_reason(),
            Some(TerminateReason::MaxSteps)
        );

        assert_eq!(report.metrics.total, 5);
        assert_eq!(report.metrics.successes, 3);
        assert!((report.metrics.success_rate - 0.6).abs() < 1e-9);
        assert_eq!(report.metrics.average_reward, Some(0.6));
    }

    #[tokio::test]
    async fn test_all_done_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::open(dir.path()).unwrap();
        for id in ["0", "1"] {
            store.save(id, &finished(TerminateReason::MaxSteps, 0.0)).unwrap();
        }
        let runner =
            EvalRunner::new(household_config(2), RunOptions::default(), store).unwrap();
        let agent = ScriptedAgent::new(Vec::<String>::new());
        let mut sim: MockSim = Simulator::Household(MockAlfWorld::new());

        let report = runner.run_tasks(&tasks(2), &mut sim, &agent).await.unwrap();
        assert_eq!(report.ran, 0);
        assert!(agent.calls().is_empty());
        assert_eq!(report.metrics.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_override_reruns_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::open(dir.path()).unwrap();
        store.save("0", &finished(TerminateReason::Success, 1.0)).unwrap();
        let options = RunOptions {
            override_existing: true,
            ..RunOptions::default()
        };
        let runner = EvalRunner::new(household_config(1), options, store).unwrap();
        let agent = ScriptedAgent::new(["no action"]);
        let mut sim: MockSim = Simulator::Household(MockAlfWorld::new());

        let report = runner.run_tasks(&tasks(1), &mut sim, &agent).await.unwrap();
        assert_eq!(report.ran, 1);
        let record = runner.store().load("0").unwrap();
        assert!(!record.success());
    }

    #[tokio::test]
    async fn test_debug_run_visits_first_five_tasks_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::open(dir.path()).unwrap();
        store.save("1", &finished(TerminateReason::Success, 1.0)).unwrap();
        let options = RunOptions {
            debug: true,
            ..RunOptions::default()
        };
        let runner = EvalRunner::new(household_config(1), options, store).unwrap();
        let agent = ScriptedAgent::new(vec!["no action"; 10]);
        let mut sim: MockSim = Simulator::Household(MockAlfWorld::new());

        let report = runner.run_tasks(&tasks(8), &mut sim, &agent).await.unwrap();
        assert_eq!(report.ran, 4);
        assert!(runner.store().load("5").is_err());
    }

    #[tokio::test]
    async fn test_oracle_failure_is_recorded_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::open(dir.path()).unwrap();
        let runner =
            EvalRunner::new(household_config(1), RunOptions::default(), store).unwrap();
        let agent = ScriptedAgent::default();
        agent.push(Err(OracleError::RetriesExhausted {
            attempts: 9,
            last: "timeout".into(),
        }));
        agent.push(Ok("no action".into()));
        let mut sim: MockSim = Simulator::Household(MockAlfWorld::new());

        let report = runner.run_tasks(&tasks(2), &mut sim, &agent).await.unwrap();
        assert_eq!(report.ran, 2);
        let first = runner.store().load("0").unwrap();
        assert_eq!(first.terminate_reason(), Some(TerminateReason::InputTooLong));
        assert_eq!(first.reward(), None);
        assert_eq!(
            runner.store().load("1").unwrap().terminate_reason(),
            Some(TerminateReason::MaxSteps)
        );
    }

    #[tokio::test]
    async fn test_mismatched_simulator_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::open(dir.path()).unwrap();
        let runner =
            EvalRunner::new(household_config(1), RunOptions::default(), store).unwrap();
        let agent = ScriptedAgent::default();
        let mut sim: MockSim = Simulator::Science(MockSciWorld::new());

        let err = runner.run_tasks(&tasks(1), &mut sim, &agent).await.unwrap_err();
        assert!(err.to_string().contains("alfworld"));
        assert!(runner.store().completed().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unloadable_game_is_skipped_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::open(dir.path()).unwrap();
        let runner =
            EvalRunner::new(household_config(1), RunOptions::default(), store).unwrap();
        let good = MockAlfWorld::new().games()[0].clone();
        let bad = MockGame::new(
            "json_2.1.1/valid_unseen/juggle_obj-Ball-None-Floor-1/trial_T1/game.tw-pddl",
            "You are in a room.\n\nYour task is to: juggle the ball.",
        );
        let mut sim: MockSim = Simulator::Household(MockAlfWorld::with_games(vec![bad, good]));
        let agent = ScriptedAgent::new(["no action"]);

        let report = runner.run_tasks(&tasks(2), &mut sim, &agent).await.unwrap();
        assert_eq!(report.ran, 1);
        assert_eq!(report.failed, 1);
        assert!(runner.store().load("0").is_err());
        assert_eq!(
            runner.store().load("1").unwrap().terminate_reason(),
            Some(TerminateReason::MaxSteps)
        );
        assert_eq!(report.metrics.total, 1);
    }

    fn debug_options() -> RunOptions {
        RunOptions {
            debug: true,
            ..RunOptions::default()
        }
    }

    fn is_closed(sim: &MockSim) -> bool {
        match sim {
            Simulator::Household(h) => h.is_closed(),
            Simulator::Science(s) => s.is_closed(),
        }
    }

    #[tokio::test]
    async fn test_run_and_close_closes_simulator_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::open(dir.path()).unwrap();
        let runner = EvalRunner::new(household_config(1), debug_options(), store).unwrap();
        let agent = ScriptedAgent::new(vec!["no action"; DEBUG_TASK_LIMIT]);
        let mut sim: MockSim = Simulator::Household(MockAlfWorld::new());

        let report = runner.run_and_close(&mut sim, &agent).await.unwrap();
        assert_eq!(report.ran, DEBUG_TASK_LIMIT);
        assert!(is_closed(&sim));
    }

    #[tokio::test]
    async fn test_run_and_close_closes_simulator_after_failed_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::open(dir.path()).unwrap();
        let runner = EvalRunner::new(household_config(1), debug_options(), store).unwrap();
        let agent = ScriptedAgent::default();
        let mut sim: MockSim = Simulator::Science(MockSciWorld::new());

        assert!(runner.run_and_close(&mut sim, &agent).await.is_err());
        assert!(is_closed(&sim));
        assert!(agent.calls().is_empty());
    }

    #[test]
    fn test_metrics_average_over_all_records() {
        let records = vec![
            finished(TerminateReason::Success, 1.0),
            finished(TerminateReason::MaxSteps, 0.5),
            EpisodeState::new(),
            EpisodeState::new(),
        ];
        let metrics = RunMetrics::from_records(&records);
        assert_eq!(metrics.total, 4);
        assert_eq!(metrics.successes, 1);
        assert_eq!(metrics.success_rate, 0.25);
        assert_eq!(metrics.average_reward, Some(0.375));

        assert_eq!(RunMetrics::from_records(&[]).average_reward, None);
    }

    #[test]
    fn test_summarize_reads_an_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::open(dir.path()).unwrap();
        store.save("7", &finished(TerminateReason::Success, 1.0)).unwrap();
        std::fs::write(dir.path().join("log.txt"), "not a record").unwrap();

        let metrics = summarize(dir.path()).unwrap();
        assert_eq!(metrics.total, 1);
        assert_eq!(metrics.success_rate, 1.0);
        assert!(summarize(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_default_output_dir_layout() {
        let mut config = EvalConfig::default();
        config.agent.model_name = "meta-llama/Llama-3.1-8B-Instruct".into();
        let dir = default_output_dir(&config, Split::Dev, "alfworld_query", "gpt-4o");
        assert_eq!(
            dir,
            PathBuf::from("outputs/seen/Llama-3.1-8B-Instruct/alfworld_query/gpt-4o")
        );
    }
}
