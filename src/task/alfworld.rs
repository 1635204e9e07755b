//! ALFWorld household tasks.
//!
//! ALFWorld games are addressed by their position in a split. The task type
//! is not known until the game is loaded: it is encoded in the directory
//! names of the game file and selects the in-context examples.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{Partition, Split, WorkflowIndex};

/// The six ALFWorld task families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    PickAndPlace,
    PickCleanThenPlace,
    PickHeatThenPlace,
    PickCoolThenPlace,
    LookAtObj,
    PickTwoObj,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        Self::PickAndPlace,
        Self::PickCleanThenPlace,
        Self::PickHeatThenPlace,
        Self::PickCoolThenPlace,
        Self::LookAtObj,
        Self::PickTwoObj,
    ];

    /// Game directory prefix for this family.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::PickAndPlace => "pick_and_place",
            Self::PickCleanThenPlace => "pick_clean_then_place",
            Self::PickHeatThenPlace => "pick_heat_then_place",
            Self::PickCoolThenPlace => "pick_cool_then_place",
            Self::LookAtObj => "look_at_obj",
            Self::PickTwoObj => "pick_two_obj",
        }
    }

    /// Key of the in-context examples for this family.
    pub fn icl_key(&self) -> &'static str {
        match self {
            Self::PickAndPlace => "put",
            Self::PickCleanThenPlace => "clean",
            Self::PickHeatThenPlace => "heat",
            Self::PickCoolThenPlace => "cool",
            Self::LookAtObj => "examine",
            Self::PickTwoObj => "puttwo",
        }
    }

    /// Derive the family from a game file path such as
    /// `.../pick_heat_then_place_in_recep-Egg-None-Fridge-1/trial_T2019.../game.tw-pddl`.
    pub fn from_gamefile(gamefile: &str) -> Result<Self> {
        let parts: Vec<&str> = gamefile.split('/').collect();
        if parts.len() < 3 {
            anyhow::bail!("game file path too short to carry a task type: {gamefile}");
        }
        let name = parts[parts.len() - 3..parts.len() - 1].join("/");
        Self::ALL
            .into_iter()
            .find(|t| name.starts_with(t.prefix()))
            .ok_or_else(|| anyhow::anyhow!("task type not found for {name}"))
    }
}

/// Number of games in each split.
pub fn split_size(split: Split) -> usize {
    match split {
        Split::Train => 3553,
        Split::Dev => 140,
        Split::Test => 134,
    }
}

/// One ALFWorld game.
#[derive(Debug, Clone, PartialEq)]
pub struct AlfWorldTask {
    pub task_id: String,
    /// Position of the game in its split.
    pub game_index: usize,
    /// Hint resolved by task id at load time.
    pub workflow: Option<String>,
}

impl AlfWorldTask {
    pub fn new(game_index: usize, workflow: Option<String>) -> Self {
        Self {
            task_id: game_index.to_string(),
            game_index,
            workflow,
        }
    }
}

/// The games of `split` that fall in this shard.
pub fn load_tasks(
    split: Split,
    partition: Partition,
    hints: &WorkflowIndex,
) -> Result<Vec<AlfWorldTask>> {
    let range = partition.balanced_range(split_size(split))?;
    Ok(range
        .map(|idx| AlfWorldTask::new(idx, hints.for_id(&idx.to_string()).map(str::to_string)))
        .collect())
}
