//! Evaluation tasks: static descriptions of what an episode should attempt.
//!
//! - [`alfworld`] -- household games addressed by game index.
//! - [`sciworld`] -- science sub-tasks addressed by name and variation, plus
//!   the per-sub-task step ceilings.
//! - [`workflow`] -- offline workflow hints indexed by task id or task text.
//!
//! Tasks are read-only once loaded. A run can be sharded across processes
//! with a [`Partition`].

pub mod alfworld;
pub mod sciworld;
pub mod workflow;

use std::ops::Range;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{EnvKind, TaskConfig};

pub use alfworld::{AlfWorldTask, TaskType};
pub use sciworld::{SciWorldTask, StepLimits};
pub use workflow::WorkflowIndex;

/// Evaluation split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    /// In-distribution evaluation ("seen").
    Dev,
    /// Out-of-distribution evaluation ("unseen").
    #[default]
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Dev => "dev",
            Self::Test => "test",
        }
    }

    /// Directory label used in the default output layout.
    pub fn output_label(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Dev => "seen",
            Self::Test => "unseen",
        }
    }
}

/// Which shard of the task list this process evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub part_num: usize,
    /// Required when `part_num > 1`.
    pub part_idx: Option<usize>,
}

impl Default for Partition {
    fn default() -> Self {
        Self {
            part_num: 1,
            part_idx: None,
        }
    }
}

impl Partition {
    fn shard_index(&self) -> Result<Option<usize>> {
        if self.part_num == 0 {
            anyhow::bail!("part_num must be at least 1");
        }
        if self.part_num == 1 {
            return Ok(None);
        }
        match self.part_idx {
            Some(idx) if idx < self.part_num => Ok(Some(idx)),
            Some(idx) => anyhow::bail!("part_idx {idx} out of range for {} parts", self.part_num),
            None => anyhow::bail!("part_idx is required when part_num > 1"),
        }
    }

    /// Household sharding: every part gets `n / part_num` items and the last
    /// part also takes the remainder.
    pub fn balanced_range(&self, n: usize) -> Result<Range<usize>> {
        let Some(idx) = self.shard_index()? else {
            return Ok(0..n);
        };
        let base = n / self.part_num;
        let start = base * idx;
        let len = if idx == self.part_num - 1 {
            base + n % self.part_num
        } else {
            base
        };
        Ok(start..start + len)
    }

    /// Science sharding: consecutive chunks of `n / part_num + 1` items.
    pub fn chunked_range(&self, n: usize) -> Result<Range<usize>> {
        let Some(idx) = self.shard_index()? else {
            return Ok(0..n);
        };
        let chunk = n / self.part_num + 1;
        let start = (chunk * idx).min(n);
        let end = (chunk * (idx + 1)).min(n);
        Ok(start..end)
    }
}

/// One evaluation instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    AlfWorld(AlfWorldTask),
    SciWorld(SciWorldTask),
}

impl Task {
    pub fn task_id(&self) -> &str {
        match self {
            Self::AlfWorld(t) => &t.task_id,
            Self::SciWorld(t) => &t.task_id,
        }
    }

    pub fn workflow(&self) -> Option<&str> {
        match self {
            Self::AlfWorld(t) => t.workflow.as_deref(),
            Self::SciWorld(t) => t.workflow.as_deref(),
        }
    }

    pub fn kind(&self) -> EnvKind {
        match self {
            Self::AlfWorld(_) => EnvKind::Alfworld,
            Self::SciWorld(_) => EnvKind::Sciworld,
        }
    }
}

/// Load the tasks of `kind` for one split and shard.
pub fn load_tasks(
    kind: EnvKind,
    config: &TaskConfig,
    split: Split,
    partition: Partition,
    hints: &WorkflowIndex,
) -> Result<Vec<Task>> {
    let tasks: Vec<Task> = match kind {
        EnvKind::Alfworld => alfworld::load_tasks(split, partition, hints)?
            .into_iter()
            .map(Task::AlfWorld)
            .collect(),
        EnvKind::Sciworld => sciworld::load_tasks(&config.data_path, split, partition, hints)?
            .into_iter()
            .map(Task::SciWorld)
            .collect(),
    };
    tracing::info!(
        env = kind.as_str(),
        split = split.as_str(),
        count = tasks.len(),
        "Loaded tasks"
    );
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(part_num: usize, part_idx: usize) -> Partition {
        Partition {
            part_num,
            part_idx: Some(part_idx),
        }
    }

    #[test]
    fn test_balanced_range_gives_remainder_to_last_part() {
        assert_eq!(Partition::default().balanced_range(134).unwrap(), 0..134);
        assert_eq!(part(4, 0).balanced_range(134).unwrap(), 0..33);
        assert_eq!(part(4, 2).balanced_range(134).unwrap(), 66..99);
        assert_eq!(part(4, 3).balanced_range(134).unwrap(), 99..134);
    }

    #[test]
    fn test_chunked_range_covers_everything_once() {
        let n = 10;
        let ranges: Vec<_> = (0..3).map(|i| part(3, i).chunked_range(n).unwrap()).collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn test_sharding_requires_valid_index() {
        let missing = Partition {
            part_num: 2,
            part_idx: None,
        };
        assert!(missing.balanced_range(10).is_err());
        assert!(part(2, 2).chunked_range(10).is_err());
    }

    #[test]
    fn test_split_labels() {
        assert_eq!(Split::Dev.output_label(), "seen");
        assert_eq!(Split::Test.output_label(), "unseen");
    }
}
