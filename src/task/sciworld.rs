//! ScienceWorld tasks.
//!
//! A task is a named sub-task plus a variation index. The data directory
//! holds three JSON tables:
//!
//! - `{train,dev,test}_indices.json` -- `[[task_name, variation], ...]`
//! - `taskname2id.json` -- numeric id of every sub-task, used in task ids
//! - `max_steps.json` -- step ceiling of every sub-task

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use super::{Partition, Split, WorkflowIndex};

/// One ScienceWorld scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct SciWorldTask {
    /// `<sub-task id>_<variation>`.
    pub task_id: String,
    pub sub_task_name: String,
    pub variation_idx: usize,
    pub workflow: Option<String>,
}

/// Per-sub-task step ceilings.
#[derive(Debug, Clone)]
pub struct StepLimits {
    limits: HashMap<String, usize>,
    default: usize,
}

impl StepLimits {
    pub fn new(limits: HashMap<String, usize>, default: usize) -> Self {
        Self { limits, default }
    }

    /// Load `max_steps.json`; sub-tasks missing from it get `default`.
    pub fn load_from_file(path: impl AsRef<Path>, default: usize) -> Result<Self> {
        Ok(Self::new(read_json(path.as_ref())?, default))
    }

    pub fn for_task(&self, sub_task_name: &str) -> usize {
        self.limits.get(sub_task_name).copied().unwrap_or(self.default)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

/// The scenarios of `split` that fall in this shard.
pub fn load_tasks(
    data_path: &Path,
    split: Split,
    partition: Partition,
    hints: &WorkflowIndex,
) -> Result<Vec<SciWorldTask>> {
    let indices: Vec<(String, usize)> =
        read_json(&data_path.join(format!("{}_indices.json", split.as_str())))?;
    let name_to_id: HashMap<String, serde_json::Value> =
        read_json(&data_path.join("taskname2id.json"))?;

    let range = partition.chunked_range(indices.len())?;
    indices[range]
        .iter()
        .map(|(name, variation)| {
            let id = match name_to_id.get(name) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => anyhow::bail!("sub-task '{name}' missing from taskname2id.json"),
            };
            let task_id = format!("{id}_{variation}");
            let workflow = hints.for_id(&task_id).map(str::to_string);
            Ok(SciWorldTask {
                task_id,
                sub_task_name: name.clone(),
                variation_idx: *variation,
                workflow,
            })
        })
        .collect()
}
