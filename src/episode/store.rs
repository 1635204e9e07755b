//! One JSON record per finished task, named `<task_id>.json`.
//!
//! A later run scans the directory to learn which tasks are already done and
//! skips them; resumption is per task, never mid-episode.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::state::EpisodeState;

/// A directory of persisted episode records.
#[derive(Debug, Clone)]
pub struct EpisodeStore {
    dir: PathBuf,
}

impl EpisodeStore {
    /// Open (creating if needed) the record directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }

    /// Write the record for `task_id`, replacing any previous one.
    pub fn save(&self, task_id: &str, state: &EpisodeState) -> Result<()> {
        let path = self.record_path(task_id);
        let json = serde_json::to_string_pretty(state)
            .context("Failed to serialize episode state")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write episode record to {}", path.display()))?;
        tracing::debug!(task_id, path = %path.display(), "Saved episode record");
        Ok(())
    }

    pub fn load(&self, task_id: &str) -> Result<EpisodeState> {
        read_record(&self.record_path(task_id))
    }

    /// Every record in the directory, keyed by task id.
    ///
    /// Files without a `.json` extension are ignored.
    pub fn completed(&self) -> Result<BTreeMap<String, EpisodeState>> {
        let mut records = BTreeMap::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(task_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            records.insert(task_id.to_string(), read_record(&path)?);
        }
        Ok(records)
    }
}

fn read_record(path: &Path) -> Result<EpisodeState> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read episode record {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse episode record {}", path.display()))
}
