//! Workflow hints produced offline, one JSON record per line.
//!
//! Each record is `{"id": <key>, "workflow": <text>}` or
//! `{"task": <task text>, "workflow": <text>}`. Hints are plain text and are
//! never parsed, only spliced into prompts.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct WorkflowRecord {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    task: Option<String>,
    workflow: String,
}

/// Workflow hints indexed by task id and by task text.
#[derive(Debug, Clone, Default)]
pub struct WorkflowIndex {
    by_id: HashMap<String, String>,
    by_task: HashMap<String, String>,
}

impl WorkflowIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a newline-delimited hint file. Blank lines are skipped.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow hints from {}", path.display()))?;

        let mut index = Self::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: WorkflowRecord = serde_json::from_str(line).with_context(|| {
                format!("Invalid workflow record at {}:{}", path.display(), line_no + 1)
            })?;
            if let Some(id) = record.id {
                let key = match id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                index.by_id.insert(key, record.workflow.clone());
            }
            if let Some(task) = record.task {
                index.by_task.insert(task, record.workflow);
            }
        }

        tracing::info!(
            path = %path.display(),
            by_id = index.by_id.len(),
            by_task = index.by_task.len(),
            "Loaded workflow hints"
        );
        Ok(index)
    }

    pub fn insert_for_id(&mut self, id: impl Into<String>, workflow: impl Into<String>) {
        self.by_id.insert(id.into(), workflow.into());
    }

    pub fn insert_for_task(&mut self, task: impl Into<String>, workflow: impl Into<String>) {
        self.by_task.insert(task.into(), workflow.into());
    }

    pub fn for_id(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    pub fn for_task(&self, task: &str) -> Option<&str> {
        self.by_task.get(task).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len() + self.by_task.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty() && self.by_task.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_id_and_task_keyed_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metaplan.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"id": "13_2", "workflow": "Step 1: teleport to kitchen"}"#,
                "\n\n",
                r#"{"id": 7, "workflow": "Step 1: look"}"#,
                "\n",
                r#"{"task": "Your task is to: cool some egg.", "workflow": "Step 1: find egg"}"#,
                "\n",
            ),
        )
        .unwrap();

        let index = WorkflowIndex::load_from_file(&path).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.for_id("13_2"), Some("Step 1: teleport to kitchen"));
        assert_eq!(index.for_id("7"), Some("Step 1: look"));
        assert_eq!(
            index.for_task("Your task is to: cool some egg."),
            Some("Step 1: find egg")
        );
        assert_eq!(index.for_id("8"), None);
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"id\": 1, \"workflow\": \"ok\"}\n{\"id\": 2}\n").unwrap();
        let err = WorkflowIndex::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains(":2"));
    }
}
