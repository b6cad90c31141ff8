//! Append-only JSON Lines log of completed tasks (`.moderails/history.jsonl`).
//!
//! One line per completed task. Appends are single whole-line writes; reads
//! parse the full file. The log is the part of a completion that gets
//! committed, so it is also how history travels between clones.

use crate::error::{RailsError, Result};
use crate::store::{tasks, Store};
use crate::task::Task;
use crate::types::{TaskStatus, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    /// Always `null` when written: the commit that carries this line does not
    /// exist yet. The store keeps the authoritative id.
    #[serde(default)]
    pub commit: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn for_task(task: &Task, files_changed: Vec<String>, completed_at: DateTime<Utc>) -> Self {
        Self {
            id: task.id.clone(),
            name: task.name.clone(),
            task_type: task.task_type,
            summary: task.summary.clone().unwrap_or_default(),
            files_changed,
            commit: None,
            completed_at,
        }
    }

    fn matches_any(&self, terms: &[String]) -> bool {
        let name = self.name.to_lowercase();
        let summary = self.summary.to_lowercase();
        terms
            .iter()
            .any(|t| name.contains(t.as_str()) || summary.contains(t.as_str()))
    }

    fn touches(&self, file: &str) -> bool {
        self.files_changed.iter().any(|f| f.contains(file))
    }
}

/// Where a history line lives, handed back to callers that need to finish a
/// completion by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRef {
    pub path: PathBuf,
    /// 1-based line number.
    pub line: usize,
}

impl std::fmt::Display for HistoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.line)
    }
}

/// Split a `a|b|c` query into lowercase, non-empty OR terms.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split('|')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `entry` unless a line for the same task id is already present,
    /// in which case the existing line is returned untouched.
    pub fn append(&self, entry: &HistoryEntry) -> Result<HistoryRef> {
        let existing = self.indexed()?;
        if let Some((line, _)) = existing.iter().find(|(_, e)| e.id == entry.id) {
            tracing::debug!(id = %entry.id, line, "history entry already present");
            return Ok(self.at(*line));
        }

        let json = serde_json::to_string(entry)?;
        crate::io::append_line(&self.path, &json)
            .map_err(|e| RailsError::HistoryWriteFailed(format!("{}: {e}", self.path.display())))?;

        let line = self.line_count()?;
        tracing::info!(id = %entry.id, line, "history entry appended");
        Ok(self.at(line))
    }

    pub fn entries(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.indexed()?.into_iter().map(|(_, e)| e).collect())
    }

    pub fn find(&self, task_id: &str) -> Result<Option<(HistoryRef, HistoryEntry)>> {
        Ok(self
            .indexed()?
            .into_iter()
            .find(|(_, e)| e.id == task_id)
            .map(|(line, e)| (self.at(line), e)))
    }

    pub fn search_by_file(&self, file: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self.entries()?.into_iter().filter(|e| e.touches(file)).collect())
    }

    /// Case-insensitive match on name or summary; `|` separates OR terms.
    pub fn search_by_query(&self, query: &str) -> Result<Vec<HistoryEntry>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.matches_any(&terms))
            .collect())
    }

    /// Every file path touched across history, sorted and deduplicated.
    pub fn files(&self) -> Result<Vec<String>> {
        let mut files: Vec<String> = self
            .entries()?
            .into_iter()
            .flat_map(|e| e.files_changed)
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Import completed tasks that are in the log but missing from the store,
    /// e.g. after a fresh clone. Returns the number imported.
    pub fn sync_into(&self, store: &mut Store) -> Result<usize> {
        let entries = self.entries()?;
        let imported = store.write(|tx| {
            let mut count = 0;
            for entry in &entries {
                if tasks::get(tx, &entry.id)?.is_some() {
                    continue;
                }
                tasks::insert(tx, &imported_task(entry))?;
                count += 1;
            }
            Ok(count)
        })?;
        if imported > 0 {
            tracing::info!(imported, "synced tasks from history");
        }
        Ok(imported)
    }

    fn at(&self, line: usize) -> HistoryRef {
        HistoryRef {
            path: self.path.clone(),
            line,
        }
    }

    fn read(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn line_count(&self) -> Result<usize> {
        Ok(self.read()?.lines().count())
    }

    fn indexed(&self) -> Result<Vec<(usize, HistoryEntry)>> {
        let data = self.read()?;
        let mut out = Vec::new();
        for (idx, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) => out.push((idx + 1, entry)),
                Err(e) => tracing::warn!(line = idx + 1, error = %e, "skipping unreadable history line"),
            }
        }
        Ok(out)
    }
}

/// Whether history `content` (e.g. the log as committed) holds a line for
/// `task_id`.
pub fn records_task(content: &str, task_id: &str) -> bool {
    content
        .lines()
        .filter_map(|line| serde_json::from_str::<HistoryEntry>(line.trim()).ok())
        .any(|e| e.id == task_id)
}

fn imported_task(entry: &HistoryEntry) -> Task {
    let mut task = Task::new(entry.name.clone(), entry.task_type, TaskStatus::Completed);
    task.id = entry.id.clone();
    task.summary = (!entry.summary.is_empty()).then(|| entry.summary.clone());
    task.commit = entry.commit.clone();
    task.created_at = entry.completed_at;
    task.updated_at = entry.completed_at;
    task.completed_at = Some(entry.completed_at);
    task
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
