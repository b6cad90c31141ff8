use crate::error::{RailsError, Result};
use crate::paths::validate_plan_path;
use crate::types::{TaskStatus, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 6;
const MAX_NAME_LEN: usize = 255;

/// Short, human-typeable identifier shared by tasks and epics.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(ID_LEN)
        .map(|b| ID_ALPHABET[(*b as usize) % ID_ALPHABET.len()] as char)
        .collect()
}

pub fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RailsError::InvalidName("name must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(RailsError::InvalidName(format!(
            "name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Caller input for `Engine::create_task`.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub name: String,
    pub task_type: TaskType,
    /// `None` picks the configured default (normally `in-progress`).
    pub status: Option<TaskStatus>,
    pub epic_id: Option<String>,
    pub description: Option<String>,
    /// Skip plan-file creation.
    pub no_plan: bool,
    /// Skip context assembly in the result.
    pub no_context: bool,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub epic_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub commit: Option<String>,
    pub plan_file: Option<String>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.task_type.is_none()
            && self.status.is_none()
            && self.epic_id.is_none()
            && self.summary.is_none()
            && self.description.is_none()
            && self.commit.is_none()
            && self.plan_file.is_none()
    }

    /// The first field that may not change once a task is completed.
    fn frozen_field(&self, task: &Task) -> Option<&'static str> {
        if self.name.as_ref().is_some_and(|n| n.trim() != task.name) {
            return Some("name");
        }
        if self.task_type.is_some_and(|t| t != task.task_type) {
            return Some("type");
        }
        if self.status.is_some_and(|s| s != task.status) {
            return Some("status");
        }
        if self.epic_id.is_some() && self.epic_id != task.epic_id {
            return Some("epic");
        }
        if self.commit.is_some() && task.commit.is_some() && self.commit != task.commit {
            return Some("commit");
        }
        None
    }
}

impl Task {
    pub fn new(name: impl Into<String>, task_type: TaskType, status: TaskStatus) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            name: name.into().trim().to_string(),
            task_type,
            status,
            epic_id: None,
            summary: None,
            description: None,
            commit: None,
            plan_file: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Apply `update` in memory, enforcing the lifecycle rules that need no
    /// other rows: forward-only status, completed-task immutability, and
    /// "a commit id implies completed".
    pub fn apply_update(&mut self, update: &TaskUpdate) -> Result<()> {
        if self.is_completed() {
            if let Some(field) = update.frozen_field(self) {
                return Err(RailsError::TaskImmutable {
                    id: self.id.clone(),
                    field: field.to_string(),
                });
            }
        } else {
            if let Some(target) = update.status {
                self.status.check_update(target)?;
            }
            if update.commit.is_some() {
                return Err(RailsError::InvalidField {
                    field: "commit".to_string(),
                    reason: "a commit id can only be recorded on a completed task".to_string(),
                });
            }
        }

        if let Some(rel) = update.plan_file.as_deref().and_then(non_empty) {
            validate_plan_path(Path::new(&rel))?;
        }

        if let Some(name) = &update.name {
            validate_name(name)?;
            self.name = name.trim().to_string();
        }
        if let Some(t) = update.task_type {
            self.task_type = t;
        }
        if let Some(s) = update.status {
            self.status = s;
        }
        if let Some(epic) = &update.epic_id {
            self.epic_id = Some(epic.clone());
        }
        if let Some(summary) = &update.summary {
            self.summary = non_empty(summary);
        }
        if let Some(description) = &update.description {
            self.description = non_empty(description);
        }
        if let Some(commit) = &update.commit {
            self.commit = non_empty(commit);
        }
        if let Some(plan) = &update.plan_file {
            self.plan_file = non_empty(plan);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Conventional-commit message: `<type>: <name> - <summary>`.
    pub fn commit_message(&self) -> String {
        match self.summary.as_deref() {
            Some(summary) => format!("{}: {} - {summary}", self.task_type.commit_prefix(), self.name),
            None => format!("{}: {}", self.task_type.commit_prefix(), self.name),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
