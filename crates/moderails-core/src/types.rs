use crate::error::RailsError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Draft,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn all() -> &'static [TaskStatus] {
        &[TaskStatus::Draft, TaskStatus::InProgress, TaskStatus::Completed]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Draft => "draft",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
        }
    }

    /// Validate a status change requested through `update`.
    ///
    /// Tasks only move forward, and `completed` is reachable solely through the
    /// completion transaction so history and store never disagree.
    pub fn check_update(self, target: TaskStatus) -> Result<(), RailsError> {
        let reason = match (self, target) {
            (from, to) if from == to => return Ok(()),
            (TaskStatus::Draft, TaskStatus::InProgress) => return Ok(()),
            (TaskStatus::InProgress, TaskStatus::Draft) => "tasks never regress",
            (_, TaskStatus::Completed) => "use 'complete' to finish a task",
            (TaskStatus::Completed, _) => "completed tasks are immutable",
            _ => "transition not allowed",
        };
        Err(RailsError::InvalidTransition {
            from: self.to_string(),
            to: target.to_string(),
            reason: reason.to_string(),
        })
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = RailsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TaskStatus::Draft),
            "in-progress" | "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            _ => Err(RailsError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Feature,
    Fix,
    Refactor,
    Chore,
}

impl TaskType {
    pub fn all() -> &'static [TaskType] {
        &[
            TaskType::Feature,
            TaskType::Fix,
            TaskType::Refactor,
            TaskType::Chore,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Feature => "feature",
            TaskType::Fix => "fix",
            TaskType::Refactor => "refactor",
            TaskType::Chore => "chore",
        }
    }

    /// Conventional-commit prefix for this task type.
    pub fn commit_prefix(self) -> &'static str {
        match self {
            TaskType::Feature => "feat",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = RailsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feature" | "feat" => Ok(TaskType::Feature),
            "fix" => Ok(TaskType::Fix),
            "refactor" => Ok(TaskType::Refactor),
            "chore" => Ok(TaskType::Chore),
            _ => Err(RailsError::InvalidTaskType(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_roundtrips_through_str() {
        for &status in TaskStatus::all() {
            assert_eq!(TaskStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(TaskStatus::from_str("done").is_err());
    }

    #[test]
    fn draft_may_start() {
        TaskStatus::Draft.check_update(TaskStatus::InProgress).unwrap();
        TaskStatus::InProgress.check_update(TaskStatus::InProgress).unwrap();
    }

    #[test]
    fn in_progress_cannot_regress() {
        let err = TaskStatus::InProgress
            .check_update(TaskStatus::Draft)
            .unwrap_err();
        assert!(matches!(err, RailsError::InvalidTransition { .. }));
    }

    #[test]
    fn completed_only_via_complete() {
        assert!(TaskStatus::InProgress
            .check_update(TaskStatus::Completed)
            .is_err());
        assert!(TaskStatus::Completed.check_update(TaskStatus::Draft).is_err());
    }

    #[test]
    fn task_type_parse_and_prefix() {
        assert_eq!(TaskType::from_str("fix").unwrap(), TaskType::Fix);
        assert_eq!(TaskType::Feature.commit_prefix(), "feat");
        assert_eq!(TaskType::Chore.commit_prefix(), "chore");
        assert!(matches!(
            TaskType::from_str("epic"),
            Err(RailsError::InvalidTaskType(_))
        ));
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
    }
}
