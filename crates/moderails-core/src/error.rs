use crate::history::HistoryRef;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RailsError {
    #[error("not initialized: run 'moderails init'")]
    NotInitialized,

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("epic not found: {0}")]
    EpicNotFound(String),

    #[error("epic already exists: {0}")]
    EpicExists(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid task type '{0}': expected feature, fix, refactor or chore")]
    InvalidTaskType(String),

    #[error("invalid task status '{0}': expected draft, in-progress or completed")]
    InvalidStatus(String),

    #[error("invalid tag or skill '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidTag(String),

    #[error("unknown skill '{0}': no skills/{0}/SKILL.md")]
    UnknownSkill(String),

    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("task {id} is completed; '{field}' can no longer change")]
    TaskImmutable { id: String, field: String },

    #[error("refusing to delete {target} without confirmation")]
    ConfirmationRequired { target: String },

    #[error("epic {id} has open tasks: {}", open.join(", "))]
    EpicHasOpenTasks { id: String, open: Vec<String> },

    #[error("version control unavailable: {0}")]
    VcsUnavailable(String),

    #[error("version control command failed: {command}: {stderr}")]
    VcsCommandFailed {
        command: String,
        stderr: String,
        /// History entry already written before the failure, if any.
        history: Option<HistoryRef>,
    },

    #[error("history write failed: {0}")]
    HistoryWriteFailed(String),

    #[error("store busy: another moderails process holds the write lock")]
    StoreBusy,

    #[error("migration {version} failed: {reason}")]
    MigrationFailed { version: u32, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sql(rusqlite::Error),
}

/// Coarse classification callers use to decide between retrying, asking for
/// confirmation, or falling back to manual steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    InvalidTransition,
    TaskImmutable,
    ConfirmationRequired,
    EpicHasOpenTasks,
    VcsUnavailable,
    VcsCommandFailed,
    StoreBusy,
    MigrationFailed,
    Internal,
}

impl RailsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TaskNotFound(_) | Self::EpicNotFound(_) | Self::NotInitialized => {
                ErrorKind::NotFound
            }
            Self::EpicExists(_)
            | Self::InvalidName(_)
            | Self::InvalidTaskType(_)
            | Self::InvalidStatus(_)
            | Self::InvalidTag(_)
            | Self::UnknownSkill(_)
            | Self::InvalidField { .. } => ErrorKind::InvalidInput,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::TaskImmutable { .. } => ErrorKind::TaskImmutable,
            Self::ConfirmationRequired { .. } => ErrorKind::ConfirmationRequired,
            Self::EpicHasOpenTasks { .. } => ErrorKind::EpicHasOpenTasks,
            Self::VcsUnavailable(_) => ErrorKind::VcsUnavailable,
            Self::VcsCommandFailed { .. } => ErrorKind::VcsCommandFailed,
            Self::StoreBusy => ErrorKind::StoreBusy,
            Self::MigrationFailed { .. } => ErrorKind::MigrationFailed,
            Self::HistoryWriteFailed(_)
            | Self::Io(_)
            | Self::Yaml(_)
            | Self::Json(_)
            | Self::Sql(_) => ErrorKind::Internal,
        }
    }

    /// `StoreBusy` clears once the other process finishes; a failed commit can
    /// be retried because the history half is already durable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreBusy | Self::VcsCommandFailed { .. })
    }

    /// The history entry a failed completion left behind, if any.
    pub fn history_ref(&self) -> Option<&HistoryRef> {
        match self {
            Self::VcsCommandFailed { history, .. } => history.as_ref(),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for RailsError {
    fn from(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            return Self::StoreBusy;
        }
        Self::Sql(err)
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

pub type Result<T> = std::result::Result<T, RailsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_group_not_found_variants() {
        assert_eq!(RailsError::TaskNotFound("t1".into()).kind(), ErrorKind::NotFound);
        assert_eq!(RailsError::EpicNotFound("e1".into()).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn busy_sqlite_error_maps_to_store_busy() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let mapped: RailsError = err.into();
        assert!(matches!(mapped, RailsError::StoreBusy));
        assert!(mapped.is_retryable());
    }

    #[test]
    fn open_tasks_listed_in_message() {
        let err = RailsError::EpicHasOpenTasks {
            id: "ab12cd".into(),
            open: vec!["t1".into(), "t2".into()],
        };
        assert_eq!(err.to_string(), "epic ab12cd has open tasks: t1, t2");
    }
}
