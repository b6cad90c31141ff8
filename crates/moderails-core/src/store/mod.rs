//! SQLite-backed persistent store for epics and tasks.
//!
//! Reads go straight to the connection. Writes go through [`Store::write`],
//! which wraps the closure in one `BEGIN IMMEDIATE` transaction so two
//! processes never interleave partial updates; lock contention surfaces as
//! [`RailsError::StoreBusy`] after a bounded number of retries.

pub mod epics;
pub mod migrations;
pub mod tasks;

use crate::epic::{Epic, EpicProgress};
use crate::error::{RailsError, Result};
use crate::task::Task;
use crate::types::TaskStatus;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use tasks::TaskFilter;

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub busy_timeout: Duration,
    pub retries: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(2000),
            retries: 3,
        }
    }
}

#[derive(Debug)]
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
    retries: u32,
}

impl Store {
    /// Open (creating if needed) the database at `path` and bring its schema
    /// up to date.
    pub fn open(path: &Path, opts: StoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()), opts)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None, StoreOptions::default())
    }

    fn init(mut conn: Connection, path: Option<PathBuf>, opts: StoreOptions) -> Result<Self> {
        conn.busy_timeout(opts.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let applied = migrations::apply_pending(&mut conn)?;
        if !applied.is_empty() {
            tracing::debug!(?applied, "store schema upgraded");
        }
        Ok(Self {
            conn,
            path,
            retries: opts.retries,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<u32> {
        migrations::schema_version(&self.conn)
    }

    /// Run `f` inside one exclusive write transaction, committing on `Ok`.
    ///
    /// `StoreBusy` is retried up to the configured count with a short linear
    /// backoff; `f` must therefore be safe to run more than once.
    pub fn write<T, F>(&mut self, mut f: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match self.try_write(&mut f) {
                Err(RailsError::StoreBusy) if attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(attempt, "store busy, retrying write");
                    std::thread::sleep(Duration::from_millis(50 * u64::from(attempt)));
                }
                other => return other,
            }
        }
    }

    fn try_write<T, F>(&mut self, f: &mut F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn task(&self, id: &str) -> Result<Option<Task>> {
        tasks::get(&self.conn, id)
    }

    pub fn require_task(&self, id: &str) -> Result<Task> {
        tasks::require(&self.conn, id)
    }

    pub fn tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        tasks::list(&self.conn, filter)
    }

    /// Completed tasks of an epic, oldest completion first.
    pub fn completed_tasks_for_epic(&self, epic_id: &str) -> Result<Vec<Task>> {
        tasks::completed_for_epic(&self.conn, epic_id)
    }

    /// The task a session is working on: the in-progress task, else the most
    /// recently updated draft.
    pub fn current_task(&self) -> Result<Option<Task>> {
        tasks::current(&self.conn)
    }

    pub fn epic(&self, id: &str) -> Result<Option<Epic>> {
        epics::get(&self.conn, id)
    }

    pub fn require_epic(&self, id: &str) -> Result<Epic> {
        epics::require(&self.conn, id)
    }

    pub fn epic_by_name(&self, name: &str) -> Result<Option<Epic>> {
        epics::get_by_name(&self.conn, name)
    }

    pub fn epics(&self) -> Result<Vec<Epic>> {
        epics::list(&self.conn)
    }

    pub fn epic_progress(&self, epic_id: &str) -> Result<EpicProgress> {
        epics::progress(&self.conn, epic_id)
    }
}

// ---------------------------------------------------------------------------
// Column helpers shared by the row modules
// ---------------------------------------------------------------------------

/// Fixed-width UTC timestamps so lexical order in SQL equals time order.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RailsError::InvalidField {
            field: field.to_string(),
            reason: format!("bad timestamp '{raw}': {e}"),
        })
}

pub(crate) fn status_is_open(status: TaskStatus) -> bool {
    status != TaskStatus::Completed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
