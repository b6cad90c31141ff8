//! Forward-only, numbered schema migrations.
//!
//! Every script must be idempotent (`IF NOT EXISTS` everywhere) so that
//! re-running a migration over a schema that already has it is harmless.
//! Each script runs in its own immediate transaction together with the
//! version bump, so a crash leaves the database either before or after that
//! migration and the next start resumes from the stored version.

use crate::error::{RailsError, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "epics and tasks",
        sql: "
            CREATE TABLE IF NOT EXISTS epics (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL UNIQUE,
                tags        TEXT NOT NULL DEFAULT '[]',
                skills      TEXT NOT NULL DEFAULT '[]',
                created_at  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tasks (
                id           TEXT PRIMARY KEY,
                name         TEXT NOT NULL,
                type         TEXT NOT NULL,
                status       TEXT NOT NULL,
                epic_id      TEXT REFERENCES epics(id),
                summary      TEXT,
                description  TEXT,
                commit_id    TEXT,
                plan_file    TEXT,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                completed_at TEXT,
                CHECK (commit_id IS NULL OR status = 'completed')
            );
        ",
    },
    Migration {
        version: 2,
        name: "task lookup indexes",
        sql: "
            CREATE INDEX IF NOT EXISTS idx_tasks_epic_status ON tasks(epic_id, status);
            CREATE INDEX IF NOT EXISTS idx_tasks_status_updated ON tasks(status, updated_at);
        ",
    },
];

pub fn latest_version() -> u32 {
    MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Stored schema version, `0` for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let has_table: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if has_table.is_none() {
        return Ok(0);
    }
    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version WHERE id=1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id      INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );",
    )?;
    conn.execute(
        "INSERT INTO schema_version(id, version) VALUES (1, ?1) \
         ON CONFLICT(id) DO UPDATE SET version=excluded.version",
        [version],
    )?;
    Ok(())
}

/// Apply every built-in migration above the stored version, in order.
/// Returns the versions applied by this call.
pub fn apply_pending(conn: &mut Connection) -> Result<Vec<u32>> {
    apply(conn, MIGRATIONS)
}

pub(crate) fn apply(conn: &mut Connection, migrations: &[Migration]) -> Result<Vec<u32>> {
    let latest = migrations.iter().map(|m| m.version).max().unwrap_or(0);
    let current = schema_version(conn)?;
    if current > latest {
        return Err(RailsError::MigrationFailed {
            version: current,
            reason: format!("database schema v{current} is newer than this binary (v{latest})"),
        });
    }

    let mut pending: Vec<&Migration> = migrations.iter().filter(|m| m.version > current).collect();
    pending.sort_by_key(|m| m.version);

    let mut applied = Vec::with_capacity(pending.len());
    for migration in pending {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(migration.sql)
            .and_then(|()| set_schema_version(&tx, migration.version))
            .map_err(|e| RailsError::MigrationFailed {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.commit()?;
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applied schema migration"
        );
        applied.push(migration.version);
    }
    Ok(applied)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_sql(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT sql FROM sqlite_master WHERE sql IS NOT NULL ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn fresh_database_is_version_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn applies_all_in_order() {
        let mut conn = Connection::open_in_memory().unwrap();
        let applied = apply_pending(&mut conn).unwrap();
        assert_eq!(applied, vec![1, 2]);
        assert_eq!(schema_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_pending(&mut conn).unwrap();
        let once = schema_sql(&conn);

        assert!(apply_pending(&mut conn).unwrap().is_empty());

        // Force every script to run again over the existing schema.
        set_schema_version(&conn, 0).unwrap();
        apply_pending(&mut conn).unwrap();

        assert_eq!(schema_sql(&conn), once);
        assert_eq!(schema_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn failed_script_keeps_previous_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        let broken = [
            Migration {
                version: 1,
                name: "ok",
                sql: "CREATE TABLE IF NOT EXISTS a (x INTEGER);",
            },
            Migration {
                version: 2,
                name: "broken",
                sql: "CREATE TABLE IF NOT EXISTS b (y INTEGER); THIS IS NOT SQL;",
            },
        ];
        let err = apply(&mut conn, &broken).unwrap_err();
        assert!(matches!(err, RailsError::MigrationFailed { version: 2, .. }));
        assert_eq!(schema_version(&conn).unwrap(), 1);

        // The half-applied script rolled back with its transaction.
        let b_exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name='b'",
                [],
                |row| row.get(0),
            )
            .optional()
            .unwrap();
        assert!(b_exists.is_none());
    }

    #[test]
    fn newer_database_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        set_schema_version(&conn, latest_version() + 5).unwrap();
        assert!(matches!(
            apply_pending(&mut conn),
            Err(RailsError::MigrationFailed { .. })
        ));
    }
}
