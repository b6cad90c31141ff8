use super::{fmt_ts, parse_ts};
use crate::error::{RailsError, Result};
use crate::task::Task;
use crate::types::TaskStatus;
use rusqlite::{params, Connection, OptionalExtension, Row};

const COLUMNS: &str = "id, name, type, status, epic_id, summary, description, commit_id, \
                       plan_file, created_at, updated_at, completed_at";

/// Completed first, then drafts, then in-progress; newest first inside each group.
const LIST_ORDER: &str = "CASE status WHEN 'completed' THEN 0 WHEN 'draft' THEN 1 ELSE 2 END, \
                          created_at DESC";

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub epic_id: Option<String>,
}

/// Raw column values; parsed into a [`Task`] outside the rusqlite closure so
/// bad enum text surfaces as a typed error rather than a conversion panic.
struct TaskRow {
    id: String,
    name: String,
    task_type: String,
    status: String,
    epic_id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    commit: Option<String>,
    plan_file: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            task_type: row.get(2)?,
            status: row.get(3)?,
            epic_id: row.get(4)?,
            summary: row.get(5)?,
            description: row.get(6)?,
            commit: row.get(7)?,
            plan_file: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            completed_at: row.get(11)?,
        })
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = RailsError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            task_type: row.task_type.parse()?,
            status: row.status.parse()?,
            created_at: parse_ts("created_at", &row.created_at)?,
            updated_at: parse_ts("updated_at", &row.updated_at)?,
            completed_at: row
                .completed_at
                .as_deref()
                .map(|raw| parse_ts("completed_at", raw))
                .transpose()?,
            id: row.id,
            name: row.name,
            epic_id: row.epic_id,
            summary: row.summary,
            description: row.description,
            commit: row.commit,
            plan_file: row.plan_file,
        })
    }
}

fn query(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, TaskRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(Task::try_from).collect()
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"),
            [id],
            TaskRow::from_row,
        )
        .optional()?;
    row.map(Task::try_from).transpose()
}

pub fn require(conn: &Connection, id: &str) -> Result<Task> {
    get(conn, id)?.ok_or_else(|| RailsError::TaskNotFound(id.to_string()))
}

pub fn list(conn: &Connection, filter: &TaskFilter) -> Result<Vec<Task>> {
    let status = filter.status.map(|s| s.as_str());
    query(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR epic_id = ?2) \
             ORDER BY {LIST_ORDER}"
        ),
        params![status, filter.epic_id],
    )
}

pub fn completed_for_epic(conn: &Connection, epic_id: &str) -> Result<Vec<Task>> {
    query(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM tasks WHERE epic_id = ?1 AND status = 'completed' \
             ORDER BY completed_at ASC, created_at ASC"
        ),
        [epic_id],
    )
}

pub fn current(conn: &Connection) -> Result<Option<Task>> {
    let mut found = query(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM tasks WHERE status != 'completed' \
             ORDER BY CASE status WHEN 'in-progress' THEN 0 ELSE 1 END, updated_at DESC \
             LIMIT 1"
        ),
        [],
    )?;
    Ok(found.pop())
}

/// Ids of in-progress tasks other than `except`.
pub fn in_progress_ids(conn: &Connection, except: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT id FROM tasks WHERE status = 'in-progress' AND id != ?1 ORDER BY id")?;
    let ids = stmt
        .query_map([except], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

pub fn insert(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO tasks ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
        params![
            task.id,
            task.name,
            task.task_type.as_str(),
            task.status.as_str(),
            task.epic_id,
            task.summary,
            task.description,
            task.commit,
            task.plan_file,
            fmt_ts(&task.created_at),
            fmt_ts(&task.updated_at),
            task.completed_at.as_ref().map(fmt_ts),
        ],
    )?;
    Ok(())
}

pub fn update(conn: &Connection, task: &Task) -> Result<()> {
    let changed = conn.execute(
        "UPDATE tasks SET name = ?2, type = ?3, status = ?4, epic_id = ?5, summary = ?6, \
         description = ?7, commit_id = ?8, plan_file = ?9, updated_at = ?10, completed_at = ?11 \
         WHERE id = ?1",
        params![
            task.id,
            task.name,
            task.task_type.as_str(),
            task.status.as_str(),
            task.epic_id,
            task.summary,
            task.description,
            task.commit,
            task.plan_file,
            fmt_ts(&task.updated_at),
            task.completed_at.as_ref().map(fmt_ts),
        ],
    )?;
    if changed == 0 {
        return Err(RailsError::TaskNotFound(task.id.clone()));
    }
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.execute("DELETE FROM tasks WHERE id = ?1", [id])? > 0)
}
