use super::{fmt_ts, parse_ts, status_is_open};
use crate::epic::{Epic, EpicProgress};
use crate::error::{RailsError, Result};
use crate::types::TaskStatus;
use rusqlite::{params, Connection, OptionalExtension, Row};

const COLUMNS: &str = "id, name, tags, skills, created_at";

struct EpicRow {
    id: String,
    name: String,
    tags: String,
    skills: String,
    created_at: String,
}

impl EpicRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            tags: row.get(2)?,
            skills: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl TryFrom<EpicRow> for Epic {
    type Error = RailsError;

    fn try_from(row: EpicRow) -> Result<Self> {
        Ok(Epic {
            tags: serde_json::from_str(&row.tags)?,
            skills: serde_json::from_str(&row.skills)?,
            created_at: parse_ts("created_at", &row.created_at)?,
            id: row.id,
            name: row.name,
        })
    }
}

fn get_where(conn: &Connection, column: &str, value: &str) -> Result<Option<Epic>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM epics WHERE {column} = ?1"),
            [value],
            EpicRow::from_row,
        )
        .optional()?;
    row.map(Epic::try_from).transpose()
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Epic>> {
    get_where(conn, "id", id)
}

pub fn require(conn: &Connection, id: &str) -> Result<Epic> {
    get(conn, id)?.ok_or_else(|| RailsError::EpicNotFound(id.to_string()))
}

pub fn get_by_name(conn: &Connection, name: &str) -> Result<Option<Epic>> {
    get_where(conn, "name", name)
}

pub fn list(conn: &Connection) -> Result<Vec<Epic>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM epics ORDER BY created_at ASC"))?;
    let rows = stmt
        .query_map([], EpicRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(Epic::try_from).collect()
}

pub fn insert(conn: &Connection, epic: &Epic) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO epics ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
        params![
            epic.id,
            epic.name,
            serde_json::to_string(&epic.tags)?,
            serde_json::to_string(&epic.skills)?,
            fmt_ts(&epic.created_at),
        ],
    )?;
    Ok(())
}

pub fn update(conn: &Connection, epic: &Epic) -> Result<()> {
    let changed = conn.execute(
        "UPDATE epics SET name = ?2, tags = ?3, skills = ?4 WHERE id = ?1",
        params![
            epic.id,
            epic.name,
            serde_json::to_string(&epic.tags)?,
            serde_json::to_string(&epic.skills)?,
        ],
    )?;
    if changed == 0 {
        return Err(RailsError::EpicNotFound(epic.id.clone()));
    }
    Ok(())
}

/// Delete the epic row. Tasks it owned keep existing without an epic.
pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    conn.execute("UPDATE tasks SET epic_id = NULL WHERE epic_id = ?1", [id])?;
    Ok(conn.execute("DELETE FROM epics WHERE id = ?1", [id])? > 0)
}

/// Delete the epic unless it still has open tasks and `force` is unset.
/// Reads progress on the same connection as the delete, so inside a
/// transaction no task can be added between the check and the delete.
/// Returns the number of tasks detached.
pub fn delete_unless_open(conn: &Connection, id: &str, force: bool) -> Result<usize> {
    let progress = progress(conn, id)?;
    if !progress.open.is_empty() && !force {
        return Err(RailsError::EpicHasOpenTasks {
            id: id.to_string(),
            open: progress.open,
        });
    }
    delete(conn, id)?;
    Ok(progress.total)
}

pub fn progress(conn: &Connection, epic_id: &str) -> Result<EpicProgress> {
    let mut stmt =
        conn.prepare("SELECT id, status FROM tasks WHERE epic_id = ?1 ORDER BY created_at ASC")?;
    let rows = stmt
        .query_map([epic_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut progress = EpicProgress {
        total: rows.len(),
        completed: 0,
        open: Vec::new(),
    };
    for (id, status) in rows {
        let status: TaskStatus = status.parse()?;
        if status_is_open(status) {
            progress.open.push(id);
        } else {
            progress.completed += 1;
        }
    }
    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{tasks, Store};
    use crate::task::Task;
    use crate::types::TaskType;

    #[test]
    fn tags_survive_storage_in_declaration_order() {
        let mut store = Store::open_in_memory().unwrap();
        let mut epic = Epic::new("Checkout");
        epic.add_tag("payments").unwrap();
        epic.add_tag("auth").unwrap();
        store.write(|tx| insert(tx, &epic)).unwrap();

        let loaded = store.epic_by_name("Checkout").unwrap().unwrap();
        assert_eq!(loaded.tags, vec!["payments", "auth"]);
        assert_eq!(loaded.id, epic.id);
    }

    #[test]
    fn duplicate_name_is_rejected_by_schema() {
        let mut store = Store::open_in_memory().unwrap();
        store.write(|tx| insert(tx, &Epic::new("Dup"))).unwrap();
        assert!(store.write(|tx| insert(tx, &Epic::new("Dup"))).is_err());
    }

    #[test]
    fn delete_unless_open_checks_inside_the_transaction() {
        let mut store = Store::open_in_memory().unwrap();
        let epic = Epic::new("Checkout");
        store.write(|tx| insert(tx, &epic)).unwrap();

        let mut late = Task::new("late", TaskType::Feature, TaskStatus::InProgress);
        late.epic_id = Some(epic.id.clone());
        let err = store
            .write(|tx| {
                tasks::insert(tx, &late)?;
                delete_unless_open(tx, &epic.id, false)
            })
            .unwrap_err();
        match err {
            RailsError::EpicHasOpenTasks { open, .. } => assert_eq!(open, vec![late.id.clone()]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(store.epic(&epic.id).unwrap().is_some());
        assert!(store.task(&late.id).unwrap().is_none());

        let detached = store
            .write(|tx| {
                tasks::insert(tx, &late)?;
                delete_unless_open(tx, &epic.id, true)
            })
            .unwrap();
        assert_eq!(detached, 1);
        assert!(store.epic(&epic.id).unwrap().is_none());
        assert!(store.task(&late.id).unwrap().unwrap().epic_id.is_none());
    }

    #[test]
    fn progress_counts_open_and_completed() {
        let mut store = Store::open_in_memory().unwrap();
        let epic = Epic::new("Checkout");
        let mut open = Task::new("open", TaskType::Fix, TaskStatus::InProgress);
        open.epic_id = Some(epic.id.clone());
        let mut done = Task::new("done", TaskType::Fix, TaskStatus::Completed);
        done.epic_id = Some(epic.id.clone());
        store
            .write(|tx| {
                insert(tx, &epic)?;
                tasks::insert(tx, &open)?;
                tasks::insert(tx, &done)
            })
            .unwrap();

        let p = store.epic_progress(&epic.id).unwrap();
        assert_eq!(p.total, 2);
        assert_eq!(p.completed, 1);
        assert_eq!(p.open, vec![open.id.clone()]);
        assert!(!p.is_complete());
    }

    #[test]
    fn delete_detaches_tasks() {
        let mut store = Store::open_in_memory().unwrap();
        let epic = Epic::new("Gone");
        let mut t = Task::new("orphan", TaskType::Chore, TaskStatus::Completed);
        t.epic_id = Some(epic.id.clone());
        store
            .write(|tx| {
                insert(tx, &epic)?;
                tasks::insert(tx, &t)
            })
            .unwrap();

        assert!(store.write(|tx| delete(tx, &epic.id)).unwrap());
        assert!(store.epic(&epic.id).unwrap().is_none());
        assert!(store.task(&t.id).unwrap().unwrap().epic_id.is_none());
    }
}
