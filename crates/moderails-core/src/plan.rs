//! Plan files: one markdown document per task under `.moderails/tasks/`.
//!
//! The engine decides whether a task gets a plan and where it lives
//! ([`crate::paths::plan_file`]); writing and removing goes through
//! [`PlanWriter`].

use crate::epic::Epic;
use crate::error::Result;
use crate::io;
use crate::paths::validate_plan_path;
use crate::task::Task;
use std::path::{Path, PathBuf};

pub trait PlanWriter {
    /// Create the plan at `rel` (relative to the project root). An existing
    /// file is left alone. Returns true if a file was written.
    fn create(&self, rel: &Path, task: &Task, epic: Option<&Epic>) -> Result<bool>;

    fn read(&self, rel: &Path) -> Result<Option<String>>;

    fn remove(&self, rel: &Path) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct FsPlanWriter {
    root: PathBuf,
}

impl FsPlanWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, rel: &Path) -> Result<PathBuf> {
        validate_plan_path(rel)?;
        Ok(self.root.join(rel))
    }
}

impl PlanWriter for FsPlanWriter {
    fn create(&self, rel: &Path, task: &Task, epic: Option<&Epic>) -> Result<bool> {
        let written = io::write_if_missing(&self.resolve(rel)?, render_template(task, epic).as_bytes())?;
        if written {
            tracing::debug!(task = %task.id, path = %rel.display(), "plan file created");
        }
        Ok(written)
    }

    fn read(&self, rel: &Path) -> Result<Option<String>> {
        match std::fs::read_to_string(self.resolve(rel)?) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, rel: &Path) -> Result<bool> {
        io::remove_if_exists(&self.resolve(rel)?)
    }
}

fn render_template(task: &Task, epic: Option<&Epic>) -> String {
    let epic_line = epic
        .map(|e| format!("**Epic**: {} (`{}`)\n", e.name, e.id))
        .unwrap_or_default();
    let description = task
        .description
        .as_deref()
        .unwrap_or("[what this task is for]");
    format!(
        "# {name}\n\n\
         **Task**: `{id}` ({task_type})\n\
         {epic_line}\n\
         ## Goal\n\n{description}\n\n\
         ## Context\n\n- [relevant files, constraints]\n\n\
         ## Steps\n\n1. [first step]\n\n\
         ## Verification\n\n- [how to know it works]\n",
        name = task.name,
        id = task.id,
        task_type = task.task_type,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths;
    use crate::types::{TaskStatus, TaskType};
    use tempfile::TempDir;

    #[test]
    fn create_read_remove() {
        let dir = TempDir::new().unwrap();
        let writer = FsPlanWriter::new(dir.path());
        let mut task = Task::new("Add login", TaskType::Feature, TaskStatus::Draft);
        task.description = Some("Users sign in with email".into());
        let epic = Epic::new("Auth");
        let rel = paths::plan_file(Some(&epic.name), &task.name, &task.id);

        assert!(writer.create(&rel, &task, Some(&epic)).unwrap());
        assert!(!writer.create(&rel, &task, Some(&epic)).unwrap());

        let content = writer.read(&rel).unwrap().unwrap();
        assert!(content.starts_with("# Add login"));
        assert!(content.contains("Users sign in with email"));
        assert!(content.contains("**Epic**: Auth"));

        assert!(writer.remove(&rel).unwrap());
        assert!(writer.read(&rel).unwrap().is_none());
        assert!(!writer.remove(&rel).unwrap());
    }

    #[test]
    fn paths_outside_tasks_dir_are_refused() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("project");
        std::fs::create_dir_all(&root).unwrap();
        let victim = dir.path().join("victim.txt");
        std::fs::write(&victim, "keep").unwrap();
        let writer = FsPlanWriter::new(&root);
        let task = Task::new("Escape", TaskType::Chore, TaskStatus::Draft);

        for rel in [Path::new("../victim.txt"), victim.as_path()] {
            assert!(writer.remove(rel).is_err());
            assert!(writer.read(rel).is_err());
            assert!(writer.create(rel, &task, None).is_err());
        }
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "keep");
    }
}
