//! Task and epic lifecycle.
//!
//! Every operation validates against the store before mutating anything.
//! Completion is an ordered sequence across three systems that cannot share a
//! transaction (history file, version control, store), so each step leaves a
//! state the next invocation can resume from:
//!
//! 1. history line appended (idempotent per task id)
//! 2. history staged and committed
//! 3. status, commit id and completion time persisted in one store write
//!
//! A failure at step 2 returns the history location and leaves the task open.

use crate::config::Config;
use crate::context::{ContextAssembler, ContextBundle, ContextScope};
use crate::epic::{Epic, EpicProgress, EpicUpdate, NewEpic};
use crate::error::{RailsError, Result};
use crate::history::{query_terms, records_task, HistoryEntry, HistoryLog, HistoryRef};
use crate::paths;
use crate::plan::{FsPlanWriter, PlanWriter};
use crate::render::{EpicRef, Mode, ModeContext, TaskRef};
use crate::store::{epics, tasks, Store, TaskFilter};
use crate::task::{validate_name, NewTask, Task, TaskUpdate};
use crate::types::TaskStatus;
use crate::vcs::{Vcs, VcsError, VcsSnapshot};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Created {
    pub task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextBundle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Loaded {
    pub task: Task,
    pub epic: Option<Epic>,
    pub plan: Option<String>,
    pub context: ContextBundle,
}

#[derive(Debug, Clone, Default)]
pub struct CompleteRequest {
    pub summary: Option<String>,
    /// Commit message; defaults to `<type>: <name> - <summary>`.
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOutcome {
    /// History committed and the commit id recorded.
    Committed,
    /// No repository: completed and recorded in history, nothing committed.
    Recorded,
    /// The task was already completed; nothing changed.
    AlreadyCompleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub task: Task,
    pub outcome: CompletionOutcome,
    pub history: Option<HistoryRef>,
    pub files_changed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EpicStatus {
    pub epic: Epic,
    pub progress: EpicProgress,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub current_task: Option<TaskRef>,
    pub draft_tasks: Vec<TaskRef>,
    pub epics: Vec<EpicStatus>,
    pub vcs: VcsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    /// `None` for history entries whose task is not in the store.
    pub status: Option<TaskStatus>,
    pub epic: Option<String>,
    pub summary: Option<String>,
    pub commit: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files_changed: Vec<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    root: PathBuf,
    config: Config,
    store: Store,
    history: HistoryLog,
    vcs: Box<dyn Vcs>,
    assembler: ContextAssembler,
    plans: Box<dyn PlanWriter>,
}

impl Engine {
    pub fn new(root: impl Into<PathBuf>, config: Config, store: Store, vcs: Box<dyn Vcs>) -> Self {
        let root = root.into();
        Self {
            history: HistoryLog::new(paths::history_path(&root)),
            assembler: ContextAssembler::new(&root),
            plans: Box::new(FsPlanWriter::new(&root)),
            root,
            config,
            store,
            vcs,
        }
    }

    pub fn with_plan_writer(mut self, plans: Box<dyn PlanWriter>) -> Self {
        self.plans = plans;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    pub fn vcs(&self) -> &dyn Vcs {
        self.vcs.as_ref()
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub fn create_task(&mut self, new: NewTask) -> Result<Created> {
        validate_name(&new.name)?;
        let status = new.status.unwrap_or_else(|| self.config.initial_status());
        if status == TaskStatus::Completed {
            return Err(RailsError::InvalidTransition {
                from: "new".to_string(),
                to: status.to_string(),
                reason: "use 'complete' to finish a task".to_string(),
            });
        }
        let epic = match &new.epic_id {
            Some(key) => Some(self.resolve_epic(key)?),
            None => None,
        };

        let mut task = Task::new(&new.name, new.task_type, status);
        task.epic_id = epic.as_ref().map(|e| e.id.clone());
        task.description = new
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(String::from);
        let plan_rel = (self.config.create_plan_files && !new.no_plan)
            .then(|| paths::plan_file(epic.as_ref().map(|e| e.name.as_str()), &task.name, &task.id));
        task.plan_file = plan_rel.as_deref().map(rel_string);

        let single = self.config.single_in_progress;
        self.store.write(|tx| {
            if single && task.status == TaskStatus::InProgress {
                ensure_slot_free(tx, &task.id, "new")?;
            }
            tasks::insert(tx, &task)
        })?;
        tracing::info!(id = %task.id, status = %task.status, "task created");

        if let Some(rel) = &plan_rel {
            if let Err(e) = self.plans.create(rel, &task, epic.as_ref()) {
                tracing::warn!(id = %task.id, error = %e, "could not write plan file");
            }
        }

        let context = if new.no_context {
            None
        } else {
            Some(self.assemble(&ContextScope::for_task(&task))?)
        };
        Ok(Created { task, context })
    }

    pub fn update_task(&mut self, id: &str, update: TaskUpdate) -> Result<Task> {
        let epic_id = match &update.epic_id {
            Some(key) => Some(self.resolve_epic(key)?.id),
            None => None,
        };
        let update = TaskUpdate { epic_id, ..update };
        let single = self.config.single_in_progress;

        let task = self.store.write(|tx| {
            let mut task = tasks::require(tx, id)?;
            let before = task.status;
            task.apply_update(&update)?;
            if single && before != TaskStatus::InProgress && task.status == TaskStatus::InProgress {
                ensure_slot_free(tx, &task.id, before.as_str())?;
            }
            tasks::update(tx, &task)?;
            Ok(task)
        })?;
        tracing::info!(id = %task.id, status = %task.status, "task updated");
        Ok(task)
    }

    /// Move a draft to in-progress.
    pub fn start_task(&mut self, id: &str) -> Result<Task> {
        self.update_task(
            id,
            TaskUpdate {
                status: Some(TaskStatus::InProgress),
                ..TaskUpdate::default()
            },
        )
    }

    pub fn task(&self, id: &str) -> Result<Task> {
        self.store.require_task(id)
    }

    /// Load a task with its epic, plan content and a fresh context bundle.
    /// `names` are extra context entries to load by name.
    pub fn load_task(&self, id: &str, names: &[String]) -> Result<Loaded> {
        let task = self.store.require_task(id)?;
        let epic = match &task.epic_id {
            Some(epic_id) => self.store.epic(epic_id)?,
            None => None,
        };
        let plan = match &task.plan_file {
            Some(rel) => self.plans.read(Path::new(rel))?,
            None => None,
        };
        let context = self.assemble(&ContextScope::for_task(&task).with_names(names.iter().cloned()))?;
        Ok(Loaded {
            task,
            epic,
            plan,
            context,
        })
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.store.tasks(filter)
    }

    pub fn current_task(&self) -> Result<Option<Task>> {
        self.store.current_task()
    }

    /// Remove a task row and its plan file. History is never touched.
    pub fn delete_task(&mut self, id: &str, confirm: bool) -> Result<Task> {
        let task = self.store.require_task(id)?;
        if !confirm {
            return Err(RailsError::ConfirmationRequired {
                target: format!("task {id}"),
            });
        }
        self.store.write(|tx| tasks::delete(tx, id))?;
        tracing::info!(id = %task.id, "task deleted");

        if let Some(rel) = &task.plan_file {
            if let Err(e) = self.plans.remove(Path::new(rel)) {
                tracing::warn!(id = %task.id, error = %e, "could not remove plan file");
            }
        }
        Ok(task)
    }

    /// Give the task a plan file if it has none. Returns the updated task.
    pub fn ensure_plan(&mut self, id: &str) -> Result<Task> {
        let task = self.store.require_task(id)?;
        let epic = match &task.epic_id {
            Some(epic_id) => self.store.epic(epic_id)?,
            None => None,
        };
        let rel = match &task.plan_file {
            Some(rel) => PathBuf::from(rel),
            None => paths::plan_file(epic.as_ref().map(|e| e.name.as_str()), &task.name, &task.id),
        };
        self.plans.create(&rel, &task, epic.as_ref())?;
        if task.plan_file.is_some() {
            return Ok(task);
        }
        self.update_task(
            id,
            TaskUpdate {
                plan_file: Some(rel_string(&rel)),
                ..TaskUpdate::default()
            },
        )
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    pub fn complete_task(&mut self, id: &str, req: CompleteRequest) -> Result<Completion> {
        let mut task = self.store.require_task(id)?;
        match task.status {
            TaskStatus::Completed => {
                tracing::warn!(id = %task.id, commit = ?task.commit, "task already completed; nothing to do");
                let history = self.history.find(&task.id)?.map(|(at, _)| at);
                return Ok(Completion {
                    task,
                    outcome: CompletionOutcome::AlreadyCompleted,
                    history,
                    files_changed: Vec::new(),
                });
            }
            TaskStatus::Draft => {
                return Err(RailsError::InvalidTransition {
                    from: TaskStatus::Draft.to_string(),
                    to: TaskStatus::Completed.to_string(),
                    reason: "start the task before completing it".to_string(),
                });
            }
            TaskStatus::InProgress => {}
        }

        // A previous attempt may have written the history line already; that
        // line stays authoritative for the summary and completion time.
        let prior = self.history.find(&task.id)?.map(|(_, entry)| entry);
        let requested = req
            .summary
            .as_deref()
            .map(str::trim)
            .map(|s| (!s.is_empty()).then(|| s.to_string()));
        let completed_at = match &prior {
            Some(entry) => {
                let recorded = (!entry.summary.is_empty()).then(|| entry.summary.clone());
                if let Some(requested) = requested.filter(|r| *r != recorded) {
                    tracing::warn!(
                        id = %task.id,
                        recorded = ?recorded,
                        requested = ?requested,
                        "history already records this completion; keeping its summary"
                    );
                }
                task.summary = recorded;
                entry.completed_at
            }
            None => {
                if let Some(summary) = requested {
                    task.summary = summary;
                }
                Utc::now()
            }
        };
        task.status = TaskStatus::Completed;
        task.completed_at = Some(completed_at);

        let in_repo = self.vcs.is_repo();
        let files_changed = match &prior {
            Some(entry) => entry.files_changed.clone(),
            None if in_repo => self.changed_files(),
            None => Vec::new(),
        };

        // History first: if this fails nothing else has been touched.
        let entry = HistoryEntry::for_task(&task, files_changed.clone(), completed_at);
        let at = self.history.append(&entry)?;

        let (commit, outcome) = if in_repo {
            let landed = match prior {
                Some(_) => self.landed_commit(&task.id, &at)?,
                None => None,
            };
            let commit = match landed {
                Some(commit) => {
                    tracing::info!(id = %task.id, commit = %commit, "completion commit already landed; recording it");
                    commit
                }
                None => {
                    let message = req
                        .message
                        .as_deref()
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(String::from)
                        .unwrap_or_else(|| task.commit_message());
                    self.commit_history(&message, &at)?
                }
            };
            (Some(commit), CompletionOutcome::Committed)
        } else {
            tracing::info!(id = %task.id, "no repository; completing without a commit");
            (None, CompletionOutcome::Recorded)
        };

        let summary = task.summary.clone();
        let task = self.store.write(|tx| {
            let mut stored = tasks::require(tx, id)?;
            stored.status = TaskStatus::Completed;
            stored.summary = summary.clone();
            stored.commit = commit.clone();
            stored.completed_at = Some(completed_at);
            stored.updated_at = Utc::now();
            tasks::update(tx, &stored)?;
            Ok(stored)
        })?;
        tracing::info!(id = %task.id, commit = ?task.commit, "task completed");

        Ok(Completion {
            task,
            outcome,
            history: Some(at),
            files_changed,
        })
    }

    fn changed_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        for (what, res) in [
            ("staged", self.vcs.staged_files()),
            ("unstaged", self.vcs.unstaged_files()),
        ] {
            match res {
                Ok(list) => files.extend(list),
                Err(e) => tracing::warn!(error = %e, "could not list {what} files"),
            }
        }
        files.retain(|f| !f.ends_with(paths::HISTORY_FILE));
        files.sort();
        files.dedup();
        files
    }

    /// Commit id to adopt when an earlier attempt got as far as committing
    /// before it was interrupted. Tracked history counts as landed once the
    /// checked-out commit contains the task's line; private history is never
    /// committed, so an empty index is the only evidence there is.
    fn landed_commit(&self, task_id: &str, at: &HistoryRef) -> Result<Option<String>> {
        let landed = if self.config.private {
            self.vcs.staged_files().is_ok_and(|staged| staged.is_empty())
        } else {
            match self.vcs.committed_content(self.history.path()) {
                Ok(Some(content)) => records_task(&content, task_id),
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(error = %e, "could not read committed history");
                    false
                }
            }
        };
        if !landed {
            return Ok(None);
        }
        self.vcs
            .head()
            .map(Some)
            .map_err(|e| vcs_failure(e, "rev-parse", at))
    }

    fn commit_history(&self, message: &str, at: &HistoryRef) -> Result<String> {
        if self.config.private {
            tracing::debug!("private mode; history stays unstaged");
        } else {
            self.vcs
                .stage(self.history.path())
                .map_err(|e| vcs_failure(e, "stage", at))?;
        }
        self.vcs.commit(message).map_err(|e| vcs_failure(e, "commit", at))
    }

    // -----------------------------------------------------------------------
    // Epics
    // -----------------------------------------------------------------------

    /// Look an epic up by id, then by name.
    pub fn resolve_epic(&self, key: &str) -> Result<Epic> {
        if let Some(epic) = self.store.epic(key)? {
            return Ok(epic);
        }
        self.store
            .epic_by_name(key.trim())?
            .ok_or_else(|| RailsError::EpicNotFound(key.to_string()))
    }

    pub fn list_epics(&self) -> Result<Vec<Epic>> {
        self.store.epics()
    }

    pub fn create_epic(&mut self, new: NewEpic) -> Result<Epic> {
        validate_name(&new.name)?;
        let mut epic = Epic::new(&new.name);
        for tag in &new.tags {
            epic.add_tag(tag)?;
        }
        for skill in &new.skills {
            self.check_skill(skill)?;
            epic.add_skill(skill)?;
        }

        self.store.write(|tx| {
            if epics::get_by_name(tx, &epic.name)?.is_some() {
                return Err(RailsError::EpicExists(epic.name.clone()));
            }
            epics::insert(tx, &epic)
        })?;
        tracing::info!(id = %epic.id, name = %epic.name, "epic created");
        Ok(epic)
    }

    pub fn update_epic(&mut self, key: &str, update: EpicUpdate) -> Result<Epic> {
        let mut epic = self.resolve_epic(key)?;
        for skill in &update.add_skills {
            self.check_skill(skill)?;
        }
        epic.apply_update(&update)?;

        self.store.write(|tx| {
            if let Some(other) = epics::get_by_name(tx, &epic.name)? {
                if other.id != epic.id {
                    return Err(RailsError::EpicExists(epic.name.clone()));
                }
            }
            epics::update(tx, &epic)
        })?;
        tracing::info!(id = %epic.id, "epic updated");
        Ok(epic)
    }

    /// Delete an epic. Open tasks block deletion unless `force`; with `force`
    /// they are kept and detached from the epic.
    pub fn delete_epic(&mut self, key: &str, confirm: bool, force: bool) -> Result<Epic> {
        let epic = self.resolve_epic(key)?;
        let progress = self.store.epic_progress(&epic.id)?;
        if !progress.open.is_empty() && !force {
            return Err(RailsError::EpicHasOpenTasks {
                id: epic.id,
                open: progress.open,
            });
        }
        if !confirm {
            return Err(RailsError::ConfirmationRequired {
                target: format!("epic {}", epic.id),
            });
        }
        let detached = self
            .store
            .write(|tx| epics::delete_unless_open(tx, &epic.id, force))?;
        tracing::info!(id = %epic.id, detached, "epic deleted");
        Ok(epic)
    }

    pub fn epic_progress(&self, key: &str) -> Result<EpicProgress> {
        let epic = self.resolve_epic(key)?;
        self.store.epic_progress(&epic.id)
    }

    fn check_skill(&self, skill: &str) -> Result<()> {
        paths::validate_tag(skill)?;
        if !self.assembler.skill_exists(skill) {
            return Err(RailsError::UnknownSkill(skill.to_string()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Context, history and status
    // -----------------------------------------------------------------------

    pub fn assemble(&self, scope: &ContextScope) -> Result<ContextBundle> {
        self.assembler.assemble(&self.store, &self.history, scope)
    }

    pub fn sync_history(&mut self) -> Result<usize> {
        self.history.sync_into(&mut self.store)
    }

    /// Tasks whose name or summary matches any `|`-separated term, from the
    /// store first, then history entries the store does not know.
    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits = Vec::new();
        for task in self.store.tasks(&TaskFilter::default())? {
            let name = task.name.to_lowercase();
            let summary = task.summary.as_deref().unwrap_or("").to_lowercase();
            if terms.iter().any(|t| name.contains(t.as_str()) || summary.contains(t.as_str())) {
                hits.push(self.hit_for_task(task, Vec::new())?);
            }
        }
        self.merge_history_hits(&mut hits, self.history.search_by_query(query)?)?;
        Ok(hits)
    }

    /// Tasks whose recorded changes touched `file`.
    pub fn search_by_file(&self, file: &str) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        self.merge_history_hits(&mut hits, self.history.search_by_file(file)?)?;
        Ok(hits)
    }

    fn merge_history_hits(&self, hits: &mut Vec<SearchHit>, entries: Vec<HistoryEntry>) -> Result<()> {
        for entry in entries {
            if let Some(hit) = hits.iter_mut().find(|h| h.id == entry.id) {
                hit.files_changed = entry.files_changed;
                continue;
            }
            let hit = match self.store.task(&entry.id)? {
                Some(task) => self.hit_for_task(task, entry.files_changed)?,
                None => SearchHit {
                    id: entry.id,
                    name: entry.name,
                    status: None,
                    epic: None,
                    summary: (!entry.summary.is_empty()).then_some(entry.summary),
                    commit: entry.commit,
                    completed_at: Some(entry.completed_at),
                    files_changed: entry.files_changed,
                },
            };
            hits.push(hit);
        }
        Ok(())
    }

    fn hit_for_task(&self, task: Task, files_changed: Vec<String>) -> Result<SearchHit> {
        let epic = match &task.epic_id {
            Some(id) => self.store.epic(id)?.map(|e| e.name),
            None => None,
        };
        Ok(SearchHit {
            id: task.id,
            name: task.name,
            status: Some(task.status),
            epic,
            summary: task.summary,
            commit: task.commit,
            completed_at: task.completed_at,
            files_changed,
        })
    }

    fn task_ref(&self, task: &Task) -> Result<TaskRef> {
        let epic = match &task.epic_id {
            Some(id) => self.store.epic(id)?,
            None => None,
        };
        Ok(TaskRef::new(task, epic.as_ref()))
    }

    fn drafts(&self) -> Result<Vec<TaskRef>> {
        self.store
            .tasks(&TaskFilter {
                status: Some(TaskStatus::Draft),
                ..TaskFilter::default()
            })?
            .iter()
            .map(|t| self.task_ref(t))
            .collect()
    }

    pub fn status(&self) -> Result<Status> {
        let current_task = match self.store.current_task()? {
            Some(task) => Some(self.task_ref(&task)?),
            None => None,
        };
        let epics = self
            .store
            .epics()?
            .into_iter()
            .map(|epic| -> Result<EpicStatus> {
                let progress = self.store.epic_progress(&epic.id)?;
                Ok(EpicStatus { epic, progress })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Status {
            current_task,
            draft_tasks: self.drafts()?,
            epics,
            vcs: VcsSnapshot::capture(self.vcs.as_ref(), &self.config.main_branch),
        })
    }

    /// Build the record a mode template is rendered from. Each mode loads
    /// only what it uses.
    pub fn mode_context(&mut self, mode: Mode, flags: Vec<String>) -> Result<ModeContext> {
        let mut ctx = ModeContext::new(mode, flags, self.root.display().to_string());

        let mut current = self.store.current_task()?;
        if mode == Mode::Plan {
            if let Some(task) = current.take() {
                current = Some(self.ensure_plan(&task.id)?);
            }
        }

        if mode.needs_task() || mode == Mode::Start {
            ctx.current_task = match &current {
                Some(task) => Some(self.task_ref(task)?),
                None => None,
            };
        }

        if mode == Mode::Start {
            ctx.draft_tasks = self.drafts()?;
            ctx.epics = self.store.epics()?.iter().map(EpicRef::from).collect();
            ctx.skills = self.assembler.list_skills()?;
        }

        if mode == Mode::Complete {
            ctx.vcs = Some(VcsSnapshot::capture(self.vcs.as_ref(), &self.config.main_branch));
            ctx.private = Some(self.config.private);
        }

        if mode.carries_bundle() {
            let scope = match (&current, mode) {
                (Some(task), Mode::Research) => ContextScope::for_task(task),
                _ => ContextScope::default(),
            };
            ctx.bundle = Some(self.assemble(&scope)?);
            ctx.memories = self.assembler.list_memories()?;
            ctx.files_tree = self.history.files()?;
        }

        Ok(ctx)
    }
}

fn rel_string(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/")
}

fn ensure_slot_free(conn: &Connection, task_id: &str, from: &str) -> Result<()> {
    let others = tasks::in_progress_ids(conn, task_id)?;
    match others.first() {
        Some(blocking) => Err(RailsError::InvalidTransition {
            from: from.to_string(),
            to: TaskStatus::InProgress.to_string(),
            reason: format!("task {blocking} is already in progress"),
        }),
        None => Ok(()),
    }
}

/// Any version-control failure during completion carries the history line
/// that was already written.
fn vcs_failure(err: VcsError, step: &str, at: &HistoryRef) -> RailsError {
    let (command, stderr) = match err {
        VcsError::CommandFailed { command, stderr } => (command, stderr),
        VcsError::Unavailable(reason) => (step.to_string(), reason),
        VcsError::Io(e) => (step.to_string(), e.to_string()),
    };
    tracing::warn!(%command, history = %at, "completion stopped at version control");
    RailsError::VcsCommandFailed {
        command,
        stderr,
        history: Some(at.clone()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
