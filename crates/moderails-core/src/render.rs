//! Mode records handed to the rendering collaborator.
//!
//! The core never formats prompts itself. It builds a [`ModeContext`] and a
//! [`Renderer`] turns that into text; the CLI supplies the implementation.

use crate::context::ContextBundle;
use crate::epic::Epic;
use crate::error::{RailsError, Result};
use crate::task::Task;
use crate::types::{TaskStatus, TaskType};
use crate::vcs::VcsSnapshot;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Start,
    Research,
    Brainstorm,
    Plan,
    Execute,
    Complete,
    Abort,
    Fast,
}

impl Mode {
    pub fn all() -> &'static [Mode] {
        &[
            Mode::Start,
            Mode::Research,
            Mode::Brainstorm,
            Mode::Plan,
            Mode::Execute,
            Mode::Complete,
            Mode::Abort,
            Mode::Fast,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Start => "start",
            Mode::Research => "research",
            Mode::Brainstorm => "brainstorm",
            Mode::Plan => "plan",
            Mode::Execute => "execute",
            Mode::Complete => "complete",
            Mode::Abort => "abort",
            Mode::Fast => "fast",
        }
    }

    /// Modes that operate on the current task.
    pub fn needs_task(self) -> bool {
        !matches!(self, Mode::Start | Mode::Fast)
    }

    /// Modes that carry the full context bundle.
    pub fn carries_bundle(self) -> bool {
        matches!(self, Mode::Research | Mode::Fast)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = RailsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Mode::all()
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| RailsError::InvalidField {
                field: "mode".to_string(),
                reason: format!("unknown mode '{s}'"),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpicRef {
    pub id: String,
    pub name: String,
}

impl From<&Epic> for EpicRef {
    fn from(epic: &Epic) -> Self {
        Self {
            id: epic.id.clone(),
            name: epic.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRef {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub plan_file: Option<String>,
    pub epic: Option<EpicRef>,
}

impl TaskRef {
    pub fn new(task: &Task, epic: Option<&Epic>) -> Self {
        Self {
            id: task.id.clone(),
            name: task.name.clone(),
            status: task.status,
            task_type: task.task_type,
            plan_file: task.plan_file.clone(),
            epic: epic.map(EpicRef::from),
        }
    }

    pub fn has_plan_file(&self) -> bool {
        self.plan_file.is_some()
    }
}

/// Everything a mode template may need. Fields a mode does not use stay
/// empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeContext {
    pub mode: Mode,
    pub flags: Vec<String>,
    pub project_root: String,
    pub current_task: Option<TaskRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub draft_tasks: Vec<TaskRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub epics: Vec<EpicRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcs: Option<VcsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<ContextBundle>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub memories: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files_tree: Vec<String>,
}

impl ModeContext {
    pub fn new(mode: Mode, flags: Vec<String>, project_root: String) -> Self {
        Self {
            mode,
            flags,
            project_root,
            current_task: None,
            draft_tasks: Vec::new(),
            epics: Vec::new(),
            skills: Vec::new(),
            vcs: None,
            private: None,
            bundle: None,
            memories: Vec::new(),
            files_tree: Vec::new(),
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

pub trait Renderer {
    fn render(&self, template_id: &str, ctx: &ModeContext) -> Result<String>;
}
