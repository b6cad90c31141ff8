use crate::error::{RailsError, Result};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const MODERAILS_DIR: &str = ".moderails";
pub const MANDATORY_DIR: &str = ".moderails/context/mandatory";
pub const TAGS_DIR: &str = ".moderails/context/tags";
pub const MEMORIES_DIR: &str = ".moderails/context/memories";
pub const SKILLS_DIR: &str = ".moderails/skills";
pub const TASKS_DIR: &str = ".moderails/tasks";

pub const CONFIG_FILE: &str = ".moderails/config.yaml";
pub const DB_FILE: &str = ".moderails/moderails.db";
pub const HISTORY_FILE: &str = ".moderails/history.jsonl";
pub const CONTEXT_README: &str = ".moderails/context/README.md";
pub const LOCAL_GITIGNORE: &str = ".moderails/.gitignore";

pub const SKILL_FILE: &str = "SKILL.md";
pub const STANDALONE_PLAN_DIR: &str = "standalone";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

pub fn history_path(root: &Path) -> PathBuf {
    root.join(HISTORY_FILE)
}

pub fn skill_file(root: &Path, skill: &str) -> PathBuf {
    root.join(SKILLS_DIR).join(skill).join(SKILL_FILE)
}

/// Plan file path relative to the project root.
pub fn plan_file(epic_name: Option<&str>, task_name: &str, task_id: &str) -> PathBuf {
    let group = epic_name
        .map(sanitize_name)
        .unwrap_or_else(|| STANDALONE_PLAN_DIR.to_string());
    Path::new(TASKS_DIR)
        .join(group)
        .join(format!("{}-{task_id}.md", sanitize_name(task_name)))
}

/// Plan paths are stored relative to the project root and must stay inside
/// the tasks directory: no absolute paths, no `.` or `..` segments.
pub fn validate_plan_path(rel: &Path) -> Result<()> {
    let plain = rel.components().all(|c| matches!(c, Component::Normal(_)));
    if !plain || !rel.starts_with(TASKS_DIR) || rel == Path::new(TASKS_DIR) {
        return Err(RailsError::InvalidField {
            field: "plan_file".to_string(),
            reason: format!("{} is not a file under {TASKS_DIR}/", rel.display()),
        });
    }
    Ok(())
}

/// Lowercase, hyphen-separated form of a free-text name, safe as a file stem.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("task");
    }
    out
}

// ---------------------------------------------------------------------------
// Tag / skill validation
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").expect("static regex compiles")
    })
}

/// Tags and skills name directories on disk, so they share one strict shape.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() || tag.len() > 64 || !slug_re().is_match(tag) {
        return Err(RailsError::InvalidTag(tag.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
