//! Context assembly.
//!
//! Knowledge sources live as markdown under `.moderails/`:
//!
//! ```text
//! context/mandatory/*.md      always included
//! context/tags/<tag>/*.md     included when the epic declares <tag>
//! context/memories/*.md       loaded by name on request
//! skills/<skill>/SKILL.md     included when the epic declares <skill>
//! ```
//!
//! Entry ids are the path below those roots without the extension, e.g.
//! `mandatory/conventions`, `tags/auth/oauth`, `memories/db-layout`,
//! `skills/testing`. Epic history entries use `history/<task-id>`.

use crate::error::{RailsError, Result};
use crate::history::{query_terms, HistoryLog};
use crate::paths;
use crate::store::Store;
use crate::task::Task;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Mandatory,
    Tag,
    Skill,
    EpicHistory,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    pub kind: SourceKind,
    pub id: String,
    pub content: String,
}

/// Ordered, duplicate-free sequence of context entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextBundle {
    pub entries: Vec<ContextEntry>,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    /// Push unless an entry with the same id is already present.
    fn push(&mut self, kind: SourceKind, id: String, content: String) -> bool {
        if self.contains(&id) {
            tracing::debug!(id = %id, "skipping duplicate context entry");
            return false;
        }
        self.entries.push(ContextEntry { kind, id, content });
        true
    }
}

/// What to assemble context for.
#[derive(Debug, Clone)]
pub struct ContextScope {
    pub epic_id: Option<String>,
    /// Explicit load-by-name requests, emitted last in request order.
    pub names: Vec<String>,
    pub include_mandatory: bool,
}

impl Default for ContextScope {
    fn default() -> Self {
        Self {
            epic_id: None,
            names: Vec::new(),
            include_mandatory: true,
        }
    }
}

impl ContextScope {
    pub fn for_epic(epic_id: impl Into<String>) -> Self {
        Self {
            epic_id: Some(epic_id.into()),
            ..Self::default()
        }
    }

    pub fn for_task(task: &Task) -> Self {
        Self {
            epic_id: task.epic_id.clone(),
            ..Self::default()
        }
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }
}

/// A matching line from [`ContextAssembler::search`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextMatch {
    pub id: String,
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    root: PathBuf,
}

impl ContextAssembler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn mandatory_dir(&self) -> PathBuf {
        self.root.join(paths::MANDATORY_DIR)
    }

    fn tags_dir(&self) -> PathBuf {
        self.root.join(paths::TAGS_DIR)
    }

    fn memories_dir(&self) -> PathBuf {
        self.root.join(paths::MEMORIES_DIR)
    }

    fn skills_dir(&self) -> PathBuf {
        self.root.join(paths::SKILLS_DIR)
    }

    /// Build the bundle for `scope`: mandatory entries (lexical), tag entries
    /// in epic declaration order, skills in declaration order, the epic's
    /// completed tasks oldest first, then named loads.
    pub fn assemble(
        &self,
        store: &Store,
        history: &HistoryLog,
        scope: &ContextScope,
    ) -> Result<ContextBundle> {
        let mut bundle = ContextBundle::default();

        if scope.include_mandatory {
            for (id, content) in self.mandatory()? {
                bundle.push(SourceKind::Mandatory, id, content);
            }
        }

        if let Some(epic_id) = &scope.epic_id {
            let epic = store.require_epic(epic_id)?;
            for tag in &epic.tags {
                for (id, content) in self.tag_entries(tag)? {
                    bundle.push(SourceKind::Tag, id, content);
                }
            }
            for skill in &epic.skills {
                match self.read_skill(skill)? {
                    Some(content) => {
                        bundle.push(SourceKind::Skill, format!("skills/{skill}"), content);
                    }
                    None => tracing::warn!(skill = %skill, epic = %epic.id, "skill file missing"),
                }
            }
            for task in store.completed_tasks_for_epic(&epic.id)? {
                let files = history
                    .find(&task.id)?
                    .map(|(_, entry)| entry.files_changed)
                    .unwrap_or_default();
                bundle.push(
                    SourceKind::EpicHistory,
                    format!("history/{}", task.id),
                    synthesize(&task, &files),
                );
            }
        }

        for name in &scope.names {
            let entry = self.load_named(name)?;
            bundle.push(entry.kind, entry.id, entry.content);
        }

        Ok(bundle)
    }

    /// Resolve a load-by-name request. Bare names are memories; qualified ids
    /// (`mandatory/x`, `tags/t/x`, `memories/x`, `skills/s`) address any source.
    /// The entry keeps the kind of the source it was read from.
    pub fn load_named(&self, name: &str) -> Result<ContextEntry> {
        let name = name.trim().trim_end_matches(".md");
        let id = if name.contains('/') {
            name.to_string()
        } else {
            format!("memories/{name}")
        };
        let (kind, path) = self.source_for_id(&id).ok_or_else(|| unknown_entry(&id))?;
        match read_markdown(&path)? {
            Some(content) => Ok(ContextEntry { kind, id, content }),
            None => Err(unknown_entry(&id)),
        }
    }

    fn source_for_id(&self, id: &str) -> Option<(SourceKind, PathBuf)> {
        let (head, rest) = id.split_once('/')?;
        if rest.is_empty() || rest.split('/').any(|seg| seg.is_empty() || seg == "..") {
            return None;
        }
        let source = match head {
            "mandatory" => (SourceKind::Mandatory, self.mandatory_dir().join(format!("{rest}.md"))),
            "tags" => (SourceKind::Tag, self.tags_dir().join(format!("{rest}.md"))),
            "memories" => (SourceKind::Memory, self.memories_dir().join(format!("{rest}.md"))),
            "skills" => (SourceKind::Skill, self.skills_dir().join(rest).join(paths::SKILL_FILE)),
            _ => return None,
        };
        Some(source)
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    pub fn mandatory(&self) -> Result<Vec<(String, String)>> {
        markdown_entries(&self.mandatory_dir(), "mandatory")
    }

    fn tag_entries(&self, tag: &str) -> Result<Vec<(String, String)>> {
        markdown_entries(&self.tags_dir().join(tag), &format!("tags/{tag}"))
    }

    fn read_skill(&self, skill: &str) -> Result<Option<String>> {
        read_markdown(&paths::skill_file(&self.root, skill))
    }

    pub fn list_mandatory(&self) -> Result<Vec<String>> {
        markdown_stems(&self.mandatory_dir())
    }

    pub fn list_memories(&self) -> Result<Vec<String>> {
        markdown_stems(&self.memories_dir())
    }

    pub fn list_tags(&self) -> Result<Vec<String>> {
        subdirs(&self.tags_dir())
    }

    /// Skills with a `SKILL.md`.
    pub fn list_skills(&self) -> Result<Vec<String>> {
        Ok(subdirs(&self.skills_dir())?
            .into_iter()
            .filter(|s| paths::skill_file(&self.root, s).is_file())
            .collect())
    }

    pub fn skill_exists(&self, skill: &str) -> bool {
        paths::skill_file(&self.root, skill).is_file()
    }

    /// Case-insensitive line search over every context source; `|` separates
    /// OR terms.
    pub fn search(&self, query: &str) -> Result<Vec<ContextMatch>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut sources: Vec<(String, PathBuf)> = Vec::new();
        for stem in markdown_stems(&self.mandatory_dir())? {
            sources.push((format!("mandatory/{stem}"), self.mandatory_dir().join(format!("{stem}.md"))));
        }
        for tag in self.list_tags()? {
            let dir = self.tags_dir().join(&tag);
            for stem in markdown_stems(&dir)? {
                sources.push((format!("tags/{tag}/{stem}"), dir.join(format!("{stem}.md"))));
            }
        }
        for stem in markdown_stems(&self.memories_dir())? {
            sources.push((format!("memories/{stem}"), self.memories_dir().join(format!("{stem}.md"))));
        }
        for skill in self.list_skills()? {
            sources.push((format!("skills/{skill}"), paths::skill_file(&self.root, &skill)));
        }

        let mut matches = Vec::new();
        for (id, path) in sources {
            let data = std::fs::read_to_string(&path)?;
            for (idx, line) in data.lines().enumerate() {
                let lower = line.to_lowercase();
                if terms.iter().any(|t| lower.contains(t.as_str())) {
                    matches.push(ContextMatch {
                        id: id.clone(),
                        line: idx + 1,
                        text: line.trim().to_string(),
                    });
                }
            }
        }
        Ok(matches)
    }
}

/// Compact stand-in for a completed task: summary plus changed files.
fn synthesize(task: &Task, files: &[String]) -> String {
    let mut out = format!("{} ({}, {})", task.name, task.task_type, task.id);
    if let Some(summary) = &task.summary {
        out.push('\n');
        out.push_str(summary);
    }
    if !files.is_empty() {
        out.push_str("\nFiles: ");
        out.push_str(&files.join(", "));
    }
    out
}

fn unknown_entry(id: &str) -> RailsError {
    RailsError::InvalidField {
        field: "context".to_string(),
        reason: format!("no context entry '{id}'"),
    }
}

/// Content of a markdown file; `None` when missing or whitespace-only.
fn read_markdown(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(s) if s.trim().is_empty() => Ok(None),
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn markdown_stems(dir: &Path) -> Result<Vec<String>> {
    let mut stems = Vec::new();
    if !dir.is_dir() {
        return Ok(stems);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "md") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }
    }
    stems.sort();
    Ok(stems)
}

fn markdown_entries(dir: &Path, prefix: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for stem in markdown_stems(dir)? {
        if let Some(content) = read_markdown(&dir.join(format!("{stem}.md")))? {
            out.push((format!("{prefix}/{stem}"), content));
        }
    }
    Ok(out)
}

fn subdirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    if !dir.is_dir() {
        return Ok(names);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epic::Epic;
    use crate::history::HistoryEntry;
    use crate::store::{epics, tasks};
    use crate::types::{TaskStatus, TaskType};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: Store,
        history: HistoryLog,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let history = HistoryLog::new(paths::history_path(dir.path()));
            Self {
                dir,
                store: Store::open_in_memory().unwrap(),
                history,
            }
        }

        fn write(&self, rel: &str, content: &str) {
            let path = self.dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        fn assembler(&self) -> ContextAssembler {
            ContextAssembler::new(self.dir.path())
        }
    }

    fn completed(epic: &Epic, name: &str, ago_secs: i64) -> Task {
        let mut t = Task::new(name, TaskType::Feature, TaskStatus::Completed);
        t.epic_id = Some(epic.id.clone());
        t.summary = Some(format!("{name} done"));
        t.completed_at = Some(Utc::now() - Duration::seconds(ago_secs));
        t
    }

    #[test]
    fn bundle_order_is_mandatory_tags_skills_history_named() {
        let mut fx = Fixture::new();
        fx.write(".moderails/context/mandatory/b-style.md", "style");
        fx.write(".moderails/context/mandatory/a-arch.md", "arch");
        fx.write(".moderails/context/mandatory/blank.md", "  \n");
        fx.write(".moderails/context/tags/auth/oauth.md", "oauth");
        fx.write(".moderails/context/tags/payments/stripe.md", "stripe");
        fx.write(".moderails/context/tags/unused/x.md", "never");
        fx.write(".moderails/skills/testing/SKILL.md", "test well");
        fx.write(".moderails/context/memories/db.md", "db notes");

        let mut epic = Epic::new("Checkout");
        epic.add_tag("auth").unwrap();
        epic.add_tag("payments").unwrap();
        epic.add_skill("testing").unwrap();
        let newer = completed(&epic, "Second", 10);
        let older = completed(&epic, "First", 100);
        fx.store
            .write(|tx| {
                epics::insert(tx, &epic)?;
                tasks::insert(tx, &newer)?;
                tasks::insert(tx, &older)
            })
            .unwrap();
        fx.history
            .append(&HistoryEntry::for_task(&older, vec!["src/a.rs".into()], Utc::now()))
            .unwrap();

        let scope = ContextScope::for_epic(&epic.id).with_names(["db", "mandatory/a-arch"]);
        let bundle = fx.assembler().assemble(&fx.store, &fx.history, &scope).unwrap();

        let older_id = format!("history/{}", older.id);
        let newer_id = format!("history/{}", newer.id);
        assert_eq!(
            bundle.ids(),
            vec![
                "mandatory/a-arch",
                "mandatory/b-style",
                "tags/auth/oauth",
                "tags/payments/stripe",
                "skills/testing",
                older_id.as_str(),
                newer_id.as_str(),
                "memories/db",
            ]
        );
        let first = bundle.entries.iter().find(|e| e.id == older_id).unwrap();
        assert!(first.content.contains("First done"));
        assert!(first.content.contains("src/a.rs"));
    }

    #[test]
    fn unknown_named_entry_is_an_error() {
        let fx = Fixture::new();
        let scope = ContextScope::default().with_names(["missing"]);
        let err = fx.assembler().assemble(&fx.store, &fx.history, &scope).unwrap_err();
        assert!(matches!(err, RailsError::InvalidField { .. }));
    }

    #[test]
    fn named_loads_keep_their_source_kind() {
        let fx = Fixture::new();
        fx.write(".moderails/context/mandatory/arch.md", "arch");
        fx.write(".moderails/context/tags/auth/oauth.md", "oauth");
        fx.write(".moderails/context/memories/db.md", "db");
        fx.write(".moderails/skills/testing/SKILL.md", "test");

        let scope = ContextScope::default().with_names(["tags/auth/oauth", "skills/testing", "db"]);
        let bundle = fx.assembler().assemble(&fx.store, &fx.history, &scope).unwrap();
        let kinds: Vec<(&str, SourceKind)> = bundle
            .entries
            .iter()
            .map(|e| (e.id.as_str(), e.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("mandatory/arch", SourceKind::Mandatory),
                ("tags/auth/oauth", SourceKind::Tag),
                ("skills/testing", SourceKind::Skill),
                ("memories/db", SourceKind::Memory),
            ]
        );

        let entry = fx.assembler().load_named("mandatory/arch").unwrap();
        assert_eq!(entry.kind, SourceKind::Mandatory);
        assert_eq!(entry.content, "arch");
    }

    #[test]
    fn path_traversal_is_rejected() {
        let fx = Fixture::new();
        assert!(fx.assembler().load_named("memories/../../secret").is_err());
        assert!(fx.assembler().load_named("other/x").is_err());
    }

    #[test]
    fn listings_are_sorted() {
        let fx = Fixture::new();
        fx.write(".moderails/context/memories/zeta.md", "z");
        fx.write(".moderails/context/memories/alpha.md", "a");
        fx.write(".moderails/context/tags/web/a.md", "a");
        fx.write(".moderails/skills/deploy/SKILL.md", "d");
        std::fs::create_dir_all(fx.dir.path().join(".moderails/skills/empty")).unwrap();

        let asm = fx.assembler();
        assert_eq!(asm.list_memories().unwrap(), vec!["alpha", "zeta"]);
        assert_eq!(asm.list_tags().unwrap(), vec!["web"]);
        assert_eq!(asm.list_skills().unwrap(), vec!["deploy"]);
        assert!(asm.skill_exists("deploy"));
        assert!(!asm.skill_exists("empty"));
    }

    #[test]
    fn search_reports_line_numbers() {
        let fx = Fixture::new();
        fx.write(".moderails/context/mandatory/rules.md", "intro\nUse SQLite\nend");
        fx.write(".moderails/context/memories/db.md", "sqlite is bundled");

        let hits = fx.assembler().search("sqlite").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "mandatory/rules");
        assert_eq!(hits[0].line, 2);
        assert_eq!(hits[1].id, "memories/db");
    }
}
