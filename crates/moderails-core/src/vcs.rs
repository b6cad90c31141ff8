//! Version control adapter.
//!
//! The engine only talks to the [`Vcs`] trait. [`GitCli`] shells out to the
//! `git` binary; [`NoVcs`] stands in when the project has no repository, in
//! which case completion skips the commit step instead of failing.

use crate::error::RailsError;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("{0}")]
    Unavailable(String),

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<VcsError> for RailsError {
    fn from(err: VcsError) -> Self {
        match err {
            VcsError::Unavailable(reason) => RailsError::VcsUnavailable(reason),
            VcsError::CommandFailed { command, stderr } => RailsError::VcsCommandFailed {
                command,
                stderr,
                history: None,
            },
            VcsError::Io(e) => RailsError::Io(e),
        }
    }
}

pub type VcsResult<T> = std::result::Result<T, VcsError>;

pub trait Vcs {
    /// Short name for logs and status output.
    fn name(&self) -> &'static str;

    /// Whether there is a repository behind the project at all.
    fn is_repo(&self) -> bool;

    fn current_branch(&self) -> VcsResult<String>;

    fn staged_files(&self) -> VcsResult<Vec<String>>;

    /// Modified tracked files not yet staged, plus untracked files.
    fn unstaged_files(&self) -> VcsResult<Vec<String>>;

    fn stage(&self, path: &Path) -> VcsResult<()>;

    /// Commit the index and return the new commit id.
    fn commit(&self, message: &str) -> VcsResult<String>;

    /// Id of the commit currently checked out.
    fn head(&self) -> VcsResult<String>;

    /// Contents of `path` as recorded in the checked-out commit, or `None`
    /// when that commit does not track it.
    fn committed_content(&self, path: &Path) -> VcsResult<Option<String>>;
}

// ---------------------------------------------------------------------------
// GitCli
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GitCli {
    work_dir: PathBuf,
}

impl GitCli {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    fn git(&self, args: &[&str]) -> VcsResult<String> {
        tracing::debug!(args = ?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.work_dir)
            .output()?;

        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn file_list(&self, args: &[&str]) -> VcsResult<Vec<String>> {
        Ok(self
            .git(args)?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

impl Vcs for GitCli {
    fn name(&self) -> &'static str {
        "git"
    }

    fn is_repo(&self) -> bool {
        self.git(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out == "true")
            .unwrap_or(false)
    }

    fn current_branch(&self) -> VcsResult<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn staged_files(&self) -> VcsResult<Vec<String>> {
        self.file_list(&["diff", "--cached", "--name-only"])
    }

    fn unstaged_files(&self) -> VcsResult<Vec<String>> {
        let mut files = self.file_list(&["diff", "--name-only"])?;
        files.extend(self.file_list(&["ls-files", "--others", "--exclude-standard"])?);
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn stage(&self, path: &Path) -> VcsResult<()> {
        let path = path.to_string_lossy();
        self.git(&["add", "--", path.as_ref()])?;
        tracing::info!(path = %path, "staged");
        Ok(())
    }

    fn commit(&self, message: &str) -> VcsResult<String> {
        self.git(&["commit", "-m", message])?;
        let id = self.head()?;
        tracing::info!(commit = %id, "committed");
        Ok(id)
    }

    fn head(&self) -> VcsResult<String> {
        self.git(&["rev-parse", "HEAD"])
    }

    fn committed_content(&self, path: &Path) -> VcsResult<Option<String>> {
        let rel = path.strip_prefix(&self.work_dir).unwrap_or(path);
        let spec = format!("HEAD:./{}", rel.to_string_lossy());
        match self.git(&["show", spec.as_str()]) {
            Ok(content) => Ok(Some(content)),
            // Untracked at HEAD, or no commits yet.
            Err(VcsError::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// NoVcs
// ---------------------------------------------------------------------------

/// Adapter for projects without a repository (or without `git` installed).
#[derive(Debug, Clone)]
pub struct NoVcs {
    reason: String,
}

impl NoVcs {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable<T>(&self) -> VcsResult<T> {
        Err(VcsError::Unavailable(self.reason.clone()))
    }
}

impl Vcs for NoVcs {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_repo(&self) -> bool {
        false
    }

    fn current_branch(&self) -> VcsResult<String> {
        self.unavailable()
    }

    fn staged_files(&self) -> VcsResult<Vec<String>> {
        self.unavailable()
    }

    fn unstaged_files(&self) -> VcsResult<Vec<String>> {
        self.unavailable()
    }

    fn stage(&self, _path: &Path) -> VcsResult<()> {
        self.unavailable()
    }

    fn commit(&self, _message: &str) -> VcsResult<String> {
        self.unavailable()
    }

    fn head(&self) -> VcsResult<String> {
        self.unavailable()
    }

    fn committed_content(&self, _path: &Path) -> VcsResult<Option<String>> {
        self.unavailable()
    }
}

/// Pick the adapter for `root`: git when the binary exists and `root` is
/// inside a work tree, otherwise [`NoVcs`].
pub fn detect(root: &Path) -> Box<dyn Vcs> {
    if which::which("git").is_err() {
        tracing::debug!("git not found on PATH");
        return Box::new(NoVcs::new("git is not installed"));
    }
    let git = GitCli::new(root);
    if git.is_repo() {
        Box::new(git)
    } else {
        tracing::debug!(root = %root.display(), "not a git work tree");
        Box::new(NoVcs::new(format!("{} is not a git repository", root.display())))
    }
}

// ---------------------------------------------------------------------------
// VcsSnapshot
// ---------------------------------------------------------------------------

/// Informational view of the working tree. Read failures are logged and
/// leave the affected fields empty.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct VcsSnapshot {
    pub available: bool,
    pub branch: Option<String>,
    pub is_main: bool,
    pub staged: Vec<String>,
    pub unstaged: Vec<String>,
}

impl VcsSnapshot {
    pub fn capture(vcs: &dyn Vcs, main_branch: &str) -> Self {
        if !vcs.is_repo() {
            return Self::default();
        }
        let branch = ok_or_log(vcs.current_branch(), "current branch");
        Self {
            available: true,
            is_main: branch.as_deref() == Some(main_branch),
            branch,
            staged: ok_or_log(vcs.staged_files(), "staged files").unwrap_or_default(),
            unstaged: ok_or_log(vcs.unstaged_files(), "unstaged files").unwrap_or_default(),
        }
    }
}

fn ok_or_log<T>(res: VcsResult<T>, what: &str) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(error = %e, "could not read {what}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    fn init_repo(dir: &Path) {
        let steps: [&[&str]; 5] = [
            &["init", "-q"],
            &["symbolic-ref", "HEAD", "refs/heads/main"],
            &["config", "user.email", "dev@example.com"],
            &["config", "user.name", "Dev"],
            &["config", "commit.gpgsign", "false"],
        ];
        for args in steps {
            let ok = Command::new("git")
                .args(args)
                .current_dir(dir)
                .status()
                .unwrap()
                .success();
            assert!(ok, "git {args:?} failed");
        }
    }

    #[test]
    fn no_vcs_reports_unavailable() {
        let vcs = NoVcs::new("no repo");
        assert!(!vcs.is_repo());
        let err: RailsError = vcs.commit("msg").unwrap_err().into();
        assert!(matches!(err, RailsError::VcsUnavailable(_)));
        assert_eq!(VcsSnapshot::capture(&vcs, "main"), VcsSnapshot::default());
    }

    #[test]
    fn command_failure_maps_to_typed_error() {
        let err: RailsError = VcsError::CommandFailed {
            command: "git commit".into(),
            stderr: "nothing to commit".into(),
        }
        .into();
        match err {
            RailsError::VcsCommandFailed { command, history, .. } => {
                assert_eq!(command, "git commit");
                assert!(history.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn detect_outside_repo_is_no_vcs() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let vcs = detect(dir.path());
        assert_eq!(vcs.name(), "none");
    }

    #[test]
    fn git_stage_commit_and_read_back() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let git = GitCli::new(dir.path());
        assert!(git.is_repo());

        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        assert_eq!(git.unstaged_files().unwrap(), vec!["a.txt"]);
        assert!(git.staged_files().unwrap().is_empty());

        git.stage(&dir.path().join("a.txt")).unwrap();
        assert_eq!(git.staged_files().unwrap(), vec!["a.txt"]);

        let id = git.commit("chore: first").unwrap();
        assert_eq!(id.len(), 40);
        assert_eq!(git.head().unwrap(), id);
        assert_eq!(
            git.committed_content(&dir.path().join("a.txt")).unwrap().as_deref(),
            Some("one")
        );
        assert_eq!(git.committed_content(&dir.path().join("b.txt")).unwrap(), None);
        assert_eq!(git.current_branch().unwrap(), "main");

        let snap = VcsSnapshot::capture(&git, "main");
        assert!(snap.available);
        assert!(snap.is_main);
        assert!(snap.staged.is_empty());
    }

    #[test]
    fn empty_commit_fails() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let git = GitCli::new(dir.path());
        assert!(matches!(
            git.commit("nothing"),
            Err(VcsError::CommandFailed { .. })
        ));
    }
}
