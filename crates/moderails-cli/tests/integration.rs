#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn moderails(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("moderails").unwrap();
    cmd.current_dir(dir.path())
        .env("MODERAILS_ROOT", dir.path())
        .env("GIT_CEILING_DIRECTORIES", dir.path().parent().unwrap())
        .env_remove("RUST_LOG");
    cmd
}

fn init_project(dir: &TempDir) {
    moderails(dir).arg("init").assert().success();
}

fn json_of(cmd: &mut Command) -> Value {
    let out = cmd.arg("--json").assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).unwrap()
}

fn create_task(dir: &TempDir, args: &[&str]) -> String {
    let value = json_of(moderails(dir).args(["task", "create", "--no-context"]).args(args));
    value["task"]["id"].as_str().unwrap().to_string()
}

fn write(dir: &TempDir, rel: &str, content: &str) {
    let path = dir.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

// ---------------------------------------------------------------------------
// moderails init / migrate / config
// ---------------------------------------------------------------------------

#[test]
fn init_creates_layout() {
    let dir = TempDir::new().unwrap();
    moderails(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized moderails"));

    assert!(dir.path().join(".moderails/config.yaml").is_file());
    assert!(dir.path().join(".moderails/moderails.db").is_file());
    assert!(dir.path().join(".moderails/history.jsonl").is_file());
    assert!(dir.path().join(".moderails/context/mandatory").is_dir());
    assert!(dir.path().join(".moderails/skills").is_dir());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    moderails(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Already initialized"));
}

#[test]
fn private_init_gitignores_moderails_dir() {
    let dir = TempDir::new().unwrap();
    moderails(&dir).args(["init", "--private"]).assert().success();
    let ignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert!(ignore.lines().any(|l| l == ".moderails/"));

    let config = json_of(moderails(&dir).args(["config", "show"]));
    assert_eq!(config["private"], true);
}

#[test]
fn commands_before_init_fail() {
    let dir = TempDir::new().unwrap();
    moderails(&dir)
        .args(["task", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn migrate_and_validate_on_fresh_project() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    moderails(&dir)
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("up to date"));
    moderails(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

// ---------------------------------------------------------------------------
// moderails task
// ---------------------------------------------------------------------------

#[test]
fn task_create_list_load() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let id = create_task(&dir, &["--name", "Add login form", "-t", "feature"]);

    moderails(&dir)
        .args(["task", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Add login form"))
        .stdout(predicate::str::contains("in-progress"));

    let loaded = json_of(moderails(&dir).args(["task", "load", "--id", &id]));
    assert_eq!(loaded["task"]["name"], "Add login form");
    assert_eq!(loaded["task"]["type"], "feature");
    let plan = loaded["task"]["plan_file"].as_str().unwrap();
    assert!(dir.path().join(plan).is_file());
    assert!(loaded["plan"].as_str().unwrap().contains("# Add login form"));
}

#[test]
fn only_one_task_in_progress() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_task(&dir, &["--name", "first"]);

    moderails(&dir)
        .args(["task", "create", "--name", "second"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already in progress"));

    let draft = create_task(&dir, &["--name", "second", "--status", "draft"]);
    moderails(&dir)
        .args(["task", "start", "--id", &draft])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already in progress"));
}

#[test]
fn invalid_type_is_rejected() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    moderails(&dir)
        .args(["task", "create", "--name", "x", "--type", "epic"])
        .assert()
        .failure();
}

#[test]
fn complete_without_repository_records_history() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let id = create_task(&dir, &["--name", "Fix crash", "-t", "fix"]);

    let done = json_of(moderails(&dir).args([
        "task", "complete", "--id", &id, "-s", "null check on empty input",
    ]));
    assert_eq!(done["outcome"], "recorded");
    assert_eq!(done["task"]["status"], "completed");
    assert!(done["task"].get("commit").is_none());

    let history = std::fs::read_to_string(dir.path().join(".moderails/history.jsonl")).unwrap();
    assert_eq!(history.lines().count(), 1);
    assert!(history.contains(&id));
    assert!(history.contains("null check on empty input"));

    let again = json_of(moderails(&dir).args(["task", "complete", "--id", &id]));
    assert_eq!(again["outcome"], "already_completed");
    let history = std::fs::read_to_string(dir.path().join(".moderails/history.jsonl")).unwrap();
    assert_eq!(history.lines().count(), 1);
}

#[test]
fn draft_cannot_be_completed() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let id = create_task(&dir, &["--name", "later", "--status", "draft"]);
    moderails(&dir)
        .args(["task", "complete", "--id", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid transition"));
}

#[test]
fn completed_task_is_immutable() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let id = create_task(&dir, &["--name", "done soon"]);
    moderails(&dir)
        .args(["task", "update", "--id", &id, "--commit", "abc123"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("commit"));

    moderails(&dir).args(["task", "complete", "--id", &id]).assert().success();
    moderails(&dir)
        .args(["task", "update", "--id", &id, "--name", "renamed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("can no longer change"));

    // Back-filling a missing commit id is allowed.
    let task = json_of(moderails(&dir).args(["task", "update", "--id", &id, "--commit", "abc123"]));
    assert_eq!(task["commit"], "abc123");
}

#[test]
fn delete_requires_confirm() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let id = create_task(&dir, &["--name", "throwaway"]);

    moderails(&dir)
        .args(["task", "delete", "--id", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("--confirm"));
    moderails(&dir).args(["task", "load", "--id", &id]).assert().success();

    moderails(&dir)
        .args(["task", "delete", "--id", &id, "--confirm"])
        .assert()
        .success();
    moderails(&dir)
        .args(["task", "load", "--id", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task not found"));
}

// ---------------------------------------------------------------------------
// moderails epic
// ---------------------------------------------------------------------------

#[test]
fn epic_lifecycle() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    moderails(&dir)
        .args(["epic", "create", "--name", "auth", "--tag", "backend"])
        .assert()
        .success();
    moderails(&dir)
        .args(["epic", "create", "--name", "auth"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    let id = create_task(&dir, &["--name", "login", "--epic", "auth"]);

    moderails(&dir)
        .args(["epic", "delete", "--id", "auth", "--confirm"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(id.as_str()));

    moderails(&dir).args(["task", "complete", "--id", &id]).assert().success();
    let loaded = json_of(moderails(&dir).args(["epic", "load", "--id", "auth"]));
    assert_eq!(loaded["progress"]["completed"], 1);
    assert_eq!(loaded["complete"], true);

    moderails(&dir)
        .args(["epic", "delete", "--id", "auth", "--confirm"])
        .assert()
        .success();
    moderails(&dir)
        .args(["epic", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No epics."));
}

#[test]
fn epic_force_delete_detaches_open_tasks() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    moderails(&dir).args(["epic", "create", "--name", "infra"]).assert().success();
    let id = create_task(&dir, &["--name", "ci cache", "--epic", "infra"]);

    moderails(&dir)
        .args(["epic", "delete", "--id", "infra", "--confirm", "--force"])
        .assert()
        .success();
    let loaded = json_of(moderails(&dir).args(["task", "load", "--id", &id]));
    assert!(loaded["task"].get("epic_id").is_none());
}

#[test]
fn epic_skills_must_exist() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    moderails(&dir)
        .args(["epic", "create", "--name", "ui", "--skill", "react"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown skill"));

    write(&dir, ".moderails/skills/react/SKILL.md", "Use hooks.");
    moderails(&dir)
        .args(["epic", "create", "--name", "ui", "--skill", "react"])
        .assert()
        .success();

    let bundle = json_of(moderails(&dir).args(["context", "load", "--epic", "ui"]));
    let entries = bundle["entries"].as_array().unwrap();
    assert!(entries.iter().any(|e| e["content"] == "Use hooks."));
}

// ---------------------------------------------------------------------------
// moderails context / history
// ---------------------------------------------------------------------------

#[test]
fn context_list_and_load() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    write(&dir, ".moderails/context/mandatory/style.md", "Prefer small functions.");
    write(&dir, ".moderails/context/memories/db-notes.md", "WAL mode is on.");

    let listed = json_of(moderails(&dir).args(["context", "list"]));
    assert_eq!(listed["mandatory"][0], "style");
    assert_eq!(listed["memories"][0], "db-notes");

    moderails(&dir)
        .args(["context", "load", "--memory", "db-notes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Prefer small functions."))
        .stdout(predicate::str::contains("WAL mode is on."));

    moderails(&dir)
        .args(["context", "load", "--memory", "missing"])
        .assert()
        .failure();

    moderails(&dir)
        .args(["context", "search", "wal|nothing"])
        .assert()
        .success()
        .stdout(predicate::str::contains("memories/db-notes"));
}

#[test]
fn history_search_and_file() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let id = create_task(&dir, &["--name", "Cache tokens"]);
    moderails(&dir)
        .args(["task", "complete", "--id", &id, "-s", "LRU in front of the token store"])
        .assert()
        .success();

    let hits = json_of(moderails(&dir).args(["history", "search", "lru|nope"]));
    assert_eq!(hits.as_array().unwrap().len(), 1);
    assert_eq!(hits[0]["id"], id.as_str());

    moderails(&dir)
        .args(["history", "file", "src/nowhere.rs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No history"));

    let synced = json_of(moderails(&dir).args(["history", "sync"]));
    assert_eq!(synced["imported"], 0);
}

#[test]
fn history_sync_restores_missing_tasks() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let id = create_task(&dir, &["--name", "Old work"]);
    moderails(&dir).args(["task", "complete", "--id", &id]).assert().success();

    // A fresh clone has history but no database.
    std::fs::remove_file(dir.path().join(".moderails/moderails.db")).unwrap();
    init_project(&dir);
    let synced = json_of(moderails(&dir).args(["history", "sync"]));
    assert_eq!(synced["imported"], 1);

    let tasks = json_of(moderails(&dir).args(["list", "--status", "completed"]));
    assert_eq!(tasks[0]["id"], id.as_str());
}

// ---------------------------------------------------------------------------
// moderails status / mode
// ---------------------------------------------------------------------------

#[test]
fn status_reports_current_task() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_task(&dir, &["--name", "Ship it"]);
    create_task(&dir, &["--name", "Later", "--status", "draft"]);

    let status = json_of(moderails(&dir).arg("status"));
    assert_eq!(status["current_task"]["name"], "Ship it");
    assert_eq!(status["draft_tasks"][0]["name"], "Later");
    assert_eq!(status["vcs"]["available"], false);
}

#[test]
fn mode_start_and_flags() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_task(&dir, &["--name", "Wire it up"]);

    moderails(&dir)
        .args(["mode", "start"])
        .assert()
        .success()
        .stdout(predicate::str::contains("# START mode"))
        .stdout(predicate::str::contains("Wire it up"));

    // Mode flags swallow everything after the name, so --json goes first.
    let out = moderails(&dir)
        .args(["--json", "mode", "execute", "--no-confirm"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let ctx: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(ctx["mode"], "execute");
    assert_eq!(ctx["flags"][0], "no-confirm");

    moderails(&dir)
        .args(["mode", "dance"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("mode"));
}

// ---------------------------------------------------------------------------
// Git-backed completion
// ---------------------------------------------------------------------------

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn git(dir: &TempDir, args: &[&str]) -> String {
    let out = std::process::Command::new("git")
        .args(args)
        .current_dir(dir.path())
        .env("GIT_CEILING_DIRECTORIES", dir.path().parent().unwrap())
        .output()
        .unwrap();
    assert!(out.status.success(), "git {args:?} failed");
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

#[test]
fn complete_in_repository_commits_history() {
    if !git_available() {
        eprintln!("skipping: git not installed");
        return;
    }
    let dir = TempDir::new().unwrap();
    git(&dir, &["init", "-q"]);
    git(&dir, &["config", "user.name", "Test"]);
    git(&dir, &["config", "user.email", "test@example.com"]);
    git(&dir, &["config", "commit.gpgsign", "false"]);
    init_project(&dir);

    let id = create_task(&dir, &["--name", "Add retries", "-t", "feature"]);
    write(&dir, "src/net.rs", "fn retry() {}\n");

    let done = json_of(moderails(&dir).args(["task", "complete", "--id", &id, "-s", "backoff"]));
    assert_eq!(done["outcome"], "committed");
    assert!(done["files_changed"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f == "src/net.rs"));

    let head = git(&dir, &["rev-parse", "HEAD"]);
    assert_eq!(done["task"]["commit"], head.as_str());
    assert_eq!(git(&dir, &["log", "-1", "--format=%s"]), "feat: Add retries - backoff");
}
