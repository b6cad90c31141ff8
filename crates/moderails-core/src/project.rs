//! Project bootstrap: `init`, `open`, `migrate`.

use crate::config::{Config, WarnLevel, CONFIG_VERSION};
use crate::engine::Engine;
use crate::error::{RailsError, Result};
use crate::io;
use crate::paths;
use crate::store::{migrations, Store, StoreOptions};
use crate::vcs;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONTEXT_README: &str = "\
# Context

Markdown here is handed to the assistant when it works on a task.

- `mandatory/*.md` is always loaded.
- `tags/<tag>/*.md` is loaded for epics that declare `<tag>`.
- `memories/*.md` is loaded on request by name.

Skills live in `../skills/<skill>/SKILL.md` and are loaded for epics that
declare them.
";

const LOCAL_GITIGNORE: &str = "moderails.db\nmoderails.db-journal\nmoderails.db-wal\nmoderails.db-shm\n";

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub root: PathBuf,
    /// False when the project was already initialized.
    pub created: bool,
    pub private: bool,
    pub schema_version: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub from: u32,
    pub to: u32,
    pub applied: Vec<u32>,
    pub config_upgraded: bool,
}

/// Create the `.moderails/` layout under `root`. Safe to run again: existing
/// files are kept, and `private` can be switched on later.
pub fn init(root: &Path, private: bool) -> Result<InitReport> {
    for dir in [
        paths::MANDATORY_DIR,
        paths::TAGS_DIR,
        paths::MEMORIES_DIR,
        paths::SKILLS_DIR,
        paths::TASKS_DIR,
    ] {
        io::ensure_dir(&root.join(dir))?;
    }

    let config_path = paths::config_path(root);
    let created = !config_path.exists();
    let mut config = if created {
        Config::default()
    } else {
        Config::load(root)?
    };
    if private && !config.private {
        config.private = true;
    }
    if created || private {
        config.save(root)?;
    }

    let store = open_store(root, &config)?;
    io::write_if_missing(&paths::history_path(root), b"")?;
    io::write_if_missing(&root.join(paths::CONTEXT_README), CONTEXT_README.as_bytes())?;
    io::write_if_missing(&root.join(paths::LOCAL_GITIGNORE), LOCAL_GITIGNORE.as_bytes())?;
    if config.private {
        io::ensure_gitignore_entry(root, &format!("{}/", paths::MODERAILS_DIR))?;
    }

    tracing::info!(root = %root.display(), created, private = config.private, "project initialized");
    Ok(InitReport {
        root: root.to_path_buf(),
        created,
        private: config.private,
        schema_version: store.schema_version()?,
    })
}

/// Load config, open the store (migrating it) and pick the VCS adapter.
pub fn open(root: &Path) -> Result<Engine> {
    let config = Config::load(root)?;
    for warning in config.validate() {
        match warning.level {
            WarnLevel::Error => tracing::error!("config: {}", warning.message),
            WarnLevel::Warning => tracing::warn!("config: {}", warning.message),
        }
    }
    let store = open_store(root, &config)?;
    let vcs = vcs::detect(root);
    tracing::debug!(vcs = vcs.name(), "opened project");
    Ok(Engine::new(root, config, store, vcs))
}

/// Bring the database schema and config file up to date, reporting what
/// changed.
pub fn migrate(root: &Path) -> Result<MigrationReport> {
    let path = paths::config_path(root);
    if !path.exists() {
        return Err(RailsError::NotInitialized);
    }
    let raw: serde_yaml::Value = serde_yaml::from_str(&std::fs::read_to_string(&path)?)?;
    let stored_config_version = raw.get("version").and_then(|v| v.as_u64()).unwrap_or(1);
    let config = Config::load(root)?;
    let config_upgraded = stored_config_version < u64::from(CONFIG_VERSION);
    if config_upgraded {
        config.save(root)?;
    }

    let db = paths::db_path(root);
    let mut conn = rusqlite::Connection::open(&db)?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    let from = migrations::schema_version(&conn)?;
    let applied = migrations::apply_pending(&mut conn)?;
    let to = migrations::schema_version(&conn)?;
    Ok(MigrationReport {
        from,
        to,
        applied,
        config_upgraded,
    })
}

fn open_store(root: &Path, config: &Config) -> Result<Store> {
    Store::open(
        &paths::db_path(root),
        StoreOptions {
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            retries: config.busy_retries,
        },
    )
}
