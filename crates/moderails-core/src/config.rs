use crate::error::{RailsError, Result};
use crate::paths;
use crate::types::TaskStatus;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// History stays local: gitignored and never staged during completion.
    #[serde(default)]
    pub private: bool,
    #[serde(default = "default_main_branch")]
    pub main_branch: String,
    #[serde(default = "default_status")]
    pub default_status: TaskStatus,
    #[serde(default = "default_true")]
    pub single_in_progress: bool,
    #[serde(default = "default_true")]
    pub create_plan_files: bool,
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_version() -> u32 {
    1
}

fn default_main_branch() -> String {
    "main".to_string()
}

fn default_status() -> TaskStatus {
    TaskStatus::InProgress
}

fn default_true() -> bool {
    true
}

fn default_busy_retries() -> u32 {
    3
}

fn default_busy_timeout_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            private: false,
            main_branch: default_main_branch(),
            default_status: default_status(),
            single_in_progress: true,
            create_plan_files: true,
            busy_retries: default_busy_retries(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(RailsError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        migrate_config(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.default_status == TaskStatus::Completed {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "default_status cannot be 'completed'; tasks are completed via 'complete'"
                    .to_string(),
            });
        }
        if self.main_branch.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "main_branch is empty; main-branch detection is disabled".to_string(),
            });
        }
        if self.busy_retries == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "busy_retries is 0; concurrent invocations fail immediately".to_string(),
            });
        }
        if self.version > CONFIG_VERSION {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "config version {} is newer than this binary supports ({CONFIG_VERSION})",
                    self.version
                ),
            });
        }
        warnings
    }

    /// The status new tasks get when the caller does not choose one.
    pub fn initial_status(&self) -> TaskStatus {
        match self.default_status {
            TaskStatus::Completed => TaskStatus::InProgress,
            other => other,
        }
    }
}

/// Bring a loaded config forward to [`CONFIG_VERSION`].
///
/// v1 predates `single_in_progress` and `create_plan_files`; serde defaults
/// already fill them, so the upgrade only stamps the version.
pub fn migrate_config(mut cfg: Config) -> Result<Config> {
    if cfg.version < 2 {
        cfg.version = 2;
    }
    Ok(cfg)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
