pub mod config;
pub mod context;
pub mod epic;
pub mod history;
pub mod init;
pub mod migrate;
pub mod mode;
pub mod status;
pub mod task;

use anyhow::Context;
use moderails_core::engine::Engine;
use std::path::Path;

/// Open the project rooted at `root`, migrating the store on the way.
pub(crate) fn open_engine(root: &Path) -> anyhow::Result<Engine> {
    moderails_core::project::open(root)
        .with_context(|| format!("failed to open project at {}", root.display()))
}

/// Short local-time stamp for table output.
pub(crate) fn fmt_time(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

pub(crate) fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}
