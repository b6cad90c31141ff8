use crate::output::print_json;
use anyhow::Context;
use moderails_core::project;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let report = project::migrate(root).context("migration failed")?;

    if json {
        return print_json(&report);
    }

    if report.applied.is_empty() {
        println!("Database schema is up to date (version {}).", report.to);
    } else {
        let applied: Vec<String> = report.applied.iter().map(u32::to_string).collect();
        println!(
            "Migrated database schema {} -> {} (applied: {})",
            report.from,
            report.to,
            applied.join(", ")
        );
    }
    if report.config_upgraded {
        println!("Upgraded config.yaml to the current version.");
    }
    Ok(())
}
