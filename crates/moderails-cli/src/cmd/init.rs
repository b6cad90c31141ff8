use crate::output::print_json;
use anyhow::Context;
use moderails_core::project;
use std::path::Path;

pub fn run(root: &Path, private: bool, json: bool) -> anyhow::Result<()> {
    let report = project::init(root, private).context("failed to initialize project")?;

    if json {
        return print_json(&report);
    }

    if report.created {
        println!("Initialized moderails in {}", report.root.display());
    } else {
        println!("Already initialized: {}", report.root.display());
    }
    if report.private {
        println!("Private mode: .moderails/ is ignored by git and never committed.");
    }
    println!("Schema version: {}", report.schema_version);
    println!();
    println!("Next steps:");
    println!("  moderails epic create --name <epic>");
    println!("  moderails task create --name <task> --epic <epic>");
    println!("  moderails mode start");
    Ok(())
}
