use crate::cmd::open_engine;
use crate::output::{print_json, print_table};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let status = engine.status()?;

    if json {
        return print_json(&status);
    }

    match &status.current_task {
        Some(task) => {
            let epic = task
                .epic
                .as_ref()
                .map(|e| format!(" [{}]", e.name))
                .unwrap_or_default();
            println!("Current: [{}] {}{epic} ({})", task.id, task.name, task.task_type);
        }
        None => println!("Current: (none)"),
    }

    if !status.draft_tasks.is_empty() {
        println!();
        println!("Drafts:");
        for task in &status.draft_tasks {
            println!("  [{}] {}", task.id, task.name);
        }
    }

    if !status.epics.is_empty() {
        println!();
        let rows: Vec<Vec<String>> = status
            .epics
            .iter()
            .map(|s| {
                vec![
                    s.epic.name.clone(),
                    format!("{}/{}", s.progress.completed, s.progress.total),
                    if s.progress.is_complete() { "done" } else { "open" }.to_string(),
                ]
            })
            .collect();
        print_table(&["EPIC", "DONE", "STATE"], rows);
    }

    println!();
    let vcs = &status.vcs;
    if vcs.available {
        println!(
            "Branch: {} ({} staged, {} unstaged)",
            vcs.branch.as_deref().unwrap_or("(detached)"),
            vcs.staged.len(),
            vcs.unstaged.len()
        );
    } else {
        println!("Branch: no repository");
    }
    Ok(())
}
