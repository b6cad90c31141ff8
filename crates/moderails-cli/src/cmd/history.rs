use crate::cmd::{fmt_time, open_engine, or_dash};
use crate::output::{print_json, print_table};
use clap::Subcommand;
use moderails_core::engine::SearchHit;
use std::path::Path;

#[derive(Subcommand)]
pub enum HistorySubcommand {
    /// Find tasks by name or summary; `|` separates alternatives
    Search { query: String },

    /// Find completed tasks that changed a file
    File { path: String },

    /// Import history entries missing from the database
    Sync,
}

pub fn run(root: &Path, subcmd: HistorySubcommand, json: bool) -> anyhow::Result<()> {
    let mut engine = open_engine(root)?;
    match subcmd {
        HistorySubcommand::Search { query } => {
            let hits = engine.search(&query)?;
            print_hits(&hits, &format!("No tasks matching '{query}'."), json)
        }
        HistorySubcommand::File { path } => {
            let hits = engine.search_by_file(&path)?;
            print_hits(&hits, &format!("No history for '{path}'."), json)
        }
        HistorySubcommand::Sync => {
            let imported = engine.sync_history()?;
            if json {
                return print_json(&serde_json::json!({ "imported": imported }));
            }
            println!("Imported {imported} task(s) from history.");
            Ok(())
        }
    }
}

fn print_hits(hits: &[SearchHit], empty: &str, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&hits);
    }
    if hits.is_empty() {
        println!("{empty}");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = hits
        .iter()
        .map(|h| {
            vec![
                h.id.clone(),
                h.status.map_or_else(|| "history".to_string(), |s| s.to_string()),
                or_dash(h.epic.as_deref()),
                h.name.clone(),
                h.commit
                    .as_deref()
                    .map_or_else(|| "-".to_string(), |c| c.chars().take(8).collect()),
                h.completed_at.as_ref().map_or_else(|| "-".to_string(), fmt_time),
            ]
        })
        .collect();
    print_table(&["ID", "STATUS", "EPIC", "NAME", "COMMIT", "COMPLETED"], rows);
    Ok(())
}
