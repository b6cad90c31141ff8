use crate::cmd::open_engine;
use crate::cmd::task::print_bundle;
use crate::output::{print_json, print_table};
use clap::Subcommand;
use moderails_core::context::ContextScope;
use moderails_core::engine::Engine;
use std::path::Path;

#[derive(Subcommand)]
pub enum ContextSubcommand {
    /// List mandatory files, memories, tags and skills
    List,

    /// Assemble and print a context bundle
    Load {
        /// Scope tags, skills and history to this epic (id or name)
        #[arg(long, short = 'e')]
        epic: Option<String>,
        /// Memory or qualified entry to include (repeatable)
        #[arg(long = "memory", value_name = "NAME")]
        memories: Vec<String>,
        /// Leave out mandatory context
        #[arg(long)]
        no_mandatory: bool,
    },

    /// Search context files; `|` separates alternatives
    Search { query: String },

    /// List every file recorded in history
    Files,
}

pub fn run(root: &Path, subcmd: ContextSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    match subcmd {
        ContextSubcommand::List => list(&engine, json),
        ContextSubcommand::Load {
            epic,
            memories,
            no_mandatory,
        } => load(&engine, epic.as_deref(), memories, no_mandatory, json),
        ContextSubcommand::Search { query } => search(&engine, &query, json),
        ContextSubcommand::Files => files(&engine, json),
    }
}

fn list(engine: &Engine, json: bool) -> anyhow::Result<()> {
    let assembler = engine.assembler();
    let mandatory = assembler.list_mandatory()?;
    let memories = assembler.list_memories()?;
    let tags = assembler.list_tags()?;
    let skills = assembler.list_skills()?;

    if json {
        return print_json(&serde_json::json!({
            "mandatory": mandatory,
            "memories": memories,
            "tags": tags,
            "skills": skills,
        }));
    }

    for (label, items) in [
        ("Mandatory", &mandatory),
        ("Memories", &memories),
        ("Tags", &tags),
        ("Skills", &skills),
    ] {
        if items.is_empty() {
            println!("{label}: (none)");
        } else {
            println!("{label}: {}", items.join(", "));
        }
    }
    Ok(())
}

fn load(
    engine: &Engine,
    epic: Option<&str>,
    memories: Vec<String>,
    no_mandatory: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut scope = match epic {
        Some(key) => ContextScope::for_epic(engine.resolve_epic(key)?.id),
        None => ContextScope::default(),
    }
    .with_names(memories);
    scope.include_mandatory = !no_mandatory;
    let bundle = engine.assemble(&scope)?;

    if json {
        return print_json(&bundle);
    }
    if bundle.is_empty() {
        println!("No context.");
        return Ok(());
    }
    print_bundle(&bundle);
    Ok(())
}

fn search(engine: &Engine, query: &str, json: bool) -> anyhow::Result<()> {
    let matches = engine.assembler().search(query)?;

    if json {
        return print_json(&matches);
    }
    if matches.is_empty() {
        println!("No context matching '{query}'.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = matches
        .iter()
        .map(|m| vec![m.id.clone(), m.line.to_string(), m.text.trim().to_string()])
        .collect();
    print_table(&["ENTRY", "LINE", "TEXT"], rows);
    Ok(())
}

fn files(engine: &Engine, json: bool) -> anyhow::Result<()> {
    let files = engine.history().files()?;

    if json {
        return print_json(&files);
    }
    if files.is_empty() {
        println!("No files recorded in history.");
    }
    for f in &files {
        println!("{f}");
    }
    Ok(())
}
