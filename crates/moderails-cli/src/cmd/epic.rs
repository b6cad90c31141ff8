use crate::cmd::task::print_bundle;
use crate::cmd::{fmt_time, open_engine};
use crate::output::{print_json, print_table};
use clap::Subcommand;
use moderails_core::context::ContextScope;
use moderails_core::engine::Engine;
use moderails_core::epic::{EpicUpdate, NewEpic};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum EpicSubcommand {
    /// Create an epic
    Create {
        #[arg(long, short = 'n')]
        name: String,
        /// Context tag (repeatable)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        /// Skill from .moderails/skills/ (repeatable)
        #[arg(long = "skill", value_name = "SKILL")]
        skills: Vec<String>,
    },

    /// Rename an epic or change its tags and skills
    Update {
        /// Epic id or name
        #[arg(long, short = 'i')]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "add-tag", value_name = "TAG")]
        add_tags: Vec<String>,
        #[arg(long = "remove-tag", value_name = "TAG")]
        remove_tags: Vec<String>,
        #[arg(long = "add-skill", value_name = "SKILL")]
        add_skills: Vec<String>,
        #[arg(long = "remove-skill", value_name = "SKILL")]
        remove_skills: Vec<String>,
    },

    /// Delete an epic
    Delete {
        /// Epic id or name
        #[arg(long, short = 'i')]
        id: String,
        #[arg(long)]
        confirm: bool,
        /// Detach open tasks instead of refusing
        #[arg(long)]
        force: bool,
    },

    /// List epics with progress
    List,

    /// Show an epic's progress and its assembled context
    Load {
        /// Epic id or name
        #[arg(long, short = 'i')]
        id: String,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: EpicSubcommand, json: bool) -> anyhow::Result<()> {
    let mut engine = open_engine(root)?;
    match subcmd {
        EpicSubcommand::Create { name, tags, skills } => {
            create(&mut engine, NewEpic { name, tags, skills }, json)
        }
        EpicSubcommand::Update {
            id,
            name,
            add_tags,
            remove_tags,
            add_skills,
            remove_skills,
        } => {
            let changes = EpicUpdate {
                name,
                add_tags,
                remove_tags,
                add_skills,
                remove_skills,
            };
            update(&mut engine, &id, changes, json)
        }
        EpicSubcommand::Delete { id, confirm, force } => {
            delete(&mut engine, &id, confirm, force, json)
        }
        EpicSubcommand::List => list(&engine, json),
        EpicSubcommand::Load { id } => load(&engine, &id, json),
    }
}

fn create(engine: &mut Engine, new: NewEpic, json: bool) -> anyhow::Result<()> {
    let epic = engine.create_epic(new)?;

    if json {
        return print_json(&epic);
    }
    println!("Created epic [{}]: {}", epic.id, epic.name);
    if !epic.tags.is_empty() {
        println!("Tags:   {}", epic.tags.join(", "));
    }
    if !epic.skills.is_empty() {
        println!("Skills: {}", epic.skills.join(", "));
    }
    Ok(())
}

fn update(engine: &mut Engine, key: &str, update: EpicUpdate, json: bool) -> anyhow::Result<()> {
    if update.is_empty() {
        anyhow::bail!("nothing to update: pass --name or a tag/skill change");
    }
    let epic = engine.update_epic(key, update)?;

    if json {
        return print_json(&epic);
    }
    println!("Updated epic [{}]: {}", epic.id, epic.name);
    Ok(())
}

fn delete(engine: &mut Engine, key: &str, confirm: bool, force: bool, json: bool) -> anyhow::Result<()> {
    if !confirm {
        let epic = engine.resolve_epic(key)?;
        let progress = engine.epic_progress(&epic.id)?;
        if json {
            return print_json(&serde_json::json!({
                "deleted": false,
                "epic": epic,
                "progress": progress,
                "hint": format!("re-run with --confirm to delete epic {}", epic.id),
            }));
        }
        println!("About to delete epic [{}]: {}", epic.id, epic.name);
        println!("{} task(s), {} open.", progress.total, progress.open.len());
        println!("Re-run with --confirm to delete.");
        return Ok(());
    }

    let epic = engine.delete_epic(key, true, force)?;
    if json {
        return print_json(&serde_json::json!({ "deleted": true, "epic": epic }));
    }
    println!("Deleted epic [{}]: {}", epic.id, epic.name);
    Ok(())
}

fn list(engine: &Engine, json: bool) -> anyhow::Result<()> {
    let status = engine.status()?;

    if json {
        return print_json(&status.epics);
    }

    if status.epics.is_empty() {
        println!("No epics.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = status
        .epics
        .iter()
        .map(|s| {
            vec![
                s.epic.id.clone(),
                s.epic.name.clone(),
                format!("{}/{}", s.progress.completed, s.progress.total),
                s.epic.tags.join(","),
                s.epic.skills.join(","),
                fmt_time(&s.epic.created_at),
            ]
        })
        .collect();
    print_table(&["ID", "NAME", "DONE", "TAGS", "SKILLS", "CREATED"], rows);
    Ok(())
}

fn load(engine: &Engine, key: &str, json: bool) -> anyhow::Result<()> {
    let epic = engine.resolve_epic(key)?;
    let progress = engine.epic_progress(&epic.id)?;
    let context = engine.assemble(&ContextScope::for_epic(&epic.id))?;

    if json {
        return print_json(&serde_json::json!({
            "epic": epic,
            "progress": progress,
            "complete": progress.is_complete(),
            "context": context,
        }));
    }

    println!("Epic: {} [{}]", epic.name, epic.id);
    println!("Progress: {}/{} completed", progress.completed, progress.total);
    if !progress.open.is_empty() {
        println!("Open:     {}", progress.open.join(", "));
    }
    if !epic.tags.is_empty() {
        println!("Tags:     {}", epic.tags.join(", "));
    }
    if !epic.skills.is_empty() {
        println!("Skills:   {}", epic.skills.join(", "));
    }
    print_bundle(&context);
    Ok(())
}
