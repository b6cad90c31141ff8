use crate::cmd::{fmt_time, open_engine, or_dash};
use crate::output::{print_json, print_table};
use clap::Subcommand;
use moderails_core::context::ContextBundle;
use moderails_core::engine::{CompleteRequest, CompletionOutcome, Engine};
use moderails_core::history::HistoryRef;
use moderails_core::store::TaskFilter;
use moderails_core::task::{NewTask, Task, TaskUpdate};
use moderails_core::types::{TaskStatus, TaskType};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum TaskSubcommand {
    /// Create a task (in-progress by default, or a draft)
    Create {
        #[arg(long, short = 'n')]
        name: String,
        #[arg(long, short = 'd')]
        description: Option<String>,
        /// Epic id or name
        #[arg(long, short = 'e')]
        epic: Option<String>,
        /// feature, fix, refactor or chore
        #[arg(long = "type", short = 't', value_name = "TYPE", default_value = "feature")]
        task_type: TaskType,
        /// draft or in-progress
        #[arg(long, short = 's')]
        status: Option<TaskStatus>,
        /// Skip creating a plan file
        #[arg(long)]
        no_plan: bool,
        /// Skip printing the assembled context
        #[arg(long)]
        no_context: bool,
    },

    /// Update task fields
    Update {
        #[arg(long, short = 'i')]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, short = 's')]
        status: Option<TaskStatus>,
        #[arg(long = "type", value_name = "TYPE")]
        task_type: Option<TaskType>,
        /// Epic id or name
        #[arg(long)]
        epic: Option<String>,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long, short = 'd')]
        description: Option<String>,
        /// Record a commit id on a completed task that has none
        #[arg(long)]
        commit: Option<String>,
        #[arg(long)]
        plan_file: Option<String>,
    },

    /// Move a draft task to in-progress
    Start {
        #[arg(long, short = 'i')]
        id: String,
    },

    /// Complete a task: record history, commit, close
    Complete {
        #[arg(long, short = 'i')]
        id: String,
        #[arg(long, short = 's')]
        summary: Option<String>,
        /// Commit message (default: "<type>: <name> - <summary>")
        #[arg(long = "commit-message", short = 'm')]
        message: Option<String>,
    },

    /// Delete a task (history is kept)
    Delete {
        #[arg(long, short = 'i')]
        id: String,
        #[arg(long)]
        confirm: bool,
    },

    /// List tasks
    List {
        #[arg(long, short = 's')]
        status: Option<TaskStatus>,
        /// Epic id or name
        #[arg(long, short = 'e')]
        epic: Option<String>,
    },

    /// Show a task with its plan and context
    Load {
        #[arg(long, short = 'i')]
        id: String,
        /// Extra context to load by name (repeatable)
        #[arg(long = "memory", value_name = "NAME")]
        memories: Vec<String>,
    },

    /// Create the task's plan file if it has none
    Plan {
        #[arg(long, short = 'i')]
        id: String,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: TaskSubcommand, json: bool) -> anyhow::Result<()> {
    let mut engine = open_engine(root)?;
    match subcmd {
        TaskSubcommand::Create {
            name,
            description,
            epic,
            task_type,
            status,
            no_plan,
            no_context,
        } => {
            let new = NewTask {
                name,
                task_type,
                status,
                epic_id: epic,
                description,
                no_plan,
                no_context,
            };
            create(&mut engine, new, json)
        }
        TaskSubcommand::Update {
            id,
            name,
            status,
            task_type,
            epic,
            summary,
            description,
            commit,
            plan_file,
        } => {
            let update = TaskUpdate {
                name,
                task_type,
                status,
                epic_id: epic,
                summary,
                description,
                commit,
                plan_file,
            };
            update_task(&mut engine, &id, update, json)
        }
        TaskSubcommand::Start { id } => start(&mut engine, &id, json),
        TaskSubcommand::Complete {
            id,
            summary,
            message,
        } => complete(&mut engine, &id, CompleteRequest { summary, message }, json),
        TaskSubcommand::Delete { id, confirm } => delete(&mut engine, &id, confirm, json),
        TaskSubcommand::List { status, epic } => {
            list(&engine, status, epic.as_deref(), json)
        }
        TaskSubcommand::Load { id, memories } => load(&engine, &id, &memories, json),
        TaskSubcommand::Plan { id } => plan(&mut engine, &id, json),
    }
}

// ---------------------------------------------------------------------------
// create / update / start
// ---------------------------------------------------------------------------

fn create(engine: &mut Engine, new: NewTask, json: bool) -> anyhow::Result<()> {
    let created = engine.create_task(new)?;

    if json {
        return print_json(&created);
    }

    let task = &created.task;
    println!("Created task [{}]: {} ({})", task.id, task.name, task.status);
    if let Some(plan) = &task.plan_file {
        println!("Plan: {plan}");
    }
    if let Some(bundle) = &created.context {
        print_bundle(bundle);
    }
    Ok(())
}

fn update_task(engine: &mut Engine, id: &str, update: TaskUpdate, json: bool) -> anyhow::Result<()> {
    if update.is_empty() {
        anyhow::bail!("nothing to update: pass at least one field");
    }
    let task = engine.update_task(id, update)?;

    if json {
        return print_json(&task);
    }
    println!("Updated task [{}]", task.id);
    Ok(())
}

fn start(engine: &mut Engine, id: &str, json: bool) -> anyhow::Result<()> {
    let task = engine.start_task(id)?;

    if json {
        return print_json(&task);
    }
    println!("Started task [{}]: {}", task.id, task.name);
    Ok(())
}

// ---------------------------------------------------------------------------
// complete
// ---------------------------------------------------------------------------

fn complete(engine: &mut Engine, id: &str, req: CompleteRequest, json: bool) -> anyhow::Result<()> {
    let completion = match engine.complete_task(id, req) {
        Ok(c) => c,
        Err(e) => {
            if let Some(at) = e.history_ref() {
                print_resume_steps(id, at);
            }
            return Err(e.into());
        }
    };

    if json {
        return print_json(&completion);
    }

    let task = &completion.task;
    match completion.outcome {
        CompletionOutcome::AlreadyCompleted => {
            println!("Task [{}] is already completed.", task.id);
        }
        CompletionOutcome::Committed => {
            println!(
                "Completed task [{}]: {} (commit {})",
                task.id,
                task.name,
                or_dash(task.commit.as_deref())
            );
        }
        CompletionOutcome::Recorded => {
            println!("Completed task [{}]: {} (no repository, nothing committed)", task.id, task.name);
        }
    }
    if let Some(at) = &completion.history {
        println!("History: {at}");
    }
    if !completion.files_changed.is_empty() {
        println!("Files changed: {}", completion.files_changed.join(", "));
    }
    Ok(())
}

/// The history line is already on disk; re-running completion reuses it.
fn print_resume_steps(id: &str, at: &HistoryRef) {
    eprintln!("History was recorded at {at}, but the commit did not happen.");
    eprintln!("Task [{id}] is still open. To finish:");
    eprintln!("  1. Check the repository state: git status");
    eprintln!("  2. Fix the problem reported below");
    eprintln!("  3. Re-run: moderails task complete --id {id}");
}

// ---------------------------------------------------------------------------
// delete
// ---------------------------------------------------------------------------

fn delete(engine: &mut Engine, id: &str, confirm: bool, json: bool) -> anyhow::Result<()> {
    if !confirm {
        let task = engine.task(id)?;
        if json {
            return print_json(&serde_json::json!({
                "deleted": false,
                "task": task,
                "hint": format!("re-run with --confirm to delete task {id}"),
            }));
        }
        println!("About to delete task [{}]: {} ({})", task.id, task.name, task.status);
        println!("History entries are kept. Re-run with --confirm to delete.");
        return Ok(());
    }

    let task = engine.delete_task(id, true)?;
    if json {
        return print_json(&serde_json::json!({ "deleted": true, "task": task }));
    }
    println!("Deleted task [{}]: {}", task.id, task.name);
    Ok(())
}

// ---------------------------------------------------------------------------
// list / load / plan
// ---------------------------------------------------------------------------

fn list(
    engine: &Engine,
    status: Option<TaskStatus>,
    epic: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let filter = TaskFilter {
        status,
        epic_id: epic.map(|key| engine.resolve_epic(key)).transpose()?.map(|e| e.id),
    };
    let tasks = engine.list_tasks(&filter)?;

    if json {
        return print_json(&tasks);
    }

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    let epics = engine.list_epics()?;
    let rows: Vec<Vec<String>> = tasks
        .iter()
        .map(|t| {
            let epic = t
                .epic_id
                .as_deref()
                .and_then(|id| epics.iter().find(|e| e.id == id))
                .map(|e| e.name.as_str());
            vec![
                t.id.clone(),
                t.status.to_string(),
                t.task_type.to_string(),
                or_dash(epic),
                t.name.clone(),
                fmt_time(&t.updated_at),
            ]
        })
        .collect();
    print_table(&["ID", "STATUS", "TYPE", "EPIC", "NAME", "UPDATED"], rows);
    Ok(())
}

fn load(engine: &Engine, id: &str, memories: &[String], json: bool) -> anyhow::Result<()> {
    let loaded = engine.load_task(id, memories)?;

    if json {
        return print_json(&loaded);
    }

    print_task(&loaded.task);
    if let Some(epic) = &loaded.epic {
        println!("Epic:        {} [{}]", epic.name, epic.id);
    }
    if let Some(plan) = &loaded.plan {
        println!();
        println!("--- plan ---");
        println!("{}", plan.trim_end());
    }
    print_bundle(&loaded.context);
    Ok(())
}

fn plan(engine: &mut Engine, id: &str, json: bool) -> anyhow::Result<()> {
    let task = engine.ensure_plan(id)?;

    if json {
        return print_json(&task);
    }
    println!("Plan: {}", or_dash(task.plan_file.as_deref()));
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared printers
// ---------------------------------------------------------------------------

fn print_task(task: &Task) {
    println!("Task: {}", task.id);
    println!("Name:        {}", task.name);
    println!("Status:      {}", task.status);
    println!("Type:        {}", task.task_type);
    if let Some(desc) = &task.description {
        println!("Description: {desc}");
    }
    if let Some(summary) = &task.summary {
        println!("Summary:     {summary}");
    }
    if let Some(commit) = &task.commit {
        println!("Commit:      {commit}");
    }
    if let Some(plan) = &task.plan_file {
        println!("Plan file:   {plan}");
    }
    println!("Created:     {}", fmt_time(&task.created_at));
    if let Some(done) = &task.completed_at {
        println!("Completed:   {}", fmt_time(done));
    }
}

pub(crate) fn print_bundle(bundle: &ContextBundle) {
    if bundle.is_empty() {
        return;
    }
    for entry in &bundle.entries {
        println!();
        println!("--- {} ---", entry.id);
        println!("{}", entry.content.trim_end());
    }
}
