use crate::cmd::open_engine;
use crate::output::print_json;
use moderails_core::render::{Mode, ModeContext, Renderer, TaskRef};
use moderails_core::Result;
use std::fmt::Write as _;
use std::path::Path;

pub fn run(root: &Path, name: &str, flags: Vec<String>, json: bool) -> anyhow::Result<()> {
    let mode: Mode = name.parse()?;
    let flags = flags
        .into_iter()
        .map(|f| f.trim_start_matches('-').to_string())
        .filter(|f| !f.is_empty())
        .collect();

    let mut engine = open_engine(root)?;
    let ctx = engine.mode_context(mode, flags)?;

    if json {
        return print_json(&ctx);
    }
    print!("{}", TextRenderer.render(mode.as_str(), &ctx)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// TextRenderer
// ---------------------------------------------------------------------------

/// Plain markdown rendering of a mode record.
pub struct TextRenderer;

impl TextRenderer {
    fn instructions(mode: Mode) -> &'static str {
        match mode {
            Mode::Start => "Pick up the current task, start a draft, or create a new task.",
            Mode::Research => "Read the loaded context and the code it points at. Do not edit files.",
            Mode::Brainstorm => "Explore approaches with the user. Do not edit files.",
            Mode::Plan => "Write concrete steps into the plan file before touching code.",
            Mode::Execute => "Follow the plan step by step. Keep the plan file current.",
            Mode::Complete => "Summarize the change, then run `moderails task complete`.",
            Mode::Abort => "Stop work. Leave the task open and explain what is unfinished.",
            Mode::Fast => "Make the change directly, then complete the task.",
        }
    }
}

impl Renderer for TextRenderer {
    fn render(&self, template_id: &str, ctx: &ModeContext) -> Result<String> {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(out, "# {} mode", template_id.to_uppercase());
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", Self::instructions(ctx.mode));
        if !ctx.flags.is_empty() {
            let _ = writeln!(out, "Flags: {}", ctx.flags.join(", "));
        }

        if ctx.mode.needs_task() || ctx.mode == Mode::Start {
            let _ = writeln!(out);
            match &ctx.current_task {
                Some(task) => write_task(&mut out, "Current task", task),
                None => {
                    let _ = writeln!(out, "No task in progress.");
                }
            }
        }

        if !ctx.draft_tasks.is_empty() {
            let _ = writeln!(out, "\n## Drafts");
            for task in &ctx.draft_tasks {
                let _ = writeln!(out, "- [{}] {} ({})", task.id, task.name, task.task_type);
            }
        }
        if !ctx.epics.is_empty() {
            let _ = writeln!(out, "\n## Epics");
            for epic in &ctx.epics {
                let _ = writeln!(out, "- [{}] {}", epic.id, epic.name);
            }
        }
        if !ctx.skills.is_empty() {
            let _ = writeln!(out, "\n## Skills\n{}", ctx.skills.join(", "));
        }

        if let Some(vcs) = &ctx.vcs {
            let _ = writeln!(out, "\n## Working tree");
            if vcs.available {
                let branch = vcs.branch.as_deref().unwrap_or("(detached)");
                let _ = writeln!(out, "Branch: {branch}{}", if vcs.is_main { " (main)" } else { "" });
                let _ = writeln!(out, "Staged: {}", vcs.staged.len());
                let _ = writeln!(out, "Unstaged: {}", vcs.unstaged.len());
            } else {
                let _ = writeln!(out, "No repository: completion records history without committing.");
            }
        }
        if ctx.private == Some(true) {
            let _ = writeln!(out, "Private mode: history is not staged.");
        }

        if !ctx.memories.is_empty() {
            let _ = writeln!(out, "\n## Memories\n{}", ctx.memories.join(", "));
        }
        if !ctx.files_tree.is_empty() {
            let _ = writeln!(out, "\n## Files touched by past tasks");
            for f in &ctx.files_tree {
                let _ = writeln!(out, "- {f}");
            }
        }
        if let Some(bundle) = &ctx.bundle {
            for entry in &bundle.entries {
                let _ = writeln!(out, "\n---\n<!-- {} -->\n{}", entry.id, entry.content.trim_end());
            }
        }
        Ok(out)
    }
}

fn write_task(out: &mut String, label: &str, task: &TaskRef) {
    let _ = writeln!(out, "## {label}");
    let _ = writeln!(out, "- id: {}", task.id);
    let _ = writeln!(out, "- name: {}", task.name);
    let _ = writeln!(out, "- type: {}", task.task_type);
    let _ = writeln!(out, "- status: {}", task.status);
    if let Some(epic) = &task.epic {
        let _ = writeln!(out, "- epic: {} [{}]", epic.name, epic.id);
    }
    if let Some(plan) = &task.plan_file {
        let _ = writeln!(out, "- plan: {plan}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moderails_core::task::Task;
    use moderails_core::types::{TaskStatus, TaskType};

    #[test]
    fn start_lists_task_and_drafts() {
        let current = Task::new("wire parser", TaskType::Feature, TaskStatus::InProgress);
        let draft = Task::new("docs pass", TaskType::Chore, TaskStatus::Draft);
        let mut ctx = ModeContext::new(Mode::Start, Vec::new(), "/tmp/p".to_string());
        ctx.current_task = Some(TaskRef::new(&current, None));
        ctx.draft_tasks = vec![TaskRef::new(&draft, None)];

        let text = TextRenderer.render("start", &ctx).unwrap();
        assert!(text.starts_with("# START mode"));
        assert!(text.contains("- name: wire parser"));
        assert!(text.contains("## Drafts"));
        assert!(text.contains("docs pass (chore)"));
    }

    #[test]
    fn execute_without_task_says_so() {
        let ctx = ModeContext::new(Mode::Execute, vec!["no-confirm".to_string()], "/p".to_string());
        let text = TextRenderer.render("execute", &ctx).unwrap();
        assert!(text.contains("No task in progress."));
        assert!(text.contains("Flags: no-confirm"));
    }
}
