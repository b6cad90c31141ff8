mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, context::ContextSubcommand, epic::EpicSubcommand,
    history::HistorySubcommand, task::TaskSubcommand,
};
use moderails_core::types::TaskStatus;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "moderails",
    about = "Task and epic lifecycle for multi-session AI coding workflows",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .moderails/ or .git/)
    #[arg(long, global = true, env = "MODERAILS_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log state changes to stderr
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize moderails in the current project
    Init {
        /// Keep all moderails files out of version control
        #[arg(long)]
        private: bool,
    },

    /// Apply pending database migrations and upgrade the config file
    Migrate,

    /// Show the current task, drafts, epics and working tree
    Status,

    /// Print the context record for a workflow mode
    Mode {
        /// start, research, brainstorm, plan, execute, complete, abort or fast
        name: String,
        /// Mode flags passed through to the template (e.g. no-confirm)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        flags: Vec<String>,
    },

    /// List tasks (same as `task list`)
    List {
        #[arg(long, short = 's')]
        status: Option<TaskStatus>,
        /// Epic id or name
        #[arg(long, short = 'e')]
        epic: Option<String>,
    },

    /// Manage tasks
    Task {
        #[command(subcommand)]
        subcommand: TaskSubcommand,
    },

    /// Manage epics
    Epic {
        #[command(subcommand)]
        subcommand: EpicSubcommand,
    },

    /// Inspect and load project context
    Context {
        #[command(subcommand)]
        subcommand: ContextSubcommand,
    },

    /// Search and sync completed-task history
    History {
        #[command(subcommand)]
        subcommand: HistorySubcommand,
    },

    /// Inspect the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { private } => cmd::init::run(&root, private, cli.json),
        Commands::Migrate => cmd::migrate::run(&root, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Mode { name, flags } => cmd::mode::run(&root, &name, flags, cli.json),
        Commands::List { status, epic } => cmd::task::run(
            &root,
            TaskSubcommand::List { status, epic },
            cli.json,
        ),
        Commands::Task { subcommand } => cmd::task::run(&root, subcommand, cli.json),
        Commands::Epic { subcommand } => cmd::epic::run(&root, subcommand, cli.json),
        Commands::Context { subcommand } => cmd::context::run(&root, subcommand, cli.json),
        Commands::History { subcommand } => cmd::history::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
