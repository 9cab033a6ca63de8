//! Buildsync CLI - bsync command

use anyhow::Result;
use bsync_cli::util;
use bsync_core::{logging, Settings};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

/// Buildsync - keep Bazel build files in sync with your sources
#[derive(Parser)]
#[command(name = "bsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Workspace root (default: nearest directory with .bsync/ or a Bazel workspace file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log every accepted file change
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only react to these languages (comma-separated)
    #[arg(long, global = true, value_delimiter = ',')]
    languages: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Daemon {
        /// Start watching the whole workspace immediately
        #[arg(long)]
        watch: bool,
    },
    /// Start the daemon in the background
    Start {
        /// Start watching the whole workspace immediately
        #[arg(long)]
        watch: bool,
    },
    /// Stop the daemon
    Stop,
    /// Show daemon, watch session and build file status
    Status,
    /// Watch for changes and regenerate build files
    Watch {
        /// Subtrees to watch (default: the whole workspace)
        paths: Vec<PathBuf>,

        /// Debounce window in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Watch in this process instead of through the daemon
        #[arg(long)]
        local: bool,
    },
    /// Regenerate build files now
    Update {
        /// Only regenerate directories whose sources changed
        #[arg(long)]
        incremental: bool,
    },
    /// Check that the daemon answers
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = util::find_workspace_root(cli.root.as_deref())?;
    let mut settings = Settings::load(&root)?;
    if !cli.languages.is_empty() {
        settings.languages = cli.languages;
    }
    if cli.verbose {
        settings.watch.verbose = true;
    }
    settings.validate()?;

    // The daemon logs to its own file
    if !matches!(cli.command, Commands::Daemon { .. }) {
        logging::init_with_config(&settings.logging);
    }

    let ctx = cmd::Context {
        root,
        settings,
        json: cli.json,
    };

    match cli.command {
        Commands::Daemon { watch } => cmd::daemon::run(ctx, watch).await,
        Commands::Start { watch } => cmd::start::run(&ctx, watch).await,
        Commands::Stop => cmd::stop::run(&ctx).await,
        Commands::Status => cmd::status::run(&ctx).await,
        Commands::Watch {
            paths,
            debounce_ms,
            local,
        } => cmd::watch::run(&ctx, paths, debounce_ms, local).await,
        Commands::Update { incremental } => cmd::update::run(&ctx, incremental).await,
        Commands::Ping => cmd::ping::run(&ctx).await,
    }
}
