mod cmd_config;
mod cmd_init;
mod cmd_rotate;
mod cmd_status;
mod cmd_tail;
mod cmd_verify;

use clap::{Parser, Subcommand};
use quill_ledger::QuillPaths;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quill", version, about = "Session-scoped audit logs for coding agents")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a new .quill/ directory
    Init,
    /// Show sessions, projects and log state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Verify a project's rotation hash chain
    Verify {
        /// Project name
        project: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Seal a project's current log and start a new linked one
    Rotate {
        /// Project name
        project: String,
        /// Agent identity recorded on the rotation entry
        #[arg(long)]
        agent: String,
    },
    /// Print the last entries of a project's log
    Tail {
        /// Project name
        project: String,
        /// Number of entries
        #[arg(short = 'n', long, default_value = "20")]
        lines: usize,
        /// Print structured JSON lines instead of mirror lines
        #[arg(long)]
        json: bool,
    },
    /// Read or change .quill/config.json
    Config {
        #[command(subcommand)]
        cmd: cmd_config::ConfigCmd,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("QUILL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Nearest ancestor holding `.quill/`, or the working directory itself.
fn repo_root() -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let root = QuillPaths::find_root(&cwd).unwrap_or(cwd);
    tracing::debug!(root = %root.display(), "repository root");
    Ok(root)
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Command::Init => cmd_init::execute(&std::env::current_dir()?),
        Command::Status { json } => cmd_status::execute(&repo_root()?, json),
        Command::Verify { project, json } => cmd_verify::execute(&repo_root()?, &project, json),
        Command::Rotate { project, agent } => cmd_rotate::execute(&repo_root()?, &project, &agent),
        Command::Tail {
            project,
            lines,
            json,
        } => cmd_tail::execute(&repo_root()?, &project, lines, json),
        Command::Config { cmd } => cmd_config::run(cmd, &repo_root()?),
    }
}
