use dl_core::logging;

mod collaborators;
mod commands;

use clap::{Parser, Subcommand};

/// Thin CLI shell over the core download task engine.
#[derive(Debug, Parser)]
#[command(name = "taskctl")]
#[command(about = "taskctl: control surface for the download task engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a task for a URL and run it to completion (or until Ctrl-C).
    Start {
        /// Source URL. Video/social-media hosts are routed through the
        /// extractor-backed path; everything else is a direct ranged GET.
        url: String,
        /// Directory the final file is saved under (default: current directory).
        #[arg(long, value_name = "DIR")]
        dir: Option<std::path::PathBuf>,
    },

    /// Resume an existing, not-yet-complete task by id.
    Resume {
        /// Task id, as printed by `status`.
        id: u64,
    },

    /// Pause a task by id without deleting its progress.
    Pause {
        /// Task id.
        id: u64,
    },

    /// Cancel a task by id without deleting its progress.
    Cancel {
        /// Task id.
        id: u64,
    },

    /// Delete a task's records, and optionally its downloaded file.
    Delete {
        /// Task id.
        id: u64,
        /// Also remove the destination file from disk.
        #[arg(long)]
        delete_file: bool,
    },

    /// Print one task's status, or every task's if no id is given.
    Status {
        /// Task id. Omit to list every known task.
        id: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    logging::init_logging().unwrap_or_else(|_| logging::init_logging_stderr());

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Start { url, dir } => commands::start(&url, dir.as_deref()).await,
        Command::Resume { id } => commands::resume(id).await,
        Command::Pause { id } => commands::pause(id),
        Command::Cancel { id } => commands::cancel(id),
        Command::Delete { id, delete_file } => commands::delete(id, delete_file),
        Command::Status { id } => commands::status(id),
    };

    if let Err(err) = result {
        eprintln!("taskctl error: {err:#}");
        std::process::exit(1);
    }
}
