//! Command-line surface of the `queuectl` binary.

use clap::{Args, Parser, Subcommand};

use queuectl_core::JobState;

#[derive(Debug, Parser)]
#[command(name = "queuectl")]
#[command(about = "Durable background job queue for shell commands")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit a job from a JSON object, e.g. '{"id":"job1","command":"echo hi"}'
    Enqueue {
        /// Job submission JSON
        job: String,
    },

    /// Start or stop the worker pool
    #[command(subcommand)]
    Worker(WorkerCommand),

    /// Show job counts by state and active workers
    Status,

    /// List jobs, optionally filtered by state
    List {
        /// pending, processing, completed, failed or dead
        #[arg(long)]
        state: Option<JobState>,
    },

    /// Inspect or requeue dead-lettered jobs
    #[command(subcommand)]
    Dlq(DlqCommand),

    /// Read or change persistent settings
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Show one job in detail, including its last output
    Show {
        /// Job id
        id: String,
    },

    /// Serve the read-only monitoring dashboard
    Dashboard(DashboardArgs),
}

#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Run workers in the foreground until SIGINT or SIGTERM
    Start {
        /// Number of concurrent workers
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },

    /// Ask a running pool to shut down gracefully
    Stop,
}

#[derive(Debug, Subcommand)]
pub enum DlqCommand {
    /// List dead jobs
    List,

    /// Move a dead job back to pending with a fresh retry budget
    Retry {
        /// Job id
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Set a value (max-retries, backoff-base, or any free-form key)
    Set { key: String, value: String },

    /// Print a single value
    Get { key: String },

    /// Print every stored value
    List,
}

#[derive(Debug, Args)]
pub struct DashboardArgs {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
}

impl Command {
    /// Whether this command keeps running until interrupted.
    pub fn is_long_running(&self) -> bool {
        matches!(
            self,
            Command::Worker(WorkerCommand::Start { .. }) | Command::Dashboard(_)
        )
    }
}
