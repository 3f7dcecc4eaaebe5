//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::registry::DEFAULT_CRON;

/// CronQ - delayed and recurring task dispatch
#[derive(Parser)]
#[command(
    name = "cq",
    about = "Delayed and recurring task dispatch daemon",
    version,
    after_help = "Logs are written to: ~/.local/share/cronq/logs/cronq.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the dispatcher in the foreground (scheduler + workers)
    Run,

    /// Register a recurring task
    Register {
        /// Task type to dispatch (must have a registered handler)
        #[arg(value_name = "TYPE")]
        task_type: String,

        /// Payload passed verbatim to the handler
        #[arg(value_name = "PAYLOAD")]
        payload: String,

        /// Cron expression (5 fields, minute granularity)
        #[arg(long, default_value = DEFAULT_CRON)]
        cron: String,

        /// Target queue
        #[arg(short, long, default_value = "default")]
        queue: String,

        /// Retries after the first attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Per-attempt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Cancel a registration by entry id
    Unregister {
        #[arg(value_name = "ENTRY_ID")]
        entry_id: String,
    },

    /// List registered schedule entries
    Entries {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Enqueue a one-shot job directly, bypassing the scheduler
    Enqueue {
        /// Task type to dispatch
        #[arg(value_name = "TYPE")]
        task_type: String,

        /// Payload passed verbatim to the handler
        #[arg(value_name = "PAYLOAD")]
        payload: String,

        /// Target queue
        #[arg(short, long, default_value = "default")]
        queue: String,

        /// Retries after the first attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Per-attempt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// List jobs, including the retained failed ones
    Jobs {
        /// Filter by queue
        #[arg(short, long)]
        queue: Option<String>,

        /// Filter by state (pending, leased, failed)
        #[arg(short, long)]
        state: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show per-queue job counts
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for listing commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
