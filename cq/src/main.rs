//! CronQ - delayed and recurring task dispatch
//!
//! CLI entry point for running the dispatcher and managing schedules.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use cronq::cli::{Cli, Command, OutputFormat};
use cronq::config::Config;
use cronq::handlers::WelcomeEmailHandler;
use cronq::lifecycle::{Dispatcher, DispatcherConfig};
use cronq::registry::ScheduleRegistry;
use cronq::worker::DispatchTable;
use jobstore::{JobInstance, JobState, JobStore, RetryPolicy, TaskDefinition};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cronq")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to a log file, not stdout - CLI output stays clean
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("cronq.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<JobStore>> {
    let store = JobStore::open(&config.storage.data_dir)
        .context(format!("Failed to open job store in {}", config.storage.data_dir.display()))?;
    Ok(Arc::new(store))
}

fn resolve_policy(config: &Config, max_retries: Option<u32>, timeout_ms: Option<u64>) -> RetryPolicy {
    let mut policy = config.retry.policy;
    if let Some(max_retries) = max_retries {
        policy.max_retries = max_retries;
    }
    if let Some(timeout_ms) = timeout_ms {
        policy.timeout_ms = timeout_ms;
    }
    policy
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Some(Command::Run) => cmd_run(&config).await,
        Some(Command::Register {
            task_type,
            payload,
            cron,
            queue,
            max_retries,
            timeout_ms,
        }) => {
            let policy = resolve_policy(&config, max_retries, timeout_ms);
            cmd_register(&config, &task_type, payload, &cron, &queue, policy)
        }
        Some(Command::Unregister { entry_id }) => cmd_unregister(&config, &entry_id),
        Some(Command::Entries { format }) => cmd_entries(&config, format),
        Some(Command::Enqueue {
            task_type,
            payload,
            queue,
            max_retries,
            timeout_ms,
        }) => {
            let policy = resolve_policy(&config, max_retries, timeout_ms);
            cmd_enqueue(&config, &task_type, payload, &queue, policy)
        }
        Some(Command::Jobs { queue, state, format }) => cmd_jobs(&config, queue.as_deref(), state.as_deref(), format),
        Some(Command::Status { format }) => cmd_status(&config, format),
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Run the dispatcher in the foreground until a stop signal arrives
async fn cmd_run(config: &Config) -> Result<()> {
    let store = open_store(config)?;

    // The dispatch table is built once at startup; there is no hot-reload.
    let mut dispatch = DispatchTable::new();
    dispatch.register(Arc::new(WelcomeEmailHandler));
    info!(task_types = ?dispatch.task_types(), "Dispatch table built");

    let dispatcher_config = DispatcherConfig {
        worker: config.workers.clone(),
        sweep_interval_ms: config.lifecycle.sweep_interval_ms,
    };

    let mut dispatcher = Dispatcher::new(dispatcher_config, store, dispatch);
    dispatcher.start()?;

    println!("CronQ dispatcher running. Press Ctrl+C to stop.");

    wait_for_stop_signal().await?;

    println!("Shutting down...");
    let deadline = Duration::from_secs(config.lifecycle.shutdown_timeout_secs);
    let clean = dispatcher.shutdown(deadline).await?;

    if clean {
        println!("Stopped cleanly.");
    } else {
        println!("Stopped with in-flight work abandoned; leases will be reclaimed on next run.");
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_stop_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received");
    Ok(())
}

/// Register a recurring task
fn cmd_register(
    config: &Config,
    task_type: &str,
    payload: String,
    cron: &str,
    queue: &str,
    policy: RetryPolicy,
) -> Result<()> {
    let store = open_store(config)?;
    let registry = ScheduleRegistry::new(store);

    let task = TaskDefinition::new(task_type, payload.into_bytes());
    let entry_id = registry.register(cron, task, queue, policy)?;

    println!("Registered: {}", entry_id);
    println!("  cron: {}", cron);
    println!("  queue: {}", queue);
    Ok(())
}

/// Cancel a registration
fn cmd_unregister(config: &Config, entry_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let registry = ScheduleRegistry::new(store);

    registry.unregister(entry_id)?;
    println!("Unregistered: {}", entry_id);
    Ok(())
}

/// List schedule entries
fn cmd_entries(config: &Config, format: OutputFormat) -> Result<()> {
    let store = open_store(config)?;
    let registry = ScheduleRegistry::new(store);
    let entries = registry.entries()?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No schedule entries registered.");
                return Ok(());
            }
            for entry in entries {
                println!("{}", entry.id);
                println!("  cron: {}", entry.cron_expr);
                println!("  queue: {}", entry.queue);
                println!("  task type: {}", entry.task.task_type);
                println!(
                    "  policy: {} retries, {}ms timeout",
                    entry.policy.max_retries, entry.policy.timeout_ms
                );
            }
        }
    }
    Ok(())
}

/// Enqueue a one-shot job
fn cmd_enqueue(
    config: &Config,
    task_type: &str,
    payload: String,
    queue: &str,
    policy: RetryPolicy,
) -> Result<()> {
    let store = open_store(config)?;

    let job = JobInstance::new(queue, TaskDefinition::new(task_type, payload.into_bytes()), policy);
    store.enqueue(&job)?;

    println!("Enqueued: {}", job.id);
    println!("  queue: {}", queue);
    Ok(())
}

/// List jobs
fn cmd_jobs(config: &Config, queue: Option<&str>, state: Option<&str>, format: OutputFormat) -> Result<()> {
    let store = open_store(config)?;

    let state = state
        .map(|s| s.parse::<JobState>().map_err(|e| eyre::eyre!(e)))
        .transpose()?;
    let jobs = store.list_jobs(queue, state)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        OutputFormat::Text => {
            if jobs.is_empty() {
                println!("No jobs matched.");
                return Ok(());
            }
            for job in jobs {
                println!("{}", job.id);
                println!("  queue: {}  state: {}  attempt: {}", job.queue, job.state, job.attempt);
                println!("  task type: {}", job.task.task_type);
                if let Some(error) = &job.last_error {
                    println!("  last error: {}", error);
                }
            }
        }
    }
    Ok(())
}

/// Show per-queue job counts
fn cmd_status(config: &Config, format: OutputFormat) -> Result<()> {
    let store = open_store(config)?;
    let stats = store.stats()?;

    match format {
        OutputFormat::Json => {
            let json = stats
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "queue": s.queue,
                        "pending": s.pending,
                        "leased": s.leased,
                        "failed": s.failed,
                    })
                })
                .collect::<Vec<_>>();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if stats.is_empty() {
                println!("No jobs in any queue.");
                return Ok(());
            }
            println!("{:<20} {:>8} {:>8} {:>8}", "QUEUE", "PENDING", "LEASED", "FAILED");
            for s in stats {
                println!("{:<20} {:>8} {:>8} {:>8}", s.queue, s.pending, s.leased, s.failed);
            }
        }
    }
    Ok(())
}
