//! hoops-sync - Rate-limited synchronization of basketball statistics
//!
//! Command-line entry point: runs one sync job to completion and prints its
//! final state as JSON.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hoops_sync::config::Config;
use hoops_sync::jobs::{JobOrchestrator, JobParams, JobStatus, StopRelay, SyncJob};
use hoops_sync::logging::init_tracing;
use hoops_sync::persistence::{MemoryGateway, PersistenceGateway, SqliteGateway};
use hoops_sync::sync::{HttpStatsProvider, SyncContext};

/// hoops-sync - Rate-limited synchronization of basketball statistics
#[derive(Parser, Debug)]
#[command(name = "hoops-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "HOOPS_SYNC_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync job and wait for it to finish
    Run {
        /// Job type, e.g. sync_teams
        job_type: String,

        /// Job parameter as key=value, repeatable
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Keep rows in memory instead of writing the database
        #[arg(long)]
        dry_run: bool,

        /// Seconds between progress reports
        #[arg(long, default_value_t = 2)]
        poll_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;
    init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting hoops-sync");

    match args.command {
        Command::Run {
            job_type,
            params,
            dry_run,
            poll_secs,
        } => {
            let job = run_job(&config, &job_type, params, dry_run, Duration::from_secs(poll_secs.max(1))).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);

            if job.status != JobStatus::Completed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn run_job(
    config: &Config,
    job_type: &str,
    params: Vec<(String, String)>,
    dry_run: bool,
    poll: Duration,
) -> anyhow::Result<SyncJob> {
    let gateway: Arc<dyn PersistenceGateway> = if dry_run {
        info!("Dry run, rows are kept in memory");
        Arc::new(MemoryGateway::new())
    } else {
        ensure_parent_dir(&config.database.path)?;
        let gateway = SqliteGateway::new(&config.database.path).await?;
        info!(path = %config.database.path, "Database initialized");
        Arc::new(gateway)
    };

    let provider = Arc::new(HttpStatsProvider::new(&config.provider)?);
    let ctx = Arc::new(SyncContext::from_config(config, provider, gateway));
    let orchestrator = Arc::new(JobOrchestrator::new(ctx, config.jobs.clone()));

    let shutdown = CancellationToken::new();
    let janitor = orchestrator.spawn_janitor(
        Duration::from_secs(config.cache.sweep_interval_secs.max(1)),
        shutdown.clone(),
    );

    let params = params
        .into_iter()
        .fold(JobParams::new(), |params, (key, value)| params.with(key, value));
    let job_id = orchestrator.start_job(job_type, params).map_err(|e| {
        error!(error = %e, available = ?orchestrator.job_types(), "Cannot start job");
        e
    })?;

    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut signalled = false;
    let mut relay = StopRelay::default();
    let mut last_progress = None;

    let job = loop {
        let Some(job) = orchestrator.get_status(&job_id) else {
            anyhow::bail!("Job {} disappeared", job_id);
        };
        if job.is_terminal() {
            break job;
        }
        if last_progress != Some(job.progress) {
            info!(job_id = %job_id, progress = job.progress, message = %job.message, "Job progress");
            last_progress = Some(job.progress);
        }
        relay.retry(&orchestrator, &job_id);

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = &mut signal, if !signalled => {
                signalled = true;
                if !relay.request(&orchestrator, &job_id) {
                    warn!(job_id = %job_id, "Job is not running yet, stopping it once it starts");
                }
            }
        }
    };

    shutdown.cancel();
    if let Err(e) = janitor.await {
        warn!(error = %e, "Janitor did not shut down cleanly");
    }

    info!(
        job_id = %job.id,
        status = %job.status,
        succeeded = job.result.success_count,
        failed = job.result.failure_count,
        "hoops-sync finished"
    );
    Ok(job)
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn ensure_parent_dir(path: &str) -> anyhow::Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Resolves when Ctrl+C or SIGTERM is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, requesting job stop");
        }
        _ = terminate => {
            info!("Received SIGTERM, requesting job stop");
        }
    }
}
