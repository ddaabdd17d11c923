//! # qv-runtime
//!
//! Command-line host for the visit verification pipeline.
//!
//! ```text
//! qv-runtime issue --client C1 --branch B1     # print a QR payload
//! qv-runtime scan 'B1|1700000000|...|...'      # validate one payload
//! qv-runtime serve                             # scan stdin lines, sync in background
//! qv-runtime sync | retry | pending | visits | stats | purge
//! ```
//!
//! Results go to stdout; logs go to stderr, filtered by `RUST_LOG` or
//! `QV_LOG_LEVEL` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use qv_runtime::{load_config, Runtime, StorageMode};
use qv_visit_verification::{
    ScanOutcome, VisitId, VisitStatus, VisitVerificationApi, VisitVerificationService,
};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const LOG_LEVEL_ENV: &str = "QV_LOG_LEVEL";

/// qv-runtime: QR visit verification and offline sync
#[derive(Parser, Debug)]
#[command(name = "qv-runtime", version)]
#[command(about = "Issue and verify QR visit tokens, sync visits to the remote authority")]
struct Args {
    /// Data directory (overrides QV_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Remote authority base URL (overrides QV_REMOTE_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Keep all state in memory (nothing survives the process)
    #[arg(long, global = true)]
    in_memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue a fresh token for a client and print its payload
    Issue {
        #[arg(long)]
        client: String,
        #[arg(long)]
        branch: String,
    },
    /// Validate one scanned payload
    Scan { payload: String },
    /// Print the number of visits awaiting sync
    Pending,
    /// List visits as JSON lines
    Visits {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// Print per-status counts
    Stats,
    /// Run one drain pass now
    Sync,
    /// Re-enqueue visits the remote refused
    Retry,
    /// Purge replay records past retention, or one visit with --visit
    Purge {
        #[arg(long)]
        visit: Option<VisitId>,
    },
    /// Validate payloads read line by line from stdin, syncing in the background
    Serve,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StatusArg {
    Pending,
    Sent,
    Error,
}

impl From<StatusArg> for VisitStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => VisitStatus::Pending,
            StatusArg::Sent => VisitStatus::Sent,
            StatusArg::Error => VisitStatus::Error,
        }
    }
}

#[derive(Serialize)]
struct ScanLine<'a> {
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    visit_id: Option<VisitId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string()))
    });
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn scan_line(outcome: &ScanOutcome) -> ScanLine<'_> {
    match outcome {
        ScanOutcome::Accepted(visit) => ScanLine {
            accepted: true,
            visit_id: Some(visit.visit_id),
            reason: None,
        },
        ScanOutcome::Rejected(reason) => ScanLine {
            accepted: false,
            visit_id: None,
            reason: Some(reason.code()),
        },
    }
}

async fn serve(service: Arc<VisitVerificationService>) -> Result<()> {
    let scheduler = service.spawn_scheduler();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Reading payloads from stdin. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("Input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let outcome = service.validate_scan(&line).await;
                print_json(&scan_line(&outcome))?;
                if outcome.is_accepted() {
                    scheduler.trigger();
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    let mut config = load_config();
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }
    if let Some(endpoint) = args.endpoint {
        config.remote.endpoint = endpoint.trim_end_matches('/').to_string();
    }
    let mode = if args.in_memory {
        StorageMode::InMemory
    } else {
        StorageMode::Durable
    };

    let runtime = Runtime::open(&config, mode)?;
    let service = runtime.service().clone();

    match args.command {
        Command::Issue { client, branch } => {
            let token = service.issue_token(&client, &branch).await?;
            println!("{}", token.encode());
        }
        Command::Scan { payload } => {
            let outcome = service.validate_scan(&payload).await;
            print_json(&scan_line(&outcome))?;
        }
        Command::Pending => println!("{}", service.pending_count().await?),
        Command::Visits { status } => {
            for visit in service.visits(status.map(Into::into)).await? {
                print_json(&visit)?;
            }
        }
        Command::Stats => print_json(&service.stats().await?)?,
        Command::Sync => print_json(&service.trigger_sync().await)?,
        Command::Retry => println!("{}", service.retry_errors().await?),
        Command::Purge { visit: Some(visit_id) } => {
            if !service.purge_visit(visit_id).await? {
                bail!("Visit {} not found", visit_id);
            }
        }
        Command::Purge { visit: None } => println!("{}", service.purge_expired_tokens().await?),
        Command::Serve => serve(service).await?,
    }

    Ok(())
}
