//! `whisperer-diag`: host and inspect the Whisperer diagnostics subsystem.
//!
//! `run` hosts the task registry, health monitor and crash reporter until a
//! shutdown signal arrives. `status` inspects the marker and crash log left
//! on disk without installing anything.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use whisperer_diagnostics::health::{ExecutionContext, SerialQueue};
use whisperer_diagnostics::status::StatusReport;
use whisperer_diagnostics::{AppError, DiagnosticsConfig, DiagnosticsContext, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "whisperer-diag", about = "Whisperer runtime diagnostics", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Host the diagnostics subsystem until Ctrl-C or SIGTERM.
    Run,
    /// Report the marker and crash log state left by previous sessions.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let config = DiagnosticsConfig::load_from_path(&args.config)?;

    match args.command {
        Command::Status { json } => print_status(&config, json),
        Command::Run => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| AppError::Runtime(format!("failed to build tokio runtime: {err}")))?
            .block_on(run(config)),
    }
}

async fn run(config: DiagnosticsConfig) -> Result<()> {
    let status_interval = config.health.interval();
    let context = DiagnosticsContext::new(config);

    // ── Register probes before the marker exists ────────
    let worker = Arc::new(SerialQueue::spawn("diag-worker")?);
    let runtime: Arc<dyn ExecutionContext> = Arc::new(tokio::runtime::Handle::current());
    context.register_queue("tokio-runtime", runtime);
    context.register_queue("diag-worker", Arc::clone(&worker) as Arc<dyn ExecutionContext>);

    // ── Install crash capture and start probing ─────────
    let prior = match context.start() {
        Ok(prior) => prior,
        Err(err) => {
            context.shutdown().await;
            worker.shutdown();
            return Err(err);
        }
    };
    if prior.crashed() {
        warn!("the previous session did not shut down cleanly; see the crash log");
    }
    info!("diagnostics host ready");

    // ── Periodic status dump until shutdown ─────────────
    let mut ticker = tokio::time::interval(status_interval);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = ticker.tick() => log_status(&context),
        }
    }
    info!("shutdown signal received");

    // ── Clean shutdown removes the crash marker ─────────
    context.shutdown().await;
    worker.shutdown();
    info!("whisperer-diag shut down");
    Ok(())
}

fn log_status(context: &DiagnosticsContext) {
    let snapshot = context.tasks().snapshot();
    for report in context.health().status_report() {
        if report.status.is_healthy() {
            info!(probe = %report.name, status = %report.status, "probe status");
        } else {
            warn!(
                probe = %report.name,
                status = %report.status,
                consecutive_timeouts = report.consecutive_timeouts,
                "probe status"
            );
        }
    }
    info!(
        total = snapshot.total,
        completed = snapshot.completed,
        failed = snapshot.failed,
        cancelled = snapshot.cancelled,
        orphaned = snapshot.orphaned,
        "task statistics"
    );
}

fn print_status(config: &DiagnosticsConfig, json: bool) -> Result<()> {
    let report = StatusReport::collect(config).inspect_err(|err| {
        error!(%err, "failed to collect status");
    })?;
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.to_text());
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
