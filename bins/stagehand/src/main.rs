use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use stagehand_orchestrator::{Orchestrator, RunConfig, ShutdownHandle};

/// Stagehand - staged startup and supervised shutdown for local services
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Write the machine-checkable run report as JSON
    #[arg(long, value_name = "FILE")]
    report_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    initialize_logging(args.debug);

    info!("Starting stagehand");
    info!("Config file: {}", args.config);

    let config = RunConfig::load_from_file(&args.config)?;
    info!(
        "Loaded {} stages, {} processes",
        config.stages.len(),
        config.process_names().len()
    );

    let exit_code = run(config, args.report_file.as_deref())?;
    std::process::exit(exit_code);
}

#[tokio::main]
async fn run(config: RunConfig, report_file: Option<&std::path::Path>) -> Result<i32> {
    let orchestrator = Arc::new(Orchestrator::new(config));

    spawn_signal_handler(orchestrator.shutdown_handle());

    let report = orchestrator.run().await;

    if let Some(path) = report_file {
        let json =
            serde_json::to_string_pretty(&report).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Run report written to {}", path.display());
    }

    match &report.failure {
        Some(cause) => info!("Run finished with failure: {}", cause.describe()),
        None => info!("Run finished cleanly"),
    }
    Ok(report.exit_code())
}

fn initialize_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

/// Route OS termination signals into the orchestrator's own shutdown path
/// instead of dying mid-run.
fn spawn_signal_handler(handle: ShutdownHandle) {
    tokio::spawn(async move {
        wait_for_termination_signal().await;
        handle.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to install SIGTERM handler: {}", e);
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to install SIGINT handler: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
        _ = sigint.recv() => info!("Received SIGINT signal"),
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C signal");
}
