//! gpuslot daemon
//!
//! Samples GPU devices in the background and logs periodic status reports.
//! Reservation admission is a library concern of `gpuslot-scheduler`; the
//! daemon does not host a plan.

use anyhow::Context;
use clap::Parser;
use gpuslot_core::{min_gpu_utilization, GpuslotConfig};
use gpuslot_monitor::DeviceMonitor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// gpuslot daemon - GPU usage monitor
#[derive(Parser, Debug)]
#[command(name = "gpuslotd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Device status command, overrides the configuration
    #[arg(long)]
    command: Option<String>,

    /// Sampling interval in milliseconds, overrides the configuration
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Seconds between status reports
    #[arg(long, default_value_t = 30)]
    report_interval_secs: u64,

    /// Take one sample, print it as JSON and exit
    #[arg(long)]
    once: bool,

    /// Log level, overrides the configuration
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<GpuslotConfig> {
    let mut config = match &args.config {
        Some(path) => GpuslotConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GpuslotConfig::default(),
    };
    if let Some(command) = &args.command {
        config.monitor.command = command.clone();
    }
    if let Some(interval_ms) = args.interval_ms {
        config.monitor.interval_ms = interval_ms;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting tracing subscriber")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&config.logging.level)?;

    info!("Starting gpuslot daemon v{}", env!("CARGO_PKG_VERSION"));

    let monitor = Arc::new(DeviceMonitor::from_config(config.monitor.clone()));

    if args.once {
        let snapshot = monitor.sample_once().await?;
        println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
        return Ok(());
    }

    let token = CancellationToken::new();
    let handle = monitor.start(token.clone());

    let mut report = tokio::time::interval(Duration::from_secs(args.report_interval_secs.max(1)));
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown requested");
                break;
            }
            _ = report.tick() => {
                let statuses = monitor.gpu_statuses();
                info!(
                    tick = monitor.tick_count(),
                    devices = statuses.len(),
                    min_utilization = min_gpu_utilization(&statuses),
                    "Status report"
                );
                for status in &statuses {
                    info!("{}", status);
                }
            }
        }
    }

    handle.shutdown().await;
    info!("gpuslot daemon stopped");
    Ok(())
}
