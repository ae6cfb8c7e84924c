//! # PPK2 Logger
//!
//! Log the current draw of a device under test with a Nordic Power Profiler
//! Kit 2.
//!
//! The tool finds the attached PPK2, supplies the DUT in source meter mode,
//! and writes one averaged current reading per polling interval to
//! `<log_dir>/<start>_ppk2-log.csv` until the configured duration has passed.

use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use tracing::{info, warn};

use ppk2_logger::app::{self, RunOutcome, SerialConnector};
use ppk2_logger::config::Config;
use ppk2_logger::serial::SystemPorts;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(version, about = "Log DUT current draw with a Power Profiler Kit 2")]
struct Args {
    /// TOML configuration file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the PPK2; skips auto-detection
    #[arg(short, long)]
    port: Option<String>,
}

/// Build the run configuration from the file (if any) and CLI overrides
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(port) = &args.port {
        config.device.port = Some(port.clone());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Install the Ctrl+C handler and return a future that resolves on it
///
/// The handler is live as soon as this returns, so an interrupt that
/// arrives while the session is still being set up is not lost.
fn interrupt_signal() -> std::io::Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    #[cfg(windows)]
    let mut signal = tokio::signal::windows::ctrl_c()?;

    Ok(async move {
        signal.recv().await;
        info!("Received Ctrl+C, shutting down...");
    })
}

/// Main entry point for the PPK2 logger
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Set up logging with tracing subscriber
///    - Load configuration
/// 2. **Run**
///    - Detect the PPK2 and stop early if there is none or too many
///    - Configure the session, log for the configured duration
///    - Handle Ctrl+C for graceful shutdown
/// 3. **Teardown**
///    - DUT power off, measurement stopped, log file flushed
///
/// # Errors
///
/// Returns error if the configuration is invalid, the serial port cannot
/// be used, or the log file cannot be written.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .init();

    info!("PPK2 Logger v{} starting...", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = load_config(&args)?;

    let interrupt = interrupt_signal();
    let shutdown = async move {
        match interrupt {
            Ok(signal) => signal.await,
            Err(e) => {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let outcome = app::run(
        &config,
        &SystemPorts,
        &SerialConnector::from_config(&config),
        shutdown,
    )
    .await?;

    match outcome {
        RunOutcome::NoDevice | RunOutcome::TooManyDevices(_) => {
            info!("Nothing to do, exiting");
        }
        RunOutcome::Completed(summary) => {
            info!("Run complete, total average {:.3} mA", summary.total_average_ma);
        }
        RunOutcome::Interrupted(summary) => {
            info!(
                "Run interrupted after {} of {} iterations",
                summary.iterations,
                config.total_sample_count()
            );
        }
    }

    Ok(())
}
