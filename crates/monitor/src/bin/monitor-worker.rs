//! monitor-worker: runs the configured watch and broadcast jobs until
//! SIGINT/SIGTERM, then drains in-flight firings.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use ecoalert_core::MonitorConfig;
use ecoalert_monitor::{logging, Monitor};

// ── CLI ─────────────────────────────────────────────────────────────

/// Weather and eco alert monitor.
#[derive(Parser, Debug)]
#[command(name = "monitor-worker", version, about)]
struct Cli {
    /// Path to ecoalert.toml config file.
    #[arg(long, env = "ECOALERT_CONFIG", default_value = "config/ecoalert.toml")]
    config: PathBuf,

    /// Seconds to wait for in-flight firings on shutdown.
    #[arg(long, env = "ECOALERT_SHUTDOWN_TIMEOUT", default_value_t = 30)]
    shutdown_timeout: u64,

    /// Validate config and rules, then exit without scheduling anything.
    #[arg(long)]
    check: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    let config = MonitorConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    config.log_summary();

    let monitor = Monitor::from_config(&config).context("failed to build monitor")?;
    info!(
        rules = monitor.pipeline.rules().len(),
        jobs = ?monitor.scheduler.job_ids(),
        "monitor ready"
    );
    if cli.check {
        info!("configuration is valid");
        return Ok(());
    }

    monitor.scheduler.start()?;
    os_signal().await.context("failed to listen for shutdown signals")?;
    info!("shutdown signal received");

    monitor.scheduler.shutdown();
    let timeout = Duration::from_secs(cli.shutdown_timeout);
    if tokio::time::timeout(timeout, monitor.scheduler.wait()).await.is_err() {
        warn!(?timeout, "in-flight firings did not finish in time, exiting anyway");
    }

    for (job_id, m) in &monitor.scheduler.metrics().jobs {
        info!(
            job_id = %job_id,
            fired = m.fired,
            skipped_overlap = m.skipped_overlap,
            completed = m.completed,
            failed = m.failed,
            "job totals"
        );
    }
    info!("monitor-worker exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
async fn os_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
