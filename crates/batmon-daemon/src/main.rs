//! batmon daemon
//!
//! Watches the fuel gauge on a Raspberry Pi UPS board and powers the system
//! off before the battery is drained.
//!
//! Startup sequence:
//! 1. Load configuration (file, then `BATMON_*` environment overrides)
//! 2. Open the I2C adapter and calibrate the gauge
//! 3. Wait one conversion period, then sample on a fixed interval
//! 4. Stop on SIGINT/SIGTERM

use anyhow::{Context, Result};
use batmon_config::{BatmonConfig, CONFIG_DIR, MonitorConfig};
use batmon_hal::{FuelGauge, LinuxI2cBus, SharedBus};
use batmon_monitor::{
    BatteryMonitor, CommandShutdown, LogSink, MonitorSettings, PresentationSink, StatusFileSink,
};
use std::path::{Path, PathBuf};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup_logging();

    info!("batmon v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = config_path();
    let config = BatmonConfig::load_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    let config_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new(CONFIG_DIR));
    let gauge_settings = config
        .gauge_settings(config_dir)
        .context("Failed to resolve gauge settings")?;

    info!(
        "Using board '{}' at 0x{:02x} on {}",
        gauge_settings.board,
        gauge_settings.address,
        config.bus.device_path().display()
    );

    let bus = match &config.bus.device {
        Some(device) => LinuxI2cBus::open_path(device, config.bus.timeout()),
        None => LinuxI2cBus::open(config.bus.bus, config.bus.timeout()),
    }
    .context("Failed to open I2C bus")?;
    let gauge = FuelGauge::new(
        SharedBus::new(bus),
        gauge_settings.address,
        gauge_settings.calibration,
        gauge_settings.curve,
    )?;

    let mut sinks: Vec<Box<dyn PresentationSink + Send>> = vec![Box::new(LogSink)];
    if let Some(path) = &config.status.file {
        info!("Publishing status to {}", path.display());
        sinks.push(Box::new(StatusFileSink::new(path)));
    }

    let shutdown = CommandShutdown::from_command(&config.shutdown.command)
        .context("Shutdown command is empty")?;

    let mut monitor = BatteryMonitor::start(
        gauge,
        sinks,
        shutdown,
        monitor_settings(&config.monitor),
    )
    .context("Failed to start battery monitor")?;

    // Let the first conversion complete before sampling
    tokio::time::sleep(config.monitor.settle()).await;

    let (quit_tx, quit_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            error!("Signal handling failed: {}", e);
        }
        let _ = quit_tx.send(true);
    });

    monitor.run(quit_rx).await;

    info!("batmon stopped");
    Ok(())
}

fn setup_logging() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_ansi(false))
        .init();
}

/// Configuration file from the first argument or `BATMON_CONFIG`
fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("BATMON_CONFIG"))
        .map(PathBuf::from)
}

fn monitor_settings(config: &MonitorConfig) -> MonitorSettings {
    MonitorSettings {
        interval: config.interval(),
        unavailable_after: config.unavailable_after,
        recalibrate_after_failure: config.recalibrate_after_failure,
        shutdown_on_critical: config.shutdown_on_critical,
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received SIGINT");
        }
        _ = terminate.recv() => {
            info!("Received SIGTERM");
        }
    }
    Ok(())
}
