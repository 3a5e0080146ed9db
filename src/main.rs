//! Hush entry point: CLI dispatch, signal handlers, control loop.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use hush::app::cli::Args;
use hush::app::logging::{init_tracing, reload_level, resolve_level};
use hush::config::persistence::{default_config_path, load_config};
use hush::config::types::HushConfig;
use hush::control::Launcher;
use hush::hardware::{Registry, VendorFactory};
use hush::monitor::Monitor;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path: PathBuf = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    // The file's own log level needs the config, but loading logs too: peek at it first.
    let file_level = std::fs::read_to_string(&config_path)
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
        .and_then(|v| v["agent"]["log_level"].as_str().map(str::to_string));
    let env_level = std::env::var("LOG_LEVEL").ok();
    let filter = resolve_level(args.log_level.as_deref(), env_level.as_deref(), file_level.as_deref());
    init_tracing(filter);

    let config = load_config(Some(config_path.as_path()))
        .await
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    if args.show_config {
        println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        return Ok(());
    }

    info!("Hush v{} starting with {} hosts", env!("CARGO_PKG_VERSION"), config.hosts.len());

    let monitor = Arc::new(Monitor::new());
    let launcher = Arc::new(Launcher::new(Registry::new(Arc::new(VendorFactory::new())), monitor.clone()));

    if args.test {
        info!("Running in test mode");
        launcher.run_all(&config, Instant::now()).await;
        println!("{}", serde_json::to_string_pretty(&monitor.snapshot())?);
        launcher.quiesce().await;
        return Ok(());
    }

    let interval = Duration::from_secs_f64(config.agent.tick_interval.max(0.1));
    let config = Arc::new(RwLock::new(config));

    #[cfg(unix)]
    spawn_reload_handler(config.clone(), config_path.clone(), args.log_level.clone())?;

    let loop_launcher = Arc::clone(&launcher);
    let loop_config = Arc::clone(&config);
    let control_loop = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if !loop_launcher.is_accepting() {
                break;
            }
            let config = loop_config.read().await;
            loop_launcher.tick(&config, Instant::now()).await;
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received (Ctrl+C)"),
        _ = terminate() => info!("Shutdown signal received (SIGTERM)"),
    }

    launcher.quiesce().await;
    control_loop.abort();
    info!("Hush shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// SIGHUP reloads the configuration file and the log level.
#[cfg(unix)]
fn spawn_reload_handler(config: Arc<RwLock<HushConfig>>, path: PathBuf, flag_level: Option<String>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sighup = signal(SignalKind::hangup()).context("Failed to setup SIGHUP handler")?;

    tokio::spawn(async move {
        loop {
            sighup.recv().await;
            info!("SIGHUP received, reloading configuration");

            match load_config(Some(path.as_path())).await {
                Ok(new_config) => {
                    let env_level = std::env::var("LOG_LEVEL").ok();
                    let filter = resolve_level(
                        flag_level.as_deref(),
                        env_level.as_deref(),
                        Some(new_config.agent.log_level.as_str()),
                    );
                    match reload_level(filter) {
                        Ok(()) => info!("Log level reloaded: {}", filter.to_uppercase()),
                        Err(e) => error!("Failed to reload log level: {}", e),
                    }
                    let hosts = new_config.hosts.len();
                    *config.write().await = new_config;
                    info!("Configuration reloaded with {} hosts", hosts);
                }
                Err(e) => error!("Failed to reload config: {:#}", e),
            }
        }
    });
    Ok(())
}
