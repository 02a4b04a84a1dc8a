use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use tailwatch_alerts::{AlertFactory, PatternMatcher, SinkRegistry};
use tailwatch_monitor::{ConfigReloadManager, MonitorCoordinator, resolve_rules_path};

mod settings;

use settings::Settings;

/// Tailwatch - tail log files and raise alerts on matching lines
#[derive(Parser, Debug)]
#[command(name = "tailwatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rule file, a JSON array of {logFile, pattern, severity, destination}
    #[arg(short, long, value_name = "PATH")]
    rules: Option<PathBuf>,

    /// Runtime settings file (TOML)
    #[arg(short, long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Do not watch the rule file for changes
    #[arg(long)]
    no_reload: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries console alerts
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let settings = Settings::load(args.settings.as_deref())?;
    let rules_path = resolve_rules_path(args.rules.as_deref());

    let coordinator = MonitorCoordinator::new(
        settings.coordinator_config(),
        PatternMatcher::new(),
        AlertFactory::new(SinkRegistry::default()),
    );
    coordinator.spawn_pending_sweep();

    let mut reload =
        ConfigReloadManager::new(&rules_path, coordinator.clone(), settings.reload_config());

    // A bad rule file at startup is not fatal: with hot reload on, fixing
    // the file activates the rules.
    match reload.load().await {
        Ok(summary) => info!(
            tailing = summary.tailing,
            pending = summary.pending,
            failed = summary.failed.len(),
            "Monitoring started"
        ),
        Err(e) => error!(error = %e, "Error loading configuration"),
    }

    if !args.no_reload {
        if let Err(e) = reload.watch().await {
            error!(error = %e, "Error setting up config file watcher, hot reload is disabled");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutting down");
    reload.shutdown().await;
    coordinator.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_release_profile_unwinds() {
        // Panicking line handlers are contained with catch_unwind
        let manifest: toml::Table = toml::from_str(include_str!("../Cargo.toml")).unwrap();
        let panic = manifest["profile"]["release"]
            .get("panic")
            .and_then(|v| v.as_str());
        assert_ne!(panic, Some("abort"));
    }
}
