//! svcrun - Command line host for the runtime engine
//!
//! - `run` launches a service and keeps the host alive until Ctrl-C
//! - `stop` asks a service of this host to stop
//! - `status` lists services recorded by any host that are still alive

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use svcrun::runtime::{PersistentRegistry, StopOutcome};
use svcrun::{RuntimeConfig, RuntimeManager};

#[derive(Parser)]
#[command(name = "svcrun", version, about = "Run built services as managed workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a service until interrupted
    Run {
        /// Service name, e.g. payment-service
        name: String,

        /// Configuration passed to the service (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        set: Vec<(String, String)>,
    },
    /// Stop a service started by this host
    Stop {
        name: String,
    },
    /// Show services that are still alive
    Status,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,svcrun=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = RuntimeConfig::from_env();
    tracing::debug!("Configuration loaded: {:?}", config);

    match cli.command {
        Command::Run { name, set } => run(config, &name, set.into_iter().collect()).await,
        Command::Stop { name } => stop(config, &name).await,
        Command::Status => status(&config),
    }
}

async fn run(config: RuntimeConfig, name: &str, settings: BTreeMap<String, String>) -> Result<()> {
    let manager = RuntimeManager::new(config);

    manager
        .run_service_with_config(name, settings)
        .with_context(|| format!("Failed to start {name}"))?;

    tracing::info!(service = %name, "Press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;

    manager.shutdown().await;
    print!("{}", manager.registry().summary());
    Ok(())
}

async fn stop(config: RuntimeConfig, name: &str) -> Result<()> {
    let manager = RuntimeManager::new(config);
    match manager.stop_service(name).await {
        StopOutcome::NotFound => println!("{name} is not running in this process"),
        StopOutcome::NotRunning => println!("{name} already finished"),
        StopOutcome::Stopped => println!("{name} stopped"),
        StopOutcome::TimedOut => println!("{name} did not stop gracefully"),
    }
    Ok(())
}

fn status(config: &RuntimeConfig) -> Result<()> {
    let registry = match &config.registry_path {
        Some(path) => PersistentRegistry::at(path),
        None => PersistentRegistry::open_default()?,
    };

    let services = registry
        .get_all_services()
        .with_context(|| format!("Failed to read {}", registry.path().display()))?;

    if services.is_empty() {
        println!("No services running");
        return Ok(());
    }

    println!("{:<24} {:>8} {:<10} {}", "SERVICE", "PID", "STATUS", "UPTIME");
    let now = Utc::now();
    for entry in services.values() {
        let uptime = (now - entry.start_time).num_seconds();
        println!(
            "{:<24} {:>8} {:<10} {}",
            entry.service_name,
            entry.process_id,
            entry.status,
            format_uptime(uptime)
        );
    }
    println!("\nTotal: {}", services.len());
    Ok(())
}

/// `3h 2m 1s`, dropping leading zero units
fn format_uptime(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}
