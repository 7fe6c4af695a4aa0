//! PLC gateway (demo runner)
//!
//! Wires the resilience core against in-process simulated controllers and
//! polls the configured tags until Ctrl-C.
//!
//! # Architecture Overview
//!
//! ```text
//!   poll loop / callers
//!          │ read(tag) / write(tag, value)
//!          ▼
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ ResilientExecutor                                            │
//!   │   registry ─▶ TagValueCache (TTL, coalescing)                │
//!   │                 │ miss (one leader per tag)                  │
//!   │                 ▼                                            │
//!   │             retry (reads) ─▶ CircuitBreaker                  │
//!   │                                 │ admitted                   │
//!   │                                 ▼                            │
//!   │               ConnectionPool  or  HighAvailabilityManager    │
//!   │                                 │ deadline per call          │
//!   └─────────────────────────────────┼────────────────────────────┘
//!                                     ▼
//!                               DeviceLink ──▶ controller
//!
//!   background: HealthMonitor (pool / failover), cache sweeper,
//!               config watcher, stats logger
//! ```

use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};

use plc_gateway::config::watcher::ConfigWatcher;
use plc_gateway::config::{load_config, ConnectionConfig, GatewayConfig, RoutingMode};
use plc_gateway::device::{DataType, DeviceLink, SimulatedController, TagDefinition, TagValue};
use plc_gateway::health::HealthMonitor;
use plc_gateway::lifecycle::Shutdown;
use plc_gateway::observability::{logging, metrics};
use plc_gateway::ResilientExecutor;

#[derive(Parser)]
#[command(name = "plc-gateway")]
#[command(version, about = "Cached, circuit-protected tag access to industrial controllers", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. A built-in demo setup is used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload runtime settings when the configuration file changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => demo_config(),
    };

    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?config.mode,
        tags = config.tags.len(),
        "plc-gateway starting"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let controllers = simulated_controllers(&config);
    let factory = {
        let controllers = controllers.clone();
        move |conn: &ConnectionConfig| -> Arc<dyn DeviceLink> {
            let controller = controllers
                .get(&conn.address)
                .cloned()
                .unwrap_or_else(|| SimulatedController::new(conn.address.clone()));
            controller.link(conn.name.clone())
        }
    };

    let executor = Arc::new(ResilientExecutor::from_config(&config, &factory).await?);
    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(
        HealthMonitor::new(executor.route().health_check(), config.health_check.clone()).run(shutdown.subscribe()),
    ));
    tasks.push(
        executor
            .cache()
            .spawn_sweeper(config.cache.sweep_interval(), shutdown.subscribe()),
    );

    // Keep the watcher alive for the lifetime of the process.
    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let watcher = watcher.run()?;
            let executor = executor.clone();
            let mut stop = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(new_config) = updates.recv() => executor.apply_config(&new_config),
                        _ = stop.recv() => break,
                    }
                }
            }));
            Some(watcher)
        }
        _ => None,
    };

    tasks.push(tokio::spawn(poll_tags(
        executor.clone(),
        Duration::from_millis(config.simulation.poll_interval_ms.max(1)),
        shutdown.subscribe(),
    )));
    tasks.push(tokio::spawn(log_statistics(
        executor.clone(),
        Duration::from_secs(config.observability.stats_interval_secs.max(1)),
        shutdown.subscribe(),
    )));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received, shutting down");
    shutdown.trigger();

    for task in tasks {
        let _ = task.await;
    }
    executor.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Repeatedly read every configured tag.
async fn poll_tags(
    executor: Arc<ResilientExecutor>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let names = executor.tag_names();
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                for (name, result) in names.iter().zip(executor.read_many(&names).await) {
                    match result {
                        Ok(value) => tracing::trace!(tag = %name, value = ?value, "Polled tag"),
                        Err(e) => tracing::debug!(tag = %name, error = %e, "Poll failed"),
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn log_statistics(
    executor: Arc<ResilientExecutor>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match serde_json::to_string(&executor.statistics()) {
                    Ok(stats) => tracing::info!(stats = %stats, "Gateway statistics"),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize statistics"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// One simulated controller per configured address, with every tag address
/// initialised to its zero value.
fn simulated_controllers(config: &GatewayConfig) -> Arc<HashMap<String, Arc<SimulatedController>>> {
    let connections = config
        .connections
        .iter()
        .chain(config.failover.primary.iter())
        .chain(config.failover.backups.iter());

    let mut controllers = HashMap::new();
    for conn in connections {
        controllers.entry(conn.address.clone()).or_insert_with(|| {
            let controller = SimulatedController::new(conn.address.clone());
            controller.set_latency(
                Duration::from_millis(config.simulation.latency_ms),
                Duration::from_millis(config.simulation.jitter_ms),
            );
            for tag in &config.tags {
                controller.poke(&tag.address, zero_value(&tag.data_type));
            }
            controller
        });
    }
    Arc::new(controllers)
}

fn zero_value(data_type: &DataType) -> Vec<u8> {
    match data_type {
        DataType::String(_) => TagValue::String(String::new())
            .encode(data_type)
            .unwrap_or_else(|_| vec![0; data_type.width()]),
        _ => vec![0; data_type.width()],
    }
}

fn demo_config() -> GatewayConfig {
    let tag = |name: &str, address: &str, data_type| TagDefinition {
        name: name.to_string(),
        address: address.to_string(),
        data_type,
    };

    GatewayConfig {
        mode: RoutingMode::Pool,
        connections: vec![
            ConnectionConfig::new("line1-a", "192.168.0.10:102"),
            ConnectionConfig::new("line1-b", "192.168.0.10:102"),
        ],
        tags: vec![
            tag("conveyor_speed", "DB1.DBW0", DataType::Int),
            tag("oven_temperature", "DB1.DBD2", DataType::Real),
            tag("line_running", "DB1.DBX6.0", DataType::Bool),
            tag("recipe_name", "DB2.DBB0", DataType::String(16)),
        ],
        ..GatewayConfig::default()
    }
}
