//! Shared utilities for integration and load testing.

use std::collections::HashMap;
use std::sync::Arc;

use plc_gateway::config::{ConnectionConfig, GatewayConfig, RoutingMode};
use plc_gateway::device::{DataType, DeviceLink, SimulatedController, TagDefinition};
use plc_gateway::ResilientExecutor;

/// An INT tag named `name` at `address`.
pub fn int_tag(name: &str, address: &str) -> TagDefinition {
    TagDefinition {
        name: name.to_string(),
        address: address.to_string(),
        data_type: DataType::Int,
    }
}

/// Pool-mode config with `sessions` connections to one address.
pub fn pool_config(address: &str, sessions: usize, tags: Vec<TagDefinition>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.mode = RoutingMode::Pool;
    config.connections = (0..sessions)
        .map(|i| ConnectionConfig::new(format!("session-{i}"), address))
        .collect();
    config.pool.max_size = sessions.max(1);
    config.tags = tags;
    config.health_check.enabled = false;
    config.retries.base_delay_ms = 1;
    config
}

/// Failover-mode config: primary at `primary`, one backup per address in `backups`.
#[allow(dead_code)]
pub fn failover_config(primary: &str, backups: &[&str], tags: Vec<TagDefinition>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.mode = RoutingMode::Failover;
    config.failover.primary = Some(ConnectionConfig::new("primary", primary));
    config.failover.backups = backups
        .iter()
        .enumerate()
        .map(|(i, address)| ConnectionConfig::new(format!("backup-{i}"), *address).with_priority(i as u32 + 1))
        .collect();
    config.tags = tags;
    config.health_check.enabled = false;
    config.retries.base_delay_ms = 1;
    config
}

/// A controller with every tag address holding `value`.
pub fn controller(name: &str, tags: &[TagDefinition], value: i16) -> Arc<SimulatedController> {
    let controller = SimulatedController::new(name);
    for tag in tags {
        controller.poke(&tag.address, value.to_be_bytes().to_vec());
    }
    controller
}

/// Build an executor whose links go to the controller named after each
/// connection address.
pub async fn executor(config: &GatewayConfig, controllers: &[Arc<SimulatedController>]) -> ResilientExecutor {
    let by_address: HashMap<String, Arc<SimulatedController>> = controllers
        .iter()
        .map(|c| (c.name().to_string(), c.clone()))
        .collect();
    let factory = move |conn: &ConnectionConfig| -> Arc<dyn DeviceLink> {
        by_address
            .get(&conn.address)
            .expect("no controller for address")
            .link(conn.name.clone())
    };
    ResilientExecutor::from_config(config, &factory)
        .await
        .expect("executor from config")
}
