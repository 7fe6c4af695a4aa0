//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that the selected routing mode has endpoints to route to
//! - Validate value ranges (thresholds > 0, timeouts > 0)
//! - Detect duplicate tag names and failover priorities
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;

use crate::config::schema::{GatewayConfig, RoutingMode};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("breaker.backoff_multiplier must be >= 1.0")]
    InvalidBackoffMultiplier,

    #[error("breaker.max_reset_timeout_ms must be >= breaker.reset_timeout_ms")]
    MaxResetBelowReset,

    #[error("pool mode requires at least one entry in [[connections]]")]
    NoConnections,

    #[error("{count} connections configured but pool.max_size is {max_size}")]
    PoolTooSmall { count: usize, max_size: usize },

    #[error("failover mode requires [failover.primary]")]
    NoPrimary,

    #[error("duplicate connection name: {0}")]
    DuplicateConnection(String),

    #[error("duplicate failover backup priority: {0}")]
    DuplicatePriority(u32),

    #[error("duplicate tag name: {0}")]
    DuplicateTag(String),

    #[error("tag {0} has an empty address")]
    EmptyTagAddress(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let positive: [(&'static str, u64); 8] = [
        ("breaker.failure_threshold", config.breaker.failure_threshold as u64),
        ("breaker.reset_timeout_ms", config.breaker.reset_timeout_ms),
        ("pool.max_size", config.pool.max_size as u64),
        ("pool.acquire_timeout_ms", config.pool.acquire_timeout_ms),
        ("health_check.interval_ms", config.health_check.interval_ms),
        ("health_check.timeout_ms", config.health_check.timeout_ms),
        ("timeouts.operation_ms", config.timeouts.operation_ms),
        ("cache.sweep_interval_ms", config.cache.sweep_interval_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::NotPositive { field });
        }
    }

    if config.retries.enabled && config.retries.max_attempts == 0 {
        errors.push(ValidationError::NotPositive {
            field: "retries.max_attempts",
        });
    }

    if !(config.breaker.backoff_multiplier >= 1.0) {
        errors.push(ValidationError::InvalidBackoffMultiplier);
    }
    if config.breaker.max_reset_timeout_ms < config.breaker.reset_timeout_ms {
        errors.push(ValidationError::MaxResetBelowReset);
    }

    match config.mode {
        RoutingMode::Pool => {
            if config.connections.is_empty() {
                errors.push(ValidationError::NoConnections);
            } else if config.pool.max_size > 0 && config.connections.len() > config.pool.max_size {
                errors.push(ValidationError::PoolTooSmall {
                    count: config.connections.len(),
                    max_size: config.pool.max_size,
                });
            }
            let mut names = HashSet::new();
            for conn in &config.connections {
                if !names.insert(conn.name.as_str()) {
                    errors.push(ValidationError::DuplicateConnection(conn.name.clone()));
                }
            }
        }
        RoutingMode::Failover => {
            if config.failover.primary.is_none() {
                errors.push(ValidationError::NoPrimary);
            }
            let mut priorities = HashSet::new();
            for backup in &config.failover.backups {
                if !priorities.insert(backup.priority) {
                    errors.push(ValidationError::DuplicatePriority(backup.priority));
                }
            }
        }
    }

    let mut tag_names = HashSet::new();
    for tag in &config.tags {
        if !tag_names.insert(tag.name.as_str()) {
            errors.push(ValidationError::DuplicateTag(tag.name.clone()));
        }
        if tag.address.trim().is_empty() {
            errors.push(ValidationError::EmptyTagAddress(tag.name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
