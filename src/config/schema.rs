//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.
//! Durations are plain millisecond counts; accessor methods convert them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::device::TagDefinition;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// How device calls are routed.
    pub mode: RoutingMode,

    /// Pooled sessions (used in `pool` mode).
    pub connections: Vec<ConnectionConfig>,

    /// Redundant controllers (used in `failover` mode).
    pub failover: FailoverConfig,

    /// Tag definitions.
    pub tags: Vec<TagDefinition>,

    /// Tag value cache settings.
    pub cache: CacheConfig,

    /// Circuit breaker settings.
    pub breaker: CircuitBreakerConfig,

    /// Connection pool settings.
    pub pool: PoolConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Simulated controller behavior (demo binary only).
    pub simulation: SimulationConfig,
}

/// Routing mode for device calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Spread calls across a pool of equivalent sessions.
    #[default]
    Pool,
    /// Send all calls to the first healthy of a primary + ordered backups.
    Failover,
}

/// A single controller session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Unique connection identifier.
    pub name: String,

    /// Controller address (e.g., "192.168.0.10:102").
    pub address: String,

    /// Rack number of the CPU.
    #[serde(default)]
    pub rack: u16,

    /// Slot number of the CPU.
    #[serde(default = "default_slot")]
    pub slot: u16,

    /// Failover priority (lower = preferred). Ignored in pool mode.
    #[serde(default)]
    pub priority: u32,
}

fn default_slot() -> u16 {
    1
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            rack: 0,
            slot: default_slot(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Primary and backup controllers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub primary: Option<ConnectionConfig>,
    pub backups: Vec<ConnectionConfig>,
}

/// Tag value cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time a cached value stays fresh, in milliseconds.
    pub ttl_ms: u64,

    /// Interval of the background expiry sweep, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 500,
            sweep_interval_ms: 5_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial call, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Factor applied to the open interval after each failed trial.
    /// 1.0 keeps it constant.
    pub backoff_multiplier: f64,

    /// Upper bound for the backed-off open interval, in milliseconds.
    pub max_reset_timeout_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn max_reset_timeout(&self) -> Duration {
        Duration::from_millis(self.max_reset_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 10_000,
            backoff_multiplier: 1.0,
            max_reset_timeout_ms: 60_000,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of pooled sessions.
    pub max_size: usize,

    /// Maximum time `acquire()` waits for a free session, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            acquire_timeout_ms: 2_000,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in milliseconds.
    pub interval_ms: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            timeout_ms: 1_000,
        }
    }
}

/// Retry configuration (read path only).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
        }
    }
}

/// Timeout configuration for device operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Session establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Single read/write round trip timeout in milliseconds.
    pub operation_ms: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn operation(&self) -> Duration {
        Duration::from_millis(self.operation_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 3_000,
            operation_ms: 1_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Interval between statistics reports, in seconds.
    pub stats_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            stats_interval_secs: 10,
        }
    }
}

/// Simulated controller behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Base round-trip latency in milliseconds.
    pub latency_ms: u64,

    /// Random extra latency in milliseconds.
    pub jitter_ms: u64,

    /// Tag poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency_ms: 5,
            jitter_ms: 10,
            poll_interval_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DataType;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.mode, RoutingMode::Pool);
        assert_eq!(config.cache.ttl(), Duration::from_millis(500));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert!(config.health_check.enabled);
    }

    #[test]
    fn test_failover_config_parses() {
        let config: GatewayConfig = toml::from_str(
            r#"
            mode = "failover"

            [failover.primary]
            name = "cpu-a"
            address = "10.0.0.1:102"

            [[failover.backups]]
            name = "cpu-b"
            address = "10.0.0.2:102"
            priority = 1

            [[tags]]
            name = "speed"
            address = "DB500.DBD0"
            data_type = "real"

            [breaker]
            failure_threshold = 3
            reset_timeout_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, RoutingMode::Failover);
        assert_eq!(config.failover.primary.as_ref().unwrap().slot, 1);
        assert_eq!(config.failover.backups[0].priority, 1);
        assert_eq!(config.tags[0].data_type, DataType::Real);
        assert_eq!(config.breaker.reset_timeout(), Duration::from_millis(100));
        assert_eq!(config.breaker.backoff_multiplier, 1.0);
    }
}
