//! Redundant controller endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use crate::config::ConnectionConfig;
use crate::device::DeviceLink;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetRole {
    Primary,
    Backup,
}

/// One endpoint in the failover chain.
#[derive(Debug)]
pub struct FailoverTarget {
    pub config: ConnectionConfig,
    pub link: Arc<dyn DeviceLink>,
    pub role: TargetRole,
    healthy: AtomicBool,
    last_health_check_at: Mutex<Option<Instant>>,
    failures: AtomicU64,
}

/// Serializable view of a target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub name: String,
    pub role: TargetRole,
    pub priority: u32,
    pub healthy: bool,
    pub failures: u64,
    pub last_check_age_ms: Option<u64>,
}

impl FailoverTarget {
    pub fn new(config: ConnectionConfig, link: Arc<dyn DeviceLink>, role: TargetRole) -> Self {
        Self {
            config,
            link,
            role,
            healthy: AtomicBool::new(true),
            last_health_check_at: Mutex::new(None),
            failures: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn priority(&self) -> u32 {
        self.config.priority
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn last_health_check_at(&self) -> Option<Instant> {
        *self.last_health_check_at.lock().expect("target mutex poisoned")
    }

    /// Record a failed operation against this target.
    pub fn mark_unhealthy(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if self.healthy.swap(false, Ordering::AcqRel) {
            tracing::warn!(target_name = %self.name(), role = ?self.role, "Failover target marked unhealthy");
            metrics::record_target_health(self.name(), false);
        }
    }

    /// Record a probe outcome.
    pub fn record_check(&self, healthy: bool) {
        *self.last_health_check_at.lock().expect("target mutex poisoned") = Some(Instant::now());
        let was = self.healthy.swap(healthy, Ordering::AcqRel);
        if was != healthy {
            if healthy {
                tracing::info!(target_name = %self.name(), role = ?self.role, "Failover target recovered");
            } else {
                tracing::warn!(target_name = %self.name(), role = ?self.role, "Failover target failed health check");
            }
        }
        metrics::record_target_health(self.name(), healthy);
    }

    pub fn status(&self) -> TargetStatus {
        TargetStatus {
            name: self.name().to_string(),
            role: self.role,
            priority: self.priority(),
            healthy: self.is_healthy(),
            failures: self.failures.load(Ordering::Relaxed),
            last_check_age_ms: self
                .last_health_check_at()
                .map(|t| t.elapsed().as_millis() as u64),
        }
    }
}
