//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → HealthCheck::check_all on each registered component
//!         pool:     probe/reconnect unhealthy sessions, restore on success
//!         failover: probe every target, update healthy + last check time
//!
//! Passive marking (inside pool / ha):
//!     Device error on a session or target
//!     → mark unhealthy immediately, skip until the next successful probe
//! ```
//!
//! # Design Decisions
//! - Probing runs off the request path, on its own task
//! - One failed call marks unhealthy; one successful probe restores
//! - Health state is per-session / per-target, not per-component

pub mod active;

use async_trait::async_trait;
use std::time::Duration;

pub use active::HealthMonitor;

/// A component whose members can be probed periodically.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Label used in logs.
    fn component(&self) -> &str;

    /// Probe members, each bounded by `timeout`, and update their health.
    async fn check_all(&self, timeout: Duration);
}
