//! High-availability subsystem.
//!
//! # Data Flow
//! ```text
//! executor
//!     → manager.rs execute(operation)
//!         for target in [primary, backups by priority]:
//!             unhealthy → skip
//!             operation(link) ok  → record active target, return
//!             operation(link) err → mark unhealthy, try next
//!         none left → AllTargetsExhausted { attempted, last_error }
//!
//! HealthMonitor tick
//!     → check_all(): probe every target, update healthy + last check time
//! ```
//!
//! # Design Decisions
//! - Linear priority failover, not load balancing: one active writer at a time
//! - Recovered targets are picked up by the next call, never mid-operation
//! - With every target unhealthy the call fails fast (attempted = 0)

pub mod manager;
pub mod target;

pub use manager::{FailoverStatistics, HighAvailabilityManager};
pub use target::{FailoverTarget, TargetRole, TargetStatus};
