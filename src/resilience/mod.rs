//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Device call:
//!     → retries.rs (reads only: retry transient failures, pausing longer each time)
//!     → circuit_breaker.rs (admit, fail fast while open, record outcome)
//!     → timeouts.rs (deadline on the device round trip)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every device call has a deadline
//! - A timeout is a failure as far as the breaker is concerned
//! - One breaker guards the whole device path, in front of pool or failover

pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState, Permit};
pub use retries::RetryPolicy;
pub use timeouts::with_timeout;
