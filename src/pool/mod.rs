//! Connection pool subsystem.
//!
//! # Data Flow
//! ```text
//! executor
//!     → connection_pool.rs acquire()
//!         scan from a rotating cursor: healthy && CAS in_use false → true
//!         none free → wait on release notification until the deadline
//!     ← PooledLink guard (Deref to the entry, link inside)
//!     → device call
//!     → failure: mark_unhealthy(&guard)
//!     → guard dropped: in_use cleared, waiters notified
//!
//! HealthMonitor tick
//!     → check_all(): reconnect + probe each unhealthy, unheld entry
//! ```
//!
//! # Design Decisions
//! - Pool size fixed at construction; entries are never dropped
//! - Release never closes the session
//! - No healthy entry at all fails at once with `PoolExhausted`; busy healthy
//!   entries are waited for up to the acquire timeout (`AcquireTimeout`)

pub mod connection_pool;
pub mod entry;

pub use connection_pool::{ConnectionPool, PoolStatistics};
pub use entry::{PoolEntry, PooledLink};
