//! Tag access facade.
//!
//! # Data Flow
//! ```text
//! read(tag)
//!     → registry.rs resolve name → address + data type
//!     → cache get_or_fetch (hit returns here; concurrent misses coalesce)
//!     → leader: retry policy (transient failures only)
//!         → breaker admit
//!         → pool acquire / failover chain, deadline per device call
//!         → decode bytes
//!     → value stored, fanned out to every coalesced caller
//!
//! write(tag, value)
//!     → encode → breaker → pool / failover (no retry)
//!     → success: cache set before returning
//!     → attempted failure: cache entry invalidated
//! ```
//!
//! # Design Decisions
//! - Cache key is the logical tag name
//! - One breaker in front of the routing layer
//! - Runtime settings live behind ArcSwap for hot reload

pub mod registry;
pub mod resilient;

pub use registry::TagRegistry;
pub use resilient::{ExecutorSettings, ExecutorStatistics, ResilientExecutor, Route};
