//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Connect pool / failover targets
//!     → Start health monitors + cache sweeper → Serve tag traffic
//!
//! Shutdown (shutdown.rs):
//!     Ctrl-C → trigger → background loops exit → links disconnected
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then sessions, then traffic
//! - Every background loop selects on the shutdown receiver

pub mod shutdown;

pub use shutdown::Shutdown;
