//! Tag value caching subsystem.
//!
//! # Data Flow
//! ```text
//! read(tag)
//!     → tag_cache.rs lookup (live entry? → hit, bump hit_count)
//!     → miss: fetch already in flight for this key?
//!         yes → subscribe to its PendingFetch, await the shared outcome
//!         no  → become leader, run the device fetch
//!     → leader stores the value (unless a write superseded it)
//!     → outcome fanned out to subscribers in registration order
//!
//! write(tag) succeeded
//!     → set(): fresh entry, hit_count 0, pending fetch marked superseded
//! ```
//!
//! # Design Decisions
//! - At most one upstream fetch per key at any instant
//! - Entry timestamp is the refresh instant; hits never move it
//! - Failures are replayed to every waiter and never cached
//! - Separate maps for entries and in-flight fetches; no global lock

pub mod entry;
pub mod stats;
pub mod tag_cache;

pub use entry::{CachedEntry, PendingFetch};
pub use stats::CacheStatistics;
pub use tag_cache::TagValueCache;
