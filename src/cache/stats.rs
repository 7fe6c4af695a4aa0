//! Cache statistics snapshot.

use serde::Serialize;
use tokio::time::Instant;

/// Point-in-time view of a [`TagValueCache`](super::TagValueCache).
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStatistics {
    pub total_entries: usize,
    /// Sum of `hit_count` over the current entries.
    pub total_hits: u64,
    pub total_misses: u64,
    /// `total_hits / (total_hits + total_misses)`, 0.0 before any lookup.
    pub hit_rate: f64,
    #[serde(skip)]
    pub oldest_entry: Option<Instant>,
    #[serde(skip)]
    pub newest_entry: Option<Instant>,
    pub oldest_entry_age_ms: Option<u64>,
    pub newest_entry_age_ms: Option<u64>,
    /// Fetches currently in flight.
    pub pending_request_count: usize,
    /// Callers that joined an in-flight fetch instead of starting one.
    pub coalesced_requests: u64,
    /// Upstream fetches started.
    pub upstream_fetches: u64,
    /// Entries removed by the expiry sweep.
    pub expired_evictions: u64,
}

impl CacheStatistics {
    pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
