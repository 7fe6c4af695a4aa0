//! Gateway error taxonomy.
//!
//! Every failure surfaced by the cache, breaker, pool, failover manager and
//! executor is a [`GatewayError`]. Errors are `Clone` so that the outcome of
//! one coalesced fetch can be replayed to every waiter of that fetch.

use std::time::Duration;
use thiserror::Error;

use crate::device::{DeviceError, TagError};

/// Errors surfaced by the resilience core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// The device was contacted and the operation failed.
    #[error("upstream fetch failed: {0}")]
    UpstreamFetchFailed(#[from] DeviceError),

    /// The device was contacted but did not answer in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The breaker rejected the call; the device was not contacted.
    #[error("circuit breaker is open for {component} (retry in {retry_after:?})")]
    CircuitOpen {
        component: String,
        retry_after: Duration,
    },

    /// No healthy pool entry became available before the acquire deadline.
    #[error("connection pool exhausted: no healthy session among {total}")]
    PoolExhausted { total: usize },

    /// Healthy pool entries exist but all stayed in use until the deadline.
    #[error("pool acquire timed out after {waited:?}")]
    AcquireTimeout { waited: Duration },

    /// Every failover target failed or was unhealthy.
    #[error("all failover targets exhausted after {attempted} attempts{}", last_error_suffix(.last_error))]
    AllTargetsExhausted {
        attempted: usize,
        last_error: Option<Box<GatewayError>>,
    },

    /// The task that owned a coalesced fetch was dropped before resolving it.
    #[error("fetch for {key} was abandoned before completing")]
    FetchAbandoned { key: String },

    /// The tag name is not registered.
    #[error("unknown tag: {0}")]
    UnknownTag(String),

    /// Value could not be converted to or from controller bytes.
    #[error(transparent)]
    Tag(#[from] TagError),
}

fn last_error_suffix(last: &Option<Box<GatewayError>>) -> String {
    match last {
        Some(e) => format!(" (last error: {e})"),
        None => String::new(),
    }
}

impl GatewayError {
    /// True when a device round-trip was actually attempted.
    ///
    /// Operators use this to tell a real device fault apart from protective
    /// backoff (open circuit, exhausted pool, no healthy target).
    pub fn device_attempted(&self) -> bool {
        match self {
            GatewayError::UpstreamFetchFailed(_)
            | GatewayError::Timeout { .. }
            | GatewayError::FetchAbandoned { .. } => true,
            GatewayError::AllTargetsExhausted { attempted, .. } => *attempted > 0,
            GatewayError::Tag(TagError::Decode { .. }) => true,
            GatewayError::CircuitOpen { .. }
            | GatewayError::PoolExhausted { .. }
            | GatewayError::AcquireTimeout { .. }
            | GatewayError::UnknownTag(_)
            | GatewayError::Tag(_) => false,
        }
    }

    /// True when repeating the same call may succeed.
    ///
    /// An exhausted failover chain is final: every target it tried has just
    /// been marked unhealthy.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::UpstreamFetchFailed(e) => e.is_transient(),
            GatewayError::Timeout { .. } | GatewayError::FetchAbandoned { .. } => true,
            _ => false,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::UpstreamFetchFailed(_) => "device",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::PoolExhausted { .. } => "pool_exhausted",
            GatewayError::AcquireTimeout { .. } => "acquire_timeout",
            GatewayError::AllTargetsExhausted { .. } => "targets_exhausted",
            GatewayError::FetchAbandoned { .. } => "abandoned",
            GatewayError::UnknownTag(_) => "unknown_tag",
            GatewayError::Tag(_) => "tag",
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
