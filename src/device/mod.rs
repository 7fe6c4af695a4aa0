//! Device access boundary.
//!
//! # Data Flow
//! ```text
//! executor / pool / failover manager
//!     → DeviceLink (trait, this module)
//!         → protocol driver (external; frames, address parsing)
//!         → sim.rs (in-process controller for tests and demos)
//!     ← raw bytes
//!     → tag.rs (decode bytes into a typed TagValue)
//! ```
//!
//! # Design Decisions
//! - The wire protocol is a collaborator; the core only sees raw bytes
//! - One link = one stateful session to one controller endpoint
//! - `probe()` is the cheap liveness check used by health loops
//! - Tag data types are a closed enum resolved when the registry is built

pub mod sim;
pub mod tag;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ConnectionConfig;

pub use sim::{SimulatedController, SimulatedLink};
pub use tag::{DataType, TagDefinition, TagError, TagValue};

/// Errors reported by a device link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Session establishment failed.
    #[error("connection to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Operation issued on a link without a session.
    #[error("not connected to {0}")]
    NotConnected(String),

    /// Controller rejected the address (wrong area, out of range).
    #[error("address {0} rejected by controller")]
    InvalidAddress(String),

    /// Transport failure (cable pull, reset, partition).
    #[error("I/O error: {0}")]
    Io(String),

    /// Controller answered with an error code.
    #[error("controller error: {0}")]
    Protocol(String),
}

impl DeviceError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DeviceError::InvalidAddress(_))
    }
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// An established session with a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub endpoint: String,
    pub established_at: Instant,
}

impl Session {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            established_at: Instant::now(),
        }
    }
}

/// A communication session to a controller endpoint.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Endpoint label used in logs and metrics.
    fn endpoint(&self) -> &str;

    /// Whether a session is currently established.
    fn is_connected(&self) -> bool;

    async fn connect(&self) -> DeviceResult<Session>;

    async fn read_raw(&self, address: &str) -> DeviceResult<Vec<u8>>;

    async fn write_raw(&self, address: &str, data: &[u8]) -> DeviceResult<()>;

    async fn disconnect(&self);

    /// Cheap liveness check.
    async fn probe(&self) -> DeviceResult<()>;
}

impl fmt::Debug for dyn DeviceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLink")
            .field("endpoint", &self.endpoint())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Builds a link for a configured connection.
pub trait LinkFactory: Send + Sync {
    fn create(&self, config: &ConnectionConfig) -> Arc<dyn DeviceLink>;
}

impl<F> LinkFactory for F
where
    F: Fn(&ConnectionConfig) -> Arc<dyn DeviceLink> + Send + Sync,
{
    fn create(&self, config: &ConnectionConfig) -> Arc<dyn DeviceLink> {
        self(config)
    }
}

/// Reconnect if needed, then probe.
pub async fn probe_or_reconnect(link: &dyn DeviceLink) -> DeviceResult<()> {
    if !link.is_connected() {
        link.connect().await?;
    }
    link.probe().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DeviceError::Io("reset by peer".into()).is_transient());
        assert!(DeviceError::NotConnected("plc-a".into()).is_transient());
        assert!(!DeviceError::InvalidAddress("DB9999.DBX0.0".into()).is_transient());
    }

    #[tokio::test]
    async fn test_probe_or_reconnect_restores_session() {
        let controller = SimulatedController::new("plc-a");
        let link = controller.link("plc-a:102");
        assert!(!link.is_connected());

        probe_or_reconnect(link.as_ref()).await.unwrap();
        assert!(link.is_connected());
    }
}
