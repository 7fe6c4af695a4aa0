//! Resilience and caching core for industrial controller access.

pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod executor;
pub mod ha;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod resilience;

pub use cache::TagValueCache;
pub use config::schema::GatewayConfig;
pub use device::{DeviceLink, TagValue};
pub use error::{GatewayError, GatewayResult};
pub use executor::ResilientExecutor;
pub use ha::HighAvailabilityManager;
pub use lifecycle::Shutdown;
pub use pool::ConnectionPool;
pub use resilience::CircuitBreaker;
