//! Tag reads and writes routed through cache, breaker and pool or failover.

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::{CacheStatistics, TagValueCache};
use crate::config::validation::ValidationError;
use crate::config::{ConfigError, GatewayConfig, RoutingMode};
use crate::device::{DeviceLink, DeviceResult, LinkFactory, TagDefinition, TagValue};
use crate::error::{GatewayError, GatewayResult};
use crate::executor::registry::TagRegistry;
use crate::ha::{FailoverStatistics, HighAvailabilityManager};
use crate::health::HealthCheck;
use crate::observability::metrics;
use crate::pool::{ConnectionPool, PoolStatistics};
use crate::resilience::{with_timeout, BreakerSnapshot, CircuitBreaker, RetryPolicy};

/// Where device calls go.
#[derive(Debug, Clone)]
pub enum Route {
    Pool(Arc<ConnectionPool>),
    Failover(Arc<HighAvailabilityManager>),
}

impl Route {
    /// Run one device call on a pooled session or the failover chain, bounded
    /// by `timeout` per link.
    async fn call<T, F, Fut>(&self, timeout: Duration, operation: &str, op: F) -> GatewayResult<T>
    where
        F: Fn(Arc<dyn DeviceLink>) -> Fut,
        Fut: Future<Output = DeviceResult<T>>,
    {
        match self {
            Route::Pool(pool) => {
                let guard = pool.acquire().await?;
                let fut = op(guard.link.clone());
                let result = with_timeout(timeout, operation, async { fut.await.map_err(GatewayError::from) }).await;
                if let Err(e) = &result {
                    if e.is_retryable() {
                        pool.mark_unhealthy(&guard);
                    }
                }
                result
            }
            Route::Failover(manager) => {
                manager
                    .execute(|link| {
                        let fut = op(link);
                        with_timeout(timeout, operation, async { fut.await.map_err(GatewayError::from) })
                    })
                    .await
            }
        }
    }

    pub fn health_check(&self) -> Arc<dyn HealthCheck> {
        match self {
            Route::Pool(pool) => pool.clone(),
            Route::Failover(manager) => manager.clone(),
        }
    }

    pub async fn shutdown(&self) {
        match self {
            Route::Pool(pool) => pool.shutdown().await,
            Route::Failover(manager) => manager.shutdown().await,
        }
    }
}

/// Settings that can change while running.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub cache_ttl: Duration,
    pub operation_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ExecutorSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            cache_ttl: config.cache.ttl(),
            operation_timeout: config.timeouts.operation(),
            retry: RetryPolicy::from_config(&config.retries),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStatistics {
    pub cache: CacheStatistics,
    pub breaker: BreakerSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failover: Option<FailoverStatistics>,
}

/// Composition root for tag access.
#[derive(Debug)]
pub struct ResilientExecutor {
    cache: Arc<TagValueCache<TagValue>>,
    breaker: Arc<CircuitBreaker>,
    route: Route,
    registry: ArcSwap<TagRegistry>,
    settings: ArcSwap<ExecutorSettings>,
}

impl ResilientExecutor {
    pub fn new(
        cache: Arc<TagValueCache<TagValue>>,
        breaker: Arc<CircuitBreaker>,
        route: Route,
        registry: TagRegistry,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            cache,
            breaker,
            route,
            registry: ArcSwap::from_pointee(registry),
            settings: ArcSwap::from_pointee(settings),
        }
    }

    /// Build the whole stack from configuration, connecting every endpoint.
    pub async fn from_config(config: &GatewayConfig, factory: &dyn LinkFactory) -> Result<Self, ConfigError> {
        let route = match config.mode {
            RoutingMode::Pool => Route::Pool(Arc::new(
                ConnectionPool::connect(&config.connections, &config.pool, factory, config.timeouts.connect()).await,
            )),
            RoutingMode::Failover => {
                let primary = config
                    .failover
                    .primary
                    .as_ref()
                    .ok_or_else(|| ConfigError::Validation(vec![ValidationError::NoPrimary]))?;
                Route::Failover(Arc::new(
                    HighAvailabilityManager::connect(
                        primary,
                        &config.failover.backups,
                        factory,
                        config.timeouts.connect(),
                    )
                    .await,
                ))
            }
        };
        let component = match config.mode {
            RoutingMode::Pool => "pool",
            RoutingMode::Failover => "failover",
        };

        Ok(Self::new(
            Arc::new(TagValueCache::new(config.cache.ttl())),
            Arc::new(CircuitBreaker::new(component, config.breaker.clone())),
            route,
            TagRegistry::new(config.tags.iter().cloned()),
            ExecutorSettings::from_config(config),
        ))
    }

    pub fn cache(&self) -> &Arc<TagValueCache<TagValue>> {
        &self.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.registry.load().names().into_iter().map(str::to_string).collect()
    }

    /// Read a tag, served from cache while fresh. Concurrent misses for the
    /// same tag share one device read.
    pub async fn read(&self, name: &str) -> GatewayResult<TagValue> {
        let tag = self.resolve(name)?;
        let settings = self.settings.load_full();
        self.cache
            .get_or_fetch(&tag.name, settings.cache_ttl, || self.fetch(&tag, &settings))
            .await
    }

    /// Read several tags concurrently. Results are in input order.
    pub async fn read_many(&self, names: &[&str]) -> Vec<GatewayResult<TagValue>> {
        join_all(names.iter().map(|name| self.read(name))).await
    }

    /// Write a tag. Never retried. On success the cached value is replaced
    /// before returning.
    pub async fn write(&self, name: &str, value: TagValue) -> GatewayResult<()> {
        let tag = self.resolve(name)?;
        let data = value.encode(&tag.data_type)?;
        let settings = self.settings.load_full();
        let start = Instant::now();

        let result = self
            .breaker
            .execute(|| {
                self.route.call(settings.operation_timeout, "write", |link| {
                    let address = tag.address.clone();
                    let data = data.clone();
                    async move { link.write_raw(&address, &data).await }
                })
            })
            .await;
        metrics::record_device_operation("write", outcome(&result), start);

        match result {
            Ok(()) => {
                // Store what the controller now holds, not the caller's value.
                self.cache.set(&tag.name, tag.data_type.decode(&data)?);
                tracing::debug!(tag = %tag.name, "Tag written");
                Ok(())
            }
            Err(e) => {
                // The write may have landed; the cached value is no longer trusted.
                if e.device_attempted() {
                    self.cache.invalidate(&tag.name);
                }
                Err(e)
            }
        }
    }

    /// Drop the cached value of a tag.
    pub fn invalidate(&self, name: &str) -> bool {
        self.cache.invalidate(name)
    }

    /// Swap in new runtime settings and tag definitions.
    ///
    /// Breaker, pool and failover settings take effect on restart only.
    pub fn apply_config(&self, config: &GatewayConfig) {
        let registry = TagRegistry::new(config.tags.iter().cloned());
        let tags_changed = {
            let current = self.registry.load();
            current.len() != registry.len()
                || current
                    .definitions()
                    .any(|tag| registry.resolve(&tag.name).ok() != Some(tag))
        };
        if tags_changed {
            self.registry.store(Arc::new(registry));
            self.cache.clear();
        }

        self.settings.store(Arc::new(ExecutorSettings::from_config(config)));
        self.cache.set_default_ttl(config.cache.ttl());
        tracing::info!(
            tags_changed,
            cache_ttl_ms = config.cache.ttl_ms,
            operation_timeout_ms = config.timeouts.operation_ms,
            "Executor settings reloaded"
        );
    }

    pub fn statistics(&self) -> ExecutorStatistics {
        let (pool, failover) = match &self.route {
            Route::Pool(pool) => (Some(pool.statistics()), None),
            Route::Failover(manager) => (None, Some(manager.statistics())),
        };
        ExecutorStatistics {
            cache: self.cache.statistics(),
            breaker: self.breaker.snapshot(),
            pool,
            failover,
        }
    }

    pub async fn shutdown(&self) {
        self.route.shutdown().await;
    }

    fn resolve(&self, name: &str) -> GatewayResult<TagDefinition> {
        self.registry.load().resolve(name).cloned()
    }

    async fn fetch(&self, tag: &TagDefinition, settings: &ExecutorSettings) -> GatewayResult<TagValue> {
        let start = Instant::now();
        let result = settings
            .retry
            .run("read", move || async move {
                let raw = self
                    .breaker
                    .execute(|| {
                        self.route.call(settings.operation_timeout, "read", |link| {
                            let address = tag.address.clone();
                            async move { link.read_raw(&address).await }
                        })
                    })
                    .await?;
                tag.data_type.decode(&raw).map_err(GatewayError::from)
            })
            .await;
        metrics::record_device_operation("read", outcome(&result), start);

        if let Err(e) = &result {
            tracing::warn!(tag = %tag.name, error = %e, kind = e.kind(), "Tag read failed");
        }
        result
    }
}

fn outcome<T>(result: &GatewayResult<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, ConnectionConfig};
    use crate::device::{DataType, SimulatedController};

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.connections = vec![ConnectionConfig::new("s0", "10.0.0.1:102")];
        config.cache = CacheConfig {
            ttl_ms: 50,
            ..CacheConfig::default()
        };
        config.retries.base_delay_ms = 1;
        config.tags = vec![TagDefinition {
            name: "speed".into(),
            address: "DB1.DBW0".into(),
            data_type: DataType::Int,
        }];
        config
    }

    async fn executor(config: &GatewayConfig) -> (Arc<SimulatedController>, ResilientExecutor) {
        let controller = SimulatedController::new("plc");
        controller.poke("DB1.DBW0", 42i16.to_be_bytes().to_vec());
        let sim = controller.clone();
        let factory = move |conn: &ConnectionConfig| -> Arc<dyn DeviceLink> { sim.link(&conn.name) };
        let executor = ResilientExecutor::from_config(config, &factory).await.unwrap();
        (controller, executor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_is_cached_until_ttl() {
        let (controller, executor) = executor(&config()).await;

        assert_eq!(executor.read("speed").await, Ok(TagValue::Int(42)));
        controller.poke("DB1.DBW0", 7i16.to_be_bytes().to_vec());
        assert_eq!(executor.read("speed").await, Ok(TagValue::Int(42)));
        assert_eq!(controller.read_count(), 1);

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(executor.read("speed").await, Ok(TagValue::Int(7)));
        assert_eq!(controller.read_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_updates_cache() {
        let (controller, executor) = executor(&config()).await;
        executor.read("speed").await.unwrap();

        executor.write("speed", TagValue::Int(-5)).await.unwrap();
        assert_eq!(controller.peek("DB1.DBW0"), Some((-5i16).to_be_bytes().to_vec()));
        assert_eq!(executor.read("speed").await, Ok(TagValue::Int(-5)));
        assert_eq!(controller.read_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_type_mismatch_never_reaches_device() {
        let (controller, executor) = executor(&config()).await;
        let err = executor.write("speed", TagValue::Bool(true)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Tag(_)));
        assert!(!err.device_attempted());
        assert_eq!(controller.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tag() {
        let (_controller, executor) = executor(&config()).await;
        assert_eq!(
            executor.read("pressure").await,
            Err(GatewayError::UnknownTag("pressure".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_config_changes_ttl_and_tags() {
        let mut cfg = config();
        let (controller, executor) = executor(&cfg).await;
        executor.read("speed").await.unwrap();

        cfg.cache.ttl_ms = 5_000;
        cfg.tags.push(TagDefinition {
            name: "running".into(),
            address: "DB1.DBX2.0".into(),
            data_type: DataType::Bool,
        });
        controller.poke("DB1.DBX2.0", vec![1]);
        executor.apply_config(&cfg);

        assert_eq!(executor.cache().default_ttl(), Duration::from_millis(5_000));
        assert_eq!(executor.read("running").await, Ok(TagValue::Bool(true)));
        assert_eq!(executor.tag_names(), vec!["running", "speed"]);
    }
}
