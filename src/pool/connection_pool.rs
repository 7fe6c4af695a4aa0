//! Bounded set of device sessions.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::config::{ConnectionConfig, PoolConfig};
use crate::device::{probe_or_reconnect, DeviceLink, LinkFactory};
use crate::error::{GatewayError, GatewayResult};
use crate::health::HealthCheck;
use crate::observability::metrics;
use crate::pool::entry::{PoolEntry, PooledLink};

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatistics {
    pub total: usize,
    pub healthy: usize,
    pub in_use: usize,
    /// Healthy and not in use.
    pub available: usize,
    pub acquired: u64,
    pub acquire_timeouts: u64,
}

/// Hands out healthy, unshared sessions from a fixed set.
#[derive(Debug)]
pub struct ConnectionPool {
    entries: Vec<Arc<PoolEntry>>,
    available: Arc<Notify>,
    cursor: AtomicUsize,
    acquire_timeout: Duration,
    acquired: AtomicU64,
    acquire_timeouts: AtomicU64,
}

impl ConnectionPool {
    /// Build a pool over already-created links. Entries start healthy.
    pub fn from_links(links: Vec<(ConnectionConfig, Arc<dyn DeviceLink>)>, config: &PoolConfig) -> Self {
        let entries = links
            .into_iter()
            .map(|(conn, link)| Arc::new(PoolEntry::new(conn, link)))
            .collect();

        Self {
            entries,
            available: Arc::new(Notify::new()),
            cursor: AtomicUsize::new(0),
            acquire_timeout: config.acquire_timeout(),
            acquired: AtomicU64::new(0),
            acquire_timeouts: AtomicU64::new(0),
        }
    }

    /// Create one link per connection and establish the sessions.
    ///
    /// Endpoints that cannot be reached within `connect_timeout` start out
    /// unhealthy; the health loop brings them in later.
    pub async fn connect(
        connections: &[ConnectionConfig],
        config: &PoolConfig,
        factory: &dyn LinkFactory,
        connect_timeout: Duration,
    ) -> Self {
        let links = connections
            .iter()
            .map(|conn| (conn.clone(), factory.create(conn)))
            .collect();
        let pool = Self::from_links(links, config);

        let attempts = pool.entries.iter().map(|entry| async move {
            match time::timeout(connect_timeout, entry.link.connect()).await {
                Ok(Ok(session)) => {
                    tracing::info!(connection = %entry.name(), session = %session.id, "Pool session established");
                }
                Ok(Err(e)) => {
                    entry.set_healthy(false);
                    tracing::warn!(connection = %entry.name(), error = %e, "Pool session failed to connect");
                }
                Err(_) => {
                    entry.set_healthy(false);
                    tracing::warn!(connection = %entry.name(), "Pool session connect timed out");
                }
            }
        });
        join_all(attempts).await;

        let stats = pool.statistics();
        metrics::record_pool_healthy(stats.healthy);
        tracing::info!(total = stats.total, healthy = stats.healthy, "Connection pool ready");
        pool
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wait up to the acquire timeout for a healthy, unused entry.
    ///
    /// With no healthy entry at all this fails at once with
    /// [`GatewayError::PoolExhausted`]; waiting cannot help until a probe
    /// restores one.
    pub async fn acquire(&self) -> GatewayResult<PooledLink> {
        if self.entries.is_empty() {
            metrics::record_pool_acquire("exhausted");
            return Err(GatewayError::PoolExhausted { total: 0 });
        }

        let start = Instant::now();
        let deadline = start + self.acquire_timeout;
        loop {
            // Register interest before scanning so a release between the scan
            // and the wait is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(guard) = self.try_acquire() {
                return Ok(guard);
            }
            if self.healthy_count() == 0 {
                return Err(self.acquire_failed(start.elapsed()));
            }

            if time::timeout_at(deadline, notified).await.is_err() {
                if let Some(guard) = self.try_acquire() {
                    return Ok(guard);
                }
                return Err(self.acquire_failed(start.elapsed()));
            }
        }
    }

    /// Claim a free entry without waiting.
    pub fn try_acquire(&self) -> Option<PooledLink> {
        let len = self.entries.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..len {
            let entry = &self.entries[(start + offset) % len];
            if entry.is_healthy() && entry.try_claim() {
                self.acquired.fetch_add(1, Ordering::Relaxed);
                metrics::record_pool_acquire("ok");
                return Some(PooledLink {
                    entry: entry.clone(),
                    available: self.available.clone(),
                });
            }
        }
        None
    }

    /// Return an entry. Dropping the guard does the same.
    pub fn release(&self, guard: PooledLink) {
        drop(guard);
    }

    /// Exclude the entry from `acquire()` until a probe restores it.
    pub fn mark_unhealthy(&self, guard: &PooledLink) {
        if guard.set_healthy(false) {
            tracing::warn!(connection = %guard.name(), "Pool session marked unhealthy");
            metrics::record_pool_healthy(self.healthy_count());
        }
    }

    pub fn statistics(&self) -> PoolStatistics {
        let mut stats = PoolStatistics {
            total: self.entries.len(),
            acquired: self.acquired.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            ..PoolStatistics::default()
        };
        for entry in &self.entries {
            let healthy = entry.is_healthy();
            let in_use = entry.is_in_use();
            stats.healthy += healthy as usize;
            stats.in_use += in_use as usize;
            stats.available += (healthy && !in_use) as usize;
        }
        stats
    }

    /// Disconnect every session.
    pub async fn shutdown(&self) {
        join_all(self.entries.iter().map(|entry| entry.link.disconnect())).await;
        tracing::info!(total = self.entries.len(), "Connection pool closed");
    }

    fn healthy_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_healthy()).count()
    }

    fn acquire_failed(&self, waited: Duration) -> GatewayError {
        self.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
        if self.healthy_count() == 0 {
            metrics::record_pool_acquire("exhausted");
            tracing::warn!(total = self.entries.len(), "No healthy pool sessions");
            GatewayError::PoolExhausted {
                total: self.entries.len(),
            }
        } else {
            metrics::record_pool_acquire("timeout");
            tracing::debug!(waited_ms = waited.as_millis() as u64, "Pool acquire timed out");
            GatewayError::AcquireTimeout { waited }
        }
    }

    async fn probe_entry(&self, entry: &PoolEntry, timeout: Duration) -> bool {
        // Held entries are probed on a later round.
        if entry.is_healthy() || !entry.try_claim() {
            return false;
        }

        let restored = match time::timeout(timeout, probe_or_reconnect(entry.link.as_ref())).await {
            Ok(Ok(())) => {
                entry.set_healthy(true);
                tracing::info!(connection = %entry.name(), "Pool session recovered");
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(connection = %entry.name(), error = %e, "Pool session probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(connection = %entry.name(), "Pool session probe timed out");
                false
            }
        };
        entry.unclaim();
        restored
    }
}

#[async_trait]
impl HealthCheck for ConnectionPool {
    fn component(&self) -> &str {
        "pool"
    }

    async fn check_all(&self, timeout: Duration) {
        let results = join_all(self.entries.iter().map(|entry| self.probe_entry(entry, timeout))).await;
        if results.into_iter().any(|restored| restored) {
            self.available.notify_waiters();
        }
        metrics::record_pool_healthy(self.healthy_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedController;

    fn pool_config(timeout_ms: u64) -> PoolConfig {
        PoolConfig {
            max_size: 4,
            acquire_timeout_ms: timeout_ms,
        }
    }

    async fn pool_of(n: usize, timeout_ms: u64) -> (Arc<SimulatedController>, ConnectionPool) {
        let controller = SimulatedController::new("plc");
        let connections: Vec<_> = (0..n)
            .map(|i| ConnectionConfig::new(format!("s{i}"), "10.0.0.1:102"))
            .collect();
        let sim = controller.clone();
        let factory = move |conn: &ConnectionConfig| -> Arc<dyn DeviceLink> { sim.link(&conn.name) };
        let pool = ConnectionPool::connect(&connections, &pool_config(timeout_ms), &factory, Duration::from_secs(1)).await;
        (controller, pool)
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_is_exclusive() {
        let (_controller, pool) = pool_of(2, 50).await;
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.name(), b.name());
        assert_eq!(pool.statistics().in_use, 2);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, GatewayError::AcquireTimeout { .. }));

        pool.release(a);
        assert_eq!(pool.statistics().available, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_wakes_on_release() {
        let (_controller, pool) = pool_of(1, 1_000).await;
        let pool = Arc::new(pool);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|g| g.name().to_string()) })
        };
        time::sleep(Duration::from_millis(100)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), "s0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_unhealthy_fails_without_waiting() {
        let (_controller, pool) = pool_of(2, 200).await;
        for _ in 0..2 {
            let guard = pool.acquire().await.unwrap();
            pool.mark_unhealthy(&guard);
        }

        let start = Instant::now();
        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err, GatewayError::PoolExhausted { total: 2 });
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_fails_when_held_entry_goes_unhealthy() {
        let (_controller, pool) = pool_of(1, 500).await;
        let pool = Arc::new(pool);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|g| g.name().to_string()) })
        };
        time::sleep(Duration::from_millis(10)).await;
        pool.mark_unhealthy(&held);
        drop(held);

        assert_eq!(waiter.await.unwrap(), Err(GatewayError::PoolExhausted { total: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_restores_unhealthy_entry() {
        let (controller, pool) = pool_of(1, 50).await;
        controller.set_online(false);
        let guard = pool.acquire().await.unwrap();
        pool.mark_unhealthy(&guard);
        drop(guard);

        pool.check_all(Duration::from_millis(100)).await;
        assert_eq!(pool.statistics().healthy, 0);

        controller.set_online(true);
        pool.check_all(Duration::from_millis(100)).await;
        assert_eq!(pool.statistics().healthy, 1);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_at_startup_starts_unhealthy() {
        let controller = SimulatedController::new("plc");
        controller.set_online(false);
        let sim = controller.clone();
        let factory = move |conn: &ConnectionConfig| -> Arc<dyn DeviceLink> { sim.link(&conn.name) };
        let pool = ConnectionPool::connect(
            &[ConnectionConfig::new("s0", "10.0.0.1:102")],
            &pool_config(50),
            &factory,
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(pool.statistics().healthy, 0);
    }
}
