//! Priority-ordered failover across redundant controllers.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::config::ConnectionConfig;
use crate::device::{probe_or_reconnect, DeviceLink, LinkFactory};
use crate::error::{GatewayError, GatewayResult};
use crate::ha::target::{FailoverTarget, TargetRole, TargetStatus};
use crate::health::HealthCheck;
use crate::observability::metrics;

const NO_ACTIVE: usize = usize::MAX;

#[derive(Debug, Clone, Serialize)]
pub struct FailoverStatistics {
    pub active: Option<String>,
    pub failovers: u64,
    pub targets: Vec<TargetStatus>,
}

/// Sends every operation to the first healthy target: primary, then backups
/// by ascending priority.
#[derive(Debug)]
pub struct HighAvailabilityManager {
    targets: Vec<Arc<FailoverTarget>>,
    active: AtomicUsize,
    failovers: AtomicU64,
}

impl HighAvailabilityManager {
    pub fn new(
        primary: (ConnectionConfig, Arc<dyn DeviceLink>),
        backups: Vec<(ConnectionConfig, Arc<dyn DeviceLink>)>,
    ) -> Self {
        let mut backups: Vec<_> = backups
            .into_iter()
            .map(|(config, link)| FailoverTarget::new(config, link, TargetRole::Backup))
            .collect();
        backups.sort_by_key(|t| t.priority());

        let targets = std::iter::once(FailoverTarget::new(primary.0, primary.1, TargetRole::Primary))
            .chain(backups)
            .map(Arc::new)
            .collect();

        Self {
            targets,
            active: AtomicUsize::new(NO_ACTIVE),
            failovers: AtomicU64::new(0),
        }
    }

    /// Create links for the primary and backups and establish sessions.
    /// Unreachable targets start unhealthy.
    pub async fn connect(
        primary: &ConnectionConfig,
        backups: &[ConnectionConfig],
        factory: &dyn LinkFactory,
        connect_timeout: Duration,
    ) -> Self {
        let manager = Self::new(
            (primary.clone(), factory.create(primary)),
            backups.iter().map(|b| (b.clone(), factory.create(b))).collect(),
        );

        let attempts = manager.targets.iter().map(|target| async move {
            let healthy = match time::timeout(connect_timeout, target.link.connect()).await {
                Ok(Ok(_)) => true,
                Ok(Err(e)) => {
                    tracing::warn!(target_name = %target.name(), error = %e, "Failover target failed to connect");
                    false
                }
                Err(_) => {
                    tracing::warn!(target_name = %target.name(), "Failover target connect timed out");
                    false
                }
            };
            target.record_check(healthy);
        });
        join_all(attempts).await;

        tracing::info!(
            targets = manager.targets.len(),
            healthy = manager.targets.iter().filter(|t| t.is_healthy()).count(),
            "Failover manager ready"
        );
        manager
    }

    pub fn targets(&self) -> &[Arc<FailoverTarget>] {
        &self.targets
    }

    /// Endpoint that served the most recent successful operation.
    pub fn active_target(&self) -> Option<&str> {
        self.targets
            .get(self.active.load(Ordering::Acquire))
            .map(|t| t.name())
    }

    /// Run `operation` against the first healthy target, moving down the
    /// chain on failure.
    ///
    /// A target that fails is marked unhealthy before the next one is tried.
    /// Errors that describe the request rather than the target (rejected
    /// address, undecodable data) are returned as-is without failing over.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> GatewayResult<T>
    where
        F: Fn(Arc<dyn DeviceLink>) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempted = 0;
        let mut last_error = None;

        for (index, target) in self.targets.iter().enumerate() {
            if !target.is_healthy() {
                continue;
            }
            attempted += 1;

            match operation(target.link.clone()).await {
                Ok(value) => {
                    self.set_active(index);
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!(target_name = %target.name(), error = %e, "Operation failed on failover target");
                    target.mark_unhealthy();
                    last_error = Some(Box::new(e));
                }
            }
        }

        tracing::error!(attempted, total = self.targets.len(), "All failover targets exhausted");
        Err(GatewayError::AllTargetsExhausted {
            attempted,
            last_error,
        })
    }

    pub fn statistics(&self) -> FailoverStatistics {
        FailoverStatistics {
            active: self.active_target().map(str::to_string),
            failovers: self.failovers.load(Ordering::Relaxed),
            targets: self.targets.iter().map(|t| t.status()).collect(),
        }
    }

    pub async fn shutdown(&self) {
        join_all(self.targets.iter().map(|t| t.link.disconnect())).await;
        tracing::info!(targets = self.targets.len(), "Failover manager closed");
    }

    fn set_active(&self, index: usize) {
        let previous = match self.active.swap(index, Ordering::AcqRel) {
            // Nothing served yet: measured against the primary.
            NO_ACTIVE => 0,
            previous => previous,
        };
        if previous == index {
            return;
        }

        let from = self.targets[previous].name();
        let to = self.targets[index].name();
        self.failovers.fetch_add(1, Ordering::Relaxed);
        metrics::record_failover(from, to);
        if index < previous {
            tracing::info!(from = %from, to = %to, "Failed back to higher-priority target");
        } else {
            tracing::warn!(from = %from, to = %to, "Failed over to lower-priority target");
        }
    }
}

#[async_trait]
impl HealthCheck for HighAvailabilityManager {
    fn component(&self) -> &str {
        "failover"
    }

    async fn check_all(&self, timeout: Duration) {
        let probes = self.targets.iter().map(|target| async move {
            let healthy = matches!(
                time::timeout(timeout, probe_or_reconnect(target.link.as_ref())).await,
                Ok(Ok(()))
            );
            target.record_check(healthy);
        });
        join_all(probes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceError, SimulatedController};

    struct Fixture {
        primary: Arc<SimulatedController>,
        backup: Arc<SimulatedController>,
        manager: HighAvailabilityManager,
    }

    async fn fixture() -> Fixture {
        let primary = SimulatedController::new("primary");
        let backup = SimulatedController::new("backup");
        for controller in [&primary, &backup] {
            controller.poke("DB1.DBW0", controller.name().as_bytes().to_vec());
        }

        let (p, b) = (primary.clone(), backup.clone());
        let factory = move |conn: &ConnectionConfig| -> Arc<dyn DeviceLink> {
            if conn.name == "primary" {
                p.link(&conn.name)
            } else {
                b.link(&conn.name)
            }
        };
        let manager = HighAvailabilityManager::connect(
            &ConnectionConfig::new("primary", "10.0.0.1:102"),
            &[ConnectionConfig::new("backup", "10.0.0.2:102").with_priority(1)],
            &factory,
            Duration::from_secs(1),
        )
        .await;

        Fixture {
            primary,
            backup,
            manager,
        }
    }

    async fn read(manager: &HighAvailabilityManager) -> GatewayResult<Vec<u8>> {
        manager
            .execute(|link| async move { link.read_raw("DB1.DBW0").await.map_err(GatewayError::from) })
            .await
    }

    #[tokio::test]
    async fn test_primary_serves_when_healthy() {
        let f = fixture().await;
        assert_eq!(read(&f.manager).await.unwrap(), b"primary".to_vec());
        assert_eq!(f.manager.active_target(), Some("primary"));
        assert_eq!(f.backup.read_count(), 0);
    }

    #[tokio::test]
    async fn test_fails_over_and_marks_primary_unhealthy() {
        let f = fixture().await;
        f.primary.set_online(false);

        assert_eq!(read(&f.manager).await.unwrap(), b"backup".to_vec());
        assert!(!f.manager.targets()[0].is_healthy());
        assert_eq!(f.manager.active_target(), Some("backup"));

        // Unhealthy primary is skipped until a probe restores it.
        f.primary.set_online(true);
        assert_eq!(read(&f.manager).await.unwrap(), b"backup".to_vec());

        f.manager.check_all(Duration::from_millis(100)).await;
        assert_eq!(read(&f.manager).await.unwrap(), b"primary".to_vec());
        assert_eq!(f.manager.statistics().failovers, 2);
    }

    #[tokio::test]
    async fn test_all_targets_exhausted() {
        let f = fixture().await;
        f.primary.set_online(false);
        f.backup.set_online(false);

        match read(&f.manager).await {
            Err(GatewayError::AllTargetsExhausted {
                attempted,
                last_error,
            }) => {
                assert_eq!(attempted, 2);
                assert!(matches!(
                    last_error.as_deref(),
                    Some(GatewayError::UpstreamFetchFailed(DeviceError::Io(_)))
                ));
            }
            other => panic!("expected AllTargetsExhausted, got {other:?}"),
        }

        // Nothing healthy left: fail fast without touching a device.
        let reads = f.primary.read_count() + f.backup.read_count();
        assert!(matches!(
            read(&f.manager).await,
            Err(GatewayError::AllTargetsExhausted { attempted: 0, .. })
        ));
        assert_eq!(f.primary.read_count() + f.backup.read_count(), reads);
    }

    #[tokio::test]
    async fn test_invalid_address_does_not_fail_over() {
        let f = fixture().await;
        let result = f
            .manager
            .execute(|link| async move { link.read_raw("DB9.DBW0").await.map_err(GatewayError::from) })
            .await;

        assert!(matches!(
            result,
            Err(GatewayError::UpstreamFetchFailed(DeviceError::InvalidAddress(_)))
        ));
        assert!(f.manager.targets()[0].is_healthy());
        assert_eq!(f.backup.read_count(), 0);
    }

    #[tokio::test]
    async fn test_health_check_records_probe_time() {
        let f = fixture().await;
        f.backup.set_online(false);
        f.manager.check_all(Duration::from_millis(100)).await;

        let stats = f.manager.statistics();
        assert!(stats.targets[0].healthy);
        assert!(!stats.targets[1].healthy);
        assert!(stats.targets.iter().all(|t| t.last_check_age_ms.is_some()));
    }
}
