//! Active health checking.
//!
//! # Responsibilities
//! - Periodically run the checks of one component
//! - Stop cleanly on shutdown

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use super::HealthCheck;
use crate::config::HealthCheckConfig;

pub struct HealthMonitor {
    target: Arc<dyn HealthCheck>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(target: Arc<dyn HealthCheck>, config: HealthCheckConfig) -> Self {
        Self { target, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!(component = %self.target.component(), "Active health checks disabled");
            return;
        }

        tracing::info!(
            component = %self.target.component(),
            interval_ms = self.config.interval_ms,
            timeout_ms = self.config.timeout_ms,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; startup already connected.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.target.check_all(self.config.timeout()).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!(component = %self.target.component(), "Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
