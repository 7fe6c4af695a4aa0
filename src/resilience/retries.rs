//! Retry logic for device reads.
//!
//! # Responsibilities
//! - Decide whether a failed read may be attempted again
//! - Pace re-reads so a recovering controller is not flooded
//!
//! # Design Decisions
//! - Only reads are retried; writes are never replayed
//! - Circuit-open rejections are final for the call
//! - The pause doubles per failed read up to `max_delay_ms`, plus up to a
//!   tenth extra so pollers that failed together do not re-read together

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{GatewayError, GatewayResult};

/// Retry policy for idempotent device reads.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        let max_attempts = if config.enabled {
            config.max_attempts.max(1)
        } else {
            1
        };
        Self {
            max_attempts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause before re-reading after `failed_reads` consecutive failures.
    pub fn delay_after(&self, failed_reads: u32) -> Duration {
        if failed_reads == 0 {
            return Duration::ZERO;
        }
        let doubled = self
            .base_delay_ms
            .saturating_mul(1u64 << (failed_reads - 1).min(63));
        let pause_ms = doubled.min(self.max_delay_ms);
        let spread = pause_ms / 10;
        let extra = if spread > 0 {
            rand::thread_rng().gen_range(0..=spread)
        } else {
            0
        };
        Duration::from_millis(pause_ms + extra)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent.
    ///
    /// When a retry is refused without reaching the device (open circuit, no
    /// healthy session), the device failure that triggered it is returned
    /// instead.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt = 1;
        let mut previous: Option<GatewayError> = None;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && e.is_retryable() => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        operation = %operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying device operation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    previous = Some(e);
                }
                Err(e) => {
                    return Err(match previous {
                        Some(device_error) if !e.device_attempted() => {
                            tracing::debug!(
                                operation = %operation_name,
                                attempt,
                                refused_by = %e,
                                "Retry refused, reporting preceding device failure"
                            );
                            device_error
                        }
                        _ => e,
                    })
                }
            }
        }
    }
}
