//! Circuit breaker for device protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: device assumed down, calls fail fast
//! - Half-Open: one trial call in flight, testing if the device recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: now >= opened_until (claimed by exactly one caller)
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails (open interval × backoff_multiplier)
//! ```
//!
//! # Design Decisions
//! - One breaker per protected resource, not global
//! - Fail fast in Open state (no waiting for timeout)
//! - State changes only under the inner lock; the atomic byte lets
//!   `state()` read without locking
//! - Admission holds the same lock, so exactly one caller sees the expired
//!   deadline and becomes the trial
//! - The breaker never retries; it only decides admission

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;

/// Circuit breaker states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    opened_until: Option<Instant>,
    /// Open interval applied on the next trip; grows after failed trials.
    open_interval: Duration,
    total_calls: u64,
    successes: u64,
    failures: u64,
    rejections: u64,
    times_opened: u64,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_age_ms: Option<u64>,
    pub open_interval_ms: u64,
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    pub times_opened: u64,
}

/// Admission gate around device operations.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        tracing::info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout_ms,
            backoff_multiplier = config.backoff_multiplier,
            "Circuit breaker initialized"
        );
        metrics::record_breaker_state(&name, CircuitState::Closed as u8);

        Self {
            inner: Mutex::new(BreakerInner {
                consecutive_failures: 0,
                last_failure_at: None,
                opened_until: None,
                open_interval: config.reset_timeout(),
                total_calls: 0,
                successes: 0,
                failures: 0,
                rejections: 0,
                times_opened: 0,
            }),
            name,
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Run `operation` if the circuit admits it and record the outcome.
    ///
    /// A rejected call returns [`GatewayError::CircuitOpen`] immediately and
    /// `operation` is never invoked. Any error from `operation` counts as a
    /// failure.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let permit = self.admit()?;
        let result = operation().await;
        match &result {
            Ok(_) => permit.succeed(),
            Err(e) => permit.fail(e),
        }
        result
    }

    /// Decide admission. The returned permit must be settled with the outcome;
    /// dropping an unsettled trial permit counts as a failed trial.
    ///
    /// The state read, the deadline check and the Open → Half-Open step all
    /// happen under the same lock that every trip and reset holds, so a
    /// caller can never act on a deadline that a concurrent failed trial has
    /// already replaced.
    pub fn admit(&self) -> GatewayResult<Permit<'_>> {
        let mut inner = self.lock();
        match self.state() {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::HalfOpen => Err(self.reject_locked(&mut inner, Duration::ZERO)),
            CircuitState::Open => {
                let now = Instant::now();
                let opened_until = inner.opened_until.unwrap_or(now);
                if now < opened_until {
                    return Err(self.reject_locked(&mut inner, opened_until - now));
                }

                self.set_state(CircuitState::HalfOpen);
                tracing::info!(component = %self.name, "Circuit breaker half-open, admitting trial call");
                Ok(Permit::new(self, true))
            }
        }
    }

    /// Force the circuit open (maintenance, operator action).
    pub fn force_open(&self) {
        tracing::warn!(component = %self.name, "Circuit breaker forced open");
        let mut inner = self.lock();
        inner.opened_until = Some(Instant::now() + inner.open_interval);
        inner.times_opened += 1;
        self.set_state(CircuitState::Open);
    }

    /// Force the circuit closed and reset the failure streak.
    pub fn force_closed(&self) {
        tracing::warn!(component = %self.name, "Circuit breaker forced closed");
        let mut inner = self.lock();
        self.reset_locked(&mut inner);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: self.state(),
            consecutive_failures: inner.consecutive_failures,
            last_failure_age_ms: inner
                .last_failure_at
                .map(|t| t.elapsed().as_millis() as u64),
            open_interval_ms: inner.open_interval.as_millis() as u64,
            total_calls: inner.total_calls,
            successes: inner.successes,
            failures: inner.failures,
            rejections: inner.rejections,
            times_opened: inner.times_opened,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    fn set_state(&self, state: CircuitState) {
        self.state.store(state as u8, Ordering::Release);
        metrics::record_breaker_state(&self.name, state as u8);
    }

    fn reject_locked(&self, inner: &mut BreakerInner, retry_after: Duration) -> GatewayError {
        inner.rejections += 1;
        metrics::record_breaker_rejection(&self.name);
        tracing::debug!(component = %self.name, retry_after_ms = retry_after.as_millis() as u64, "Call rejected by open circuit");
        GatewayError::CircuitOpen {
            component: self.name.clone(),
            retry_after,
        }
    }

    fn reset_locked(&self, inner: &mut BreakerInner) {
        inner.consecutive_failures = 0;
        inner.opened_until = None;
        inner.open_interval = self.config.reset_timeout();
        self.set_state(CircuitState::Closed);
    }

    fn trip_locked(&self, inner: &mut BreakerInner, now: Instant) {
        inner.opened_until = Some(now + inner.open_interval);
        inner.times_opened += 1;
        self.set_state(CircuitState::Open);
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        inner.total_calls += 1;
        inner.successes += 1;

        if trial {
            self.reset_locked(&mut inner);
            tracing::info!(component = %self.name, "Circuit breaker closed (device recovered)");
        } else if self.state() == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
    }

    fn on_failure(&self, trial: bool, error: &str) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.total_calls += 1;
        inner.failures += 1;
        inner.last_failure_at = Some(now);

        if trial {
            let grown = inner.open_interval.mul_f64(self.config.backoff_multiplier);
            inner.open_interval = grown.min(self.config.max_reset_timeout());
            self.trip_locked(&mut inner, now);
            tracing::warn!(
                component = %self.name,
                error = %error,
                open_ms = inner.open_interval.as_millis() as u64,
                "Trial call failed, circuit breaker reopened"
            );
            return;
        }

        if self.state() != CircuitState::Closed {
            return;
        }
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.config.failure_threshold {
            self.trip_locked(&mut inner, now);
            tracing::error!(
                component = %self.name,
                consecutive_failures = inner.consecutive_failures,
                open_ms = inner.open_interval.as_millis() as u64,
                error = %error,
                "Circuit breaker opened (failing fast)"
            );
        }
    }
}

/// Admission granted by [`CircuitBreaker::admit`].
#[must_use = "settle the permit with succeed() or fail()"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this permit is the Half-Open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn fail(mut self, error: &GatewayError) {
        self.settled = true;
        self.breaker.on_failure(self.trial, &error.to_string());
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.on_failure(true, "trial call cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::time::{advance, sleep};

    fn config(threshold: u32, reset_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout_ms: reset_ms,
            backoff_multiplier: 1.0,
            max_reset_timeout_ms: reset_ms * 10,
        }
    }

    fn device_err() -> GatewayError {
        GatewayError::UpstreamFetchFailed(DeviceError::Io("timeout".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_rejects_without_calling() {
        let breaker = CircuitBreaker::new("plc", config(3, 100));
        for _ in 0..3 {
            let _ = breaker.execute(|| async { Err::<(), _>(device_err()) }).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicUsize::new(0);
        let result = breaker
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.snapshot().rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_streak() {
        let breaker = CircuitBreaker::new("plc", config(3, 100));
        for _ in 0..2 {
            let _ = breaker.execute(|| async { Err::<(), _>(device_err()) }).await;
        }
        breaker.execute(|| async { Ok(()) }).await.unwrap();
        let _ = breaker.execute(|| async { Err::<(), _>(device_err()) }).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_success_closes() {
        let breaker = CircuitBreaker::new("plc", config(1, 100));
        let _ = breaker.execute(|| async { Err::<(), _>(device_err()) }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        advance(Duration::from_millis(100)).await;
        breaker.execute(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_reopens_with_backoff() {
        let mut cfg = config(1, 100);
        cfg.backoff_multiplier = 2.0;
        cfg.max_reset_timeout_ms = 300;
        let breaker = CircuitBreaker::new("plc", cfg);

        let _ = breaker.execute(|| async { Err::<(), _>(device_err()) }).await;
        advance(Duration::from_millis(100)).await;
        let _ = breaker.execute(|| async { Err::<(), _>(device_err()) }).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().open_interval_ms, 200);

        advance(Duration::from_millis(150)).await;
        assert!(matches!(breaker.admit(), Err(GatewayError::CircuitOpen { .. })));

        advance(Duration::from_millis(50)).await;
        let _ = breaker.execute(|| async { Err::<(), _>(device_err()) }).await;
        assert_eq!(breaker.snapshot().open_interval_ms, 300);

        advance(Duration::from_millis(300)).await;
        breaker.execute(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.snapshot().open_interval_ms, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_exactly_one_concurrent_trial() {
        let breaker = Arc::new(CircuitBreaker::new("plc", config(1, 100)));
        let _ = breaker.execute(|| async { Err::<(), _>(device_err()) }).await;
        advance(Duration::from_millis(100)).await;

        let admitted = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let breaker = breaker.clone();
            let admitted = admitted.clone();
            handles.push(tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        admitted.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(10)).await;
                        Ok(())
                    })
                    .await
            }));
        }

        let mut rejected = 0;
        for handle in handles {
            if let Err(GatewayError::CircuitOpen { .. }) = handle.await.unwrap() {
                rejected += 1;
            }
        }
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert_eq!(rejected, 15);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failed_trial_blocks_racing_admissions_across_threads() {
        let breaker = CircuitBreaker::new(
            "plc",
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout_ms: 1,
                backoff_multiplier: 10_000.0,
                max_reset_timeout_ms: 10_000,
            },
        );
        let threads = 8;

        for round in 0..200 {
            breaker.force_closed();
            breaker.admit().unwrap().fail(&device_err());
            std::thread::sleep(Duration::from_millis(2));

            let trials = AtomicUsize::new(0);
            let normal = AtomicUsize::new(0);
            let barrier = std::sync::Barrier::new(threads);
            std::thread::scope(|scope| {
                for _ in 0..threads {
                    scope.spawn(|| {
                        barrier.wait();
                        for _ in 0..50 {
                            match breaker.admit() {
                                Ok(permit) if permit.is_trial() => {
                                    trials.fetch_add(1, Ordering::SeqCst);
                                    permit.fail(&device_err());
                                }
                                Ok(permit) => {
                                    normal.fetch_add(1, Ordering::SeqCst);
                                    permit.succeed();
                                }
                                Err(_) => {}
                            }
                        }
                    });
                }
            });

            // The failed trial grows the interval to 10s; nothing else gets in.
            assert_eq!(trials.load(Ordering::SeqCst), 1, "round {round}");
            assert_eq!(normal.load(Ordering::SeqCst), 0, "round {round}");
            assert_eq!(breaker.state(), CircuitState::Open);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_reopens() {
        let breaker = CircuitBreaker::new("plc", config(1, 100));
        let _ = breaker.execute(|| async { Err::<(), _>(device_err()) }).await;
        advance(Duration::from_millis(100)).await;

        let permit = breaker.admit().unwrap();
        assert!(permit.is_trial());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        drop(permit);

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_operations() {
        let breaker = CircuitBreaker::new("plc", config(5, 1_000));
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.admit().is_err());

        breaker.force_closed();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.admit().is_ok());
    }
}
