//! Cache entry and in-flight fetch records.

use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::GatewayResult;

/// A value last refreshed from the device.
#[derive(Debug, Clone)]
pub struct CachedEntry<V> {
    pub key: String,
    pub value: V,
    /// When the value was stored. Hits never move it.
    pub timestamp: Instant,
    pub hit_count: u64,
}

impl<V> CachedEntry<V> {
    pub fn new(key: impl Into<String>, value: V) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp: Instant::now(),
            hit_count: 0,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }

    /// Expired once strictly older than `ttl`.
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        self.age(now) > ttl
    }
}

/// An upstream fetch in progress, with the callers waiting on it.
#[derive(Debug)]
pub struct PendingFetch<V> {
    pub key: String,
    pub subscribers: Vec<oneshot::Sender<GatewayResult<V>>>,
    pub started_at: Instant,
    /// Set when a write or invalidation lands while the fetch is in flight;
    /// the result is still handed to subscribers but never stored.
    pub superseded: bool,
}

impl<V: Clone> PendingFetch<V> {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            subscribers: Vec::new(),
            started_at: Instant::now(),
            superseded: false,
        }
    }

    /// Register a waiter; it receives the outcome of this fetch.
    pub fn subscribe(&mut self) -> oneshot::Receiver<GatewayResult<V>> {
        let (tx, rx) = oneshot::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Hand the same outcome to every subscriber, in registration order.
    pub fn resolve(self, result: &GatewayResult<V>) {
        for tx in self.subscribers {
            // Subscriber may have been cancelled.
            let _ = tx.send(result.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Each clone takes the next number, so the receiver that got clone N
    /// was the Nth one served.
    #[derive(Debug)]
    struct Stamped {
        next: Arc<AtomicUsize>,
        seq: usize,
    }

    impl Clone for Stamped {
        fn clone(&self) -> Self {
            Self {
                next: self.next.clone(),
                seq: self.next.fetch_add(1, Ordering::SeqCst),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_strict() {
        let entry = CachedEntry::new("speed", 1u32);
        let ttl = Duration::from_millis(50);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!entry.is_expired(ttl, Instant::now()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(entry.is_expired(ttl, Instant::now()));
    }

    #[tokio::test]
    async fn test_resolve_fans_out_same_error() {
        let mut pending: PendingFetch<u32> = PendingFetch::new("speed");
        let first = pending.subscribe();
        let second = pending.subscribe();

        let err = GatewayError::UnknownTag("speed".into());
        pending.resolve(&Err(err.clone()));

        assert_eq!(first.await.unwrap(), Err(err.clone()));
        assert_eq!(second.await.unwrap(), Err(err));
    }

    #[tokio::test]
    async fn test_resolve_serves_waiters_in_registration_order() {
        let mut pending: PendingFetch<Stamped> = PendingFetch::new("speed");
        let receivers: Vec<_> = (0..5).map(|_| pending.subscribe()).collect();

        pending.resolve(&Ok(Stamped {
            next: Arc::new(AtomicUsize::new(0)),
            seq: usize::MAX,
        }));

        let mut served = Vec::new();
        for rx in receivers {
            served.push(rx.await.unwrap().unwrap().seq);
        }
        assert_eq!(served, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_shift_the_others() {
        let mut pending: PendingFetch<Stamped> = PendingFetch::new("speed");
        let first = pending.subscribe();
        let cancelled = pending.subscribe();
        let third = pending.subscribe();
        drop(cancelled);

        pending.resolve(&Ok(Stamped {
            next: Arc::new(AtomicUsize::new(0)),
            seq: usize::MAX,
        }));

        assert_eq!(first.await.unwrap().unwrap().seq, 0);
        assert_eq!(third.await.unwrap().unwrap().seq, 2);
    }
}
