//! Concurrent tag value cache with request coalescing.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::cache::entry::{CachedEntry, PendingFetch};
use crate::cache::stats::CacheStatistics;
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;

/// What a `get_or_fetch` caller ends up doing.
enum Role<V> {
    Hit(V),
    Follower(oneshot::Receiver<GatewayResult<V>>),
    Leader,
}

/// Key → value cache with per-key fetch coalescing.
///
/// Lock order is always `pending` before `entries`; nothing takes them the
/// other way round.
#[derive(Debug)]
pub struct TagValueCache<V> {
    entries: DashMap<String, CachedEntry<V>>,
    pending: DashMap<String, PendingFetch<V>>,
    default_ttl_ms: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> TagValueCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            pending: DashMap::new(),
            default_ttl_ms: AtomicU64::new(default_ttl.as_millis() as u64),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// TTL used by [`get`](Self::get) and the expiry sweep.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms.load(Ordering::Relaxed))
    }

    pub fn set_default_ttl(&self, ttl: Duration) {
        self.default_ttl_ms.store(ttl.as_millis() as u64, Ordering::Relaxed);
    }

    /// Non-blocking lookup. A hit bumps the entry's hit count; a miss never
    /// triggers a fetch.
    pub fn get(&self, key: &str) -> Option<CachedEntry<V>> {
        let hit = self.lookup(key, self.default_ttl());
        match &hit {
            Some(_) => metrics::record_cache_lookup("hit"),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("miss");
            }
        }
        hit
    }

    /// Return the live value for `key`, or fetch it once for every
    /// concurrent caller.
    ///
    /// The first caller that misses runs `fetch`; callers arriving while it is
    /// in flight wait for the same outcome instead of issuing their own.
    /// Failures are handed to every waiter and are not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> GatewayResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<V>>,
    {
        if let Some(entry) = self.lookup(key, ttl) {
            metrics::record_cache_lookup("hit");
            return Ok(entry.value);
        }

        let role = match self.pending.entry(key.to_string()) {
            Entry::Occupied(mut pending) => Role::Follower(pending.get_mut().subscribe()),
            Entry::Vacant(slot) => {
                // The previous leader may have stored its value after our first lookup.
                match self.lookup(key, ttl) {
                    Some(entry) => Role::Hit(entry.value),
                    None => {
                        slot.insert(PendingFetch::new(key));
                        Role::Leader
                    }
                }
            }
        };

        match role {
            Role::Hit(value) => {
                metrics::record_cache_lookup("hit");
                Ok(value)
            }
            Role::Follower(rx) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("coalesced");
                tracing::trace!(key = %key, "Joined in-flight fetch");
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::FetchAbandoned { key: key.to_string() }),
                }
            }
            Role::Leader => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.fetches.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("miss");

                let mut guard = LeaderGuard {
                    pending: &self.pending,
                    key,
                    armed: true,
                };
                let result = fetch().await;
                guard.armed = false;

                self.complete(key, &result);
                result
            }
        }
    }

    /// Install a fresh entry (hit count 0, timestamp now).
    ///
    /// A fetch already in flight for `key` will not overwrite this value.
    pub fn set(&self, key: &str, value: V) {
        self.supersede_pending(key);
        self.entries.insert(key.to_string(), CachedEntry::new(key, value));
        metrics::record_cache_size(self.entries.len());
    }

    /// Drop the entry for `key`. Returns whether one existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.supersede_pending(key);
        let removed = self.entries.remove(key).is_some();
        if removed {
            metrics::record_cache_size(self.entries.len());
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        for mut pending in self.pending.iter_mut() {
            pending.superseded = true;
        }
        self.entries.clear();
        metrics::record_cache_size(0);
    }

    /// Remove entries older than `ttl`. Returns how many were removed.
    pub fn expire_older_than(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(ttl, now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, ttl_ms = ttl.as_millis() as u64, "Expired cache entries");
        }
        metrics::record_cache_size(self.entries.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compute a statistics snapshot.
    pub fn statistics(&self) -> CacheStatistics {
        let now = Instant::now();
        let mut stats = CacheStatistics::default();

        for entry in self.entries.iter() {
            stats.total_entries += 1;
            stats.total_hits += entry.hit_count;
            stats.oldest_entry = Some(match stats.oldest_entry {
                Some(t) if t <= entry.timestamp => t,
                _ => entry.timestamp,
            });
            stats.newest_entry = Some(match stats.newest_entry {
                Some(t) if t >= entry.timestamp => t,
                _ => entry.timestamp,
            });
        }

        stats.total_misses = self.misses.load(Ordering::Relaxed);
        stats.hit_rate = CacheStatistics::hit_rate(stats.total_hits, stats.total_misses);
        stats.oldest_entry_age_ms = stats
            .oldest_entry
            .map(|t| now.saturating_duration_since(t).as_millis() as u64);
        stats.newest_entry_age_ms = stats
            .newest_entry
            .map(|t| now.saturating_duration_since(t).as_millis() as u64);
        stats.pending_request_count = self.pending.len();
        stats.coalesced_requests = self.coalesced.load(Ordering::Relaxed);
        stats.upstream_fetches = self.fetches.load(Ordering::Relaxed);
        stats.expired_evictions = self.evictions.load(Ordering::Relaxed);
        stats
    }

    fn lookup(&self, key: &str, ttl: Duration) -> Option<CachedEntry<V>> {
        let now = Instant::now();
        let mut entry = self.entries.get_mut(key)?;
        if entry.is_expired(ttl, now) {
            return None;
        }
        entry.hit_count += 1;
        Some(entry.clone())
    }

    fn supersede_pending(&self, key: &str) {
        if let Some(mut pending) = self.pending.get_mut(key) {
            pending.superseded = true;
            tracing::debug!(key = %key, "In-flight fetch superseded by write");
        }
    }

    /// Store a successful result (unless superseded) and release the waiters.
    fn complete(&self, key: &str, result: &GatewayResult<V>) {
        let pending = match self.pending.entry(key.to_string()) {
            Entry::Occupied(slot) => {
                if let Ok(value) = result {
                    if slot.get().superseded {
                        tracing::debug!(key = %key, "Discarding superseded fetch result");
                    } else {
                        self.entries
                            .insert(key.to_string(), CachedEntry::new(key, value.clone()));
                    }
                }
                Some(slot.remove())
            }
            Entry::Vacant(_) => None,
        };

        if let Some(pending) = pending {
            let waited_ms = pending.started_at.elapsed().as_millis() as u64;
            tracing::trace!(
                key = %key,
                subscribers = pending.subscribers.len(),
                waited_ms,
                ok = result.is_ok(),
                "Fetch resolved"
            );
            pending.resolve(result);
        }
        metrics::record_cache_size(self.entries.len());
    }
}

impl<V: Clone + Send + Sync + 'static> TagValueCache<V> {
    /// Periodically expire entries older than the default TTL.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.expire_older_than(cache.default_ttl());
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

/// Clears the pending record if the leader is dropped mid-fetch, so waiters
/// see `FetchAbandoned` instead of hanging.
struct LeaderGuard<'a, V> {
    pending: &'a DashMap<String, PendingFetch<V>>,
    key: &'a str,
    armed: bool,
}

impl<V> Drop for LeaderGuard<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            if let Some((_, pending)) = self.pending.remove(self.key) {
                tracing::warn!(
                    key = %self.key,
                    subscribers = pending.subscribers.len(),
                    "Fetch leader dropped before completion"
                );
            }
        }
    }
}
