//! Pooled session record and its RAII guard.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::ConnectionConfig;
use crate::device::DeviceLink;

/// One device session owned by the pool.
#[derive(Debug)]
pub struct PoolEntry {
    pub config: ConnectionConfig,
    pub link: Arc<dyn DeviceLink>,
    healthy: AtomicBool,
    in_use: AtomicBool,
    last_used: Mutex<Instant>,
}

impl PoolEntry {
    pub fn new(config: ConnectionConfig, link: Arc<dyn DeviceLink>) -> Self {
        Self {
            config,
            link,
            healthy: AtomicBool::new(true),
            in_use: AtomicBool::new(false),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().expect("pool entry mutex poisoned")
    }

    pub(crate) fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::AcqRel)
    }

    /// Claim exclusive use of the entry. Fails if another holder has it.
    pub(crate) fn try_claim(&self) -> bool {
        self.in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn unclaim(&self) {
        *self.last_used.lock().expect("pool entry mutex poisoned") = Instant::now();
        self.in_use.store(false, Ordering::Release);
    }
}

/// Exclusive handle on a pooled session. Returns the entry to the pool on drop.
#[derive(Debug)]
pub struct PooledLink {
    pub(crate) entry: Arc<PoolEntry>,
    pub(crate) available: Arc<Notify>,
}

impl PooledLink {
    pub fn link(&self) -> &dyn DeviceLink {
        self.entry.link.as_ref()
    }
}

impl Deref for PooledLink {
    type Target = PoolEntry;
    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

impl Drop for PooledLink {
    fn drop(&mut self) {
        self.entry.unclaim();
        self.available.notify_waiters();
    }
}
