//! In-process simulated controller.
//!
//! Holds a byte-addressed memory map shared by every link opened against it,
//! with knobs for latency and failure injection (offline, fail next N calls).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::device::{DeviceError, DeviceLink, DeviceResult, Session};

/// A simulated controller CPU.
#[derive(Debug)]
pub struct SimulatedController {
    name: String,
    memory: Mutex<HashMap<String, Vec<u8>>>,
    online: AtomicBool,
    fail_next: AtomicU32,
    latency_ms: AtomicU64,
    jitter_ms: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    probes: AtomicU64,
}

impl SimulatedController {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            memory: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            fail_next: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
            jitter_ms: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            probes: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a new (disconnected) link to this controller.
    pub fn link(self: &Arc<Self>, endpoint: impl Into<String>) -> Arc<SimulatedLink> {
        Arc::new(SimulatedLink {
            controller: self.clone(),
            endpoint: endpoint.into(),
            session: Mutex::new(None),
        })
    }

    /// Set the contents of an address.
    pub fn poke(&self, address: &str, data: Vec<u8>) {
        self.memory
            .lock()
            .expect("controller memory poisoned")
            .insert(address.to_string(), data);
    }

    /// Read an address without going through a link.
    pub fn peek(&self, address: &str) -> Option<Vec<u8>> {
        self.memory
            .lock()
            .expect("controller memory poisoned")
            .get(address)
            .cloned()
    }

    /// Take the controller offline (cable pull) or bring it back.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Fail the next `n` operations with an I/O error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration, jitter: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Relaxed);
        self.jitter_ms.store(jitter.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    async fn round_trip(&self) -> DeviceResult<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        let jitter = self.jitter_ms.load(Ordering::Relaxed);
        if latency > 0 || jitter > 0 {
            let extra = if jitter > 0 { fastrand::u64(0..=jitter) } else { 0 };
            tokio::time::sleep(Duration::from_millis(latency + extra)).await;
        }

        if !self.is_online() {
            return Err(DeviceError::Io(format!("{} unreachable", self.name)));
        }

        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(DeviceError::Io(format!("{} injected failure", self.name)));
        }
        Ok(())
    }
}

/// A link to a [`SimulatedController`].
#[derive(Debug)]
pub struct SimulatedLink {
    controller: Arc<SimulatedController>,
    endpoint: String,
    session: Mutex<Option<Session>>,
}

impl SimulatedLink {
    pub fn controller(&self) -> &Arc<SimulatedController> {
        &self.controller
    }

    fn require_session(&self) -> DeviceResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(DeviceError::NotConnected(self.endpoint.clone()))
        }
    }

    fn drop_session(&self) {
        *self.session.lock().expect("session mutex poisoned") = None;
    }
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.session.lock().expect("session mutex poisoned").is_some()
    }

    async fn connect(&self) -> DeviceResult<Session> {
        if !self.controller.is_online() {
            return Err(DeviceError::Connect {
                endpoint: self.endpoint.clone(),
                reason: "no route to controller".to_string(),
            });
        }
        let session = Session::new(self.endpoint.clone());
        *self.session.lock().expect("session mutex poisoned") = Some(session.clone());
        tracing::debug!(endpoint = %self.endpoint, session = %session.id, "Simulated session established");
        Ok(session)
    }

    async fn read_raw(&self, address: &str) -> DeviceResult<Vec<u8>> {
        self.require_session()?;
        self.controller.reads.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.controller.round_trip().await {
            self.drop_session();
            return Err(e);
        }
        self.controller
            .peek(address)
            .ok_or_else(|| DeviceError::InvalidAddress(address.to_string()))
    }

    async fn write_raw(&self, address: &str, data: &[u8]) -> DeviceResult<()> {
        self.require_session()?;
        self.controller.writes.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.controller.round_trip().await {
            self.drop_session();
            return Err(e);
        }
        let mut memory = self.controller.memory.lock().expect("controller memory poisoned");
        match memory.get_mut(address) {
            Some(slot) => {
                *slot = data.to_vec();
                Ok(())
            }
            None => Err(DeviceError::InvalidAddress(address.to_string())),
        }
    }

    async fn disconnect(&self) {
        self.drop_session();
    }

    async fn probe(&self) -> DeviceResult<()> {
        self.require_session()?;
        self.controller.probes.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.controller.round_trip().await {
            self.drop_session();
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_roundtrip_through_session() {
        let plc = SimulatedController::new("cpu-1");
        plc.poke("DB1.DBW0", vec![0, 0]);
        let link = plc.link("cpu-1:102");

        assert!(matches!(
            link.read_raw("DB1.DBW0").await,
            Err(DeviceError::NotConnected(_))
        ));

        link.connect().await.unwrap();
        link.write_raw("DB1.DBW0", &[0x01, 0x02]).await.unwrap();
        assert_eq!(link.read_raw("DB1.DBW0").await.unwrap(), vec![0x01, 0x02]);
        assert_eq!(plc.read_count(), 1);
        assert_eq!(plc.write_count(), 1);

        assert_eq!(
            link.read_raw("DB9.DBW0").await,
            Err(DeviceError::InvalidAddress("DB9.DBW0".into()))
        );
    }

    #[tokio::test]
    async fn test_injected_failures_drop_session() {
        let plc = SimulatedController::new("cpu-1");
        let link = plc.link("cpu-1:102");
        link.connect().await.unwrap();

        plc.fail_next(1);
        assert!(link.probe().await.is_err());
        assert!(!link.is_connected());

        link.connect().await.unwrap();
        assert!(link.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_offline_controller_refuses_connect() {
        let plc = SimulatedController::new("cpu-1");
        plc.set_online(false);
        let link = plc.link("cpu-1:102");
        assert!(matches!(link.connect().await, Err(DeviceError::Connect { .. })));
    }
}
