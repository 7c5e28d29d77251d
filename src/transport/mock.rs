//! In-memory transport that records traffic, for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{CharacteristicRef, DeviceRef, DisconnectCallback, Link, ServiceCache, Transport};
use crate::device::WRITE_CHARACTERISTIC_UUIDS;
use crate::{Error, Result};

pub(crate) const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";
pub(crate) const NAME: &str = "LEDDMX-03-DD2B";

/// A scripted write failure
#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    NotFound,
    Busy,
    Transient,
}

impl Failure {
    fn into_error(self) -> Error {
        match self {
            Failure::NotFound => Error::DeviceNotFound(ADDRESS.to_string()),
            Failure::Busy => Error::Busy("org.bluez.Error.InProgress".to_string()),
            Failure::Transient => Error::BleError("write failed".to_string()),
        }
    }
}

#[derive(Default)]
pub(crate) struct MockState {
    pub connects: AtomicUsize,
    pub write_attempts: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub written: Mutex<Vec<Vec<u8>>>,
    pub cached_on_connect: Mutex<Vec<bool>>,
    write_failures: Mutex<VecDeque<Failure>>,
    disconnect_fails: AtomicBool,
    live: Mutex<Option<(Arc<AtomicBool>, DisconnectCallback)>>,
}

pub(crate) struct MockTransport {
    pub state: Arc<MockState>,
    device: Option<DeviceRef>,
    characteristics: ServiceCache,
    connect_delay: Duration,
    discovery_fails: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            device: Some(DeviceRef {
                address: ADDRESS.to_string(),
                name: NAME.to_string(),
                rssi: Some(-50),
            }),
            characteristics: vec![CharacteristicRef {
                uuid: WRITE_CHARACTERISTIC_UUIDS[0],
                service_uuid: Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb),
            }],
            connect_delay: Duration::ZERO,
            discovery_fails: false,
        }
    }

    /// Discovery knows nothing about the device
    pub fn undiscovered(mut self) -> Self {
        self.device = None;
        self
    }

    /// The device exposes no usable write characteristic
    pub fn without_write_characteristic(mut self) -> Self {
        self.characteristics.clear();
        self
    }

    /// Discovery errors out instead of answering
    pub fn failing_discovery(mut self) -> Self {
        self.discovery_fails = true;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn fail_writes(&self, failures: impl IntoIterator<Item = Failure>) {
        self.state.write_failures.lock().extend(failures);
    }

    /// The next disconnect reports an error, as BlueZ does for an already closed link
    pub fn fail_disconnect(&self) {
        self.state.disconnect_fails.store(true, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.written.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn write_attempts(&self) -> usize {
        self.state.write_attempts.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Drops the live link as if the device went out of range
    pub fn drop_link(&self) {
        if let Some((connected, on_disconnect)) = self.state.live.lock().take() {
            connected.store(false, Ordering::SeqCst);
            on_disconnect();
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn resolve_device(&self, _address: &str) -> Result<Option<DeviceRef>> {
        if self.discovery_fails {
            return Err(Error::BleError("scan failed".to_string()));
        }
        Ok(self.device.clone())
    }

    async fn connect(
        &self,
        _device: &DeviceRef,
        on_disconnect: DisconnectCallback,
        cached_services: Option<&ServiceCache>,
    ) -> Result<Box<dyn Link>> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state
            .cached_on_connect
            .lock()
            .push(cached_services.is_some());

        let connected = Arc::new(AtomicBool::new(true));
        *self.state.live.lock() = Some((Arc::clone(&connected), on_disconnect.clone()));
        Ok(Box::new(MockLink {
            state: Arc::clone(&self.state),
            connected,
            on_disconnect,
            characteristics: self.characteristics.clone(),
        }))
    }
}

struct MockLink {
    state: Arc<MockState>,
    connected: Arc<AtomicBool>,
    on_disconnect: DisconnectCallback,
    characteristics: ServiceCache,
}

#[async_trait]
impl Link for MockLink {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn characteristics(&self) -> ServiceCache {
        self.characteristics.clone()
    }

    async fn write(
        &self,
        _characteristic: &CharacteristicRef,
        data: &[u8],
        _with_response: bool,
    ) -> Result<()> {
        self.state.write_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.state.write_failures.lock().pop_front() {
            return Err(failure.into_error());
        }
        self.state.written.lock().push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.state.disconnect_fails.swap(false, Ordering::SeqCst) {
            return Err(Error::BleError("not connected".to_string()));
        }
        self.connected.store(false, Ordering::SeqCst);
        self.state.live.lock().take();
        (self.on_disconnect)();
        Ok(())
    }
}
