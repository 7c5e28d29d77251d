use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, instrument, trace};

use super::{CharacteristicRef, DeviceRef, DisconnectCallback, Link, ServiceCache, Transport};
use crate::{Error, Result};

/// Maximum time to wait for a device to show up while scanning
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Awaits `body` between `start` and `stop`, running `stop` even if `body` fails
///
/// An error from `body` wins over one from `stop`.
pub(crate) async fn while_scanning<T>(
    start: impl Future<Output = Result<()>>,
    body: impl Future<Output = Result<T>>,
    stop: impl Future<Output = Result<()>>,
) -> Result<T> {
    start.await?;
    let found = body.await;
    let stopped = stop.await;
    let found = found?;
    stopped?;
    Ok(found)
}

/// Gets the default Bluetooth adapter
#[instrument(skip(manager))]
async fn get_central(manager: &Manager) -> Result<Adapter> {
    debug!("Getting default Bluetooth adapter");
    let adapter = manager.adapters().await?.into_iter().next().ok_or_else(|| {
        error!("No Bluetooth adapters found");
        Error::NoBluetoothAdapters
    })?;
    debug!("Using Bluetooth adapter");
    Ok(adapter)
}

fn matches_address(peripheral: &Peripheral, addr: &str) -> bool {
    peripheral.address().to_string().eq_ignore_ascii_case(addr)
        || peripheral.id().to_string().eq_ignore_ascii_case(addr)
}

/// [`Transport`] backed by the platform Bluetooth stack through btleplug
pub struct BtleplugTransport {
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BtleplugTransport {
    /// Opens the first Bluetooth adapter
    #[instrument]
    pub async fn new() -> Result<Self> {
        info!("Initializing BLE transport");
        let manager = Manager::new().await?;
        let adapter = get_central(&manager).await?;
        Ok(Self {
            adapter,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        })
    }

    /// Overrides how long a lookup may scan before giving up
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    /// The adapter in use
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn known_peripheral(&self, addr: &str) -> Result<Option<Peripheral>> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals.into_iter().find(|p| matches_address(p, addr)))
    }

    /// Finds a peripheral by MAC address or platform id, scanning if it is not known yet
    #[instrument(skip(self))]
    async fn find_peripheral(&self, addr: &str) -> Result<Option<Peripheral>> {
        if let Some(peripheral) = self.known_peripheral(addr).await? {
            trace!("Peripheral already known to the adapter");
            return Ok(Some(peripheral));
        }

        info!("Scanning for {}...", addr);
        let found = while_scanning(
            async { self.adapter.start_scan(ScanFilter::default()).await.map_err(Error::from) },
            self.poll_for(addr),
            async { self.adapter.stop_scan().await.map_err(Error::from) },
        )
        .await?;

        if found.is_none() {
            debug!(
                "Device {} not seen within {} seconds",
                addr,
                self.scan_timeout.as_secs()
            );
        }
        Ok(found)
    }

    /// Polls the adapter until `addr` shows up or the scan timeout passes
    async fn poll_for(&self, addr: &str) -> Result<Option<Peripheral>> {
        let start_time = std::time::Instant::now();
        let mut found = None;

        // Poll for devices until we find the one we want or time out
        while start_time.elapsed() < self.scan_timeout {
            if let Some(peripheral) = self.known_peripheral(addr).await? {
                found = Some(peripheral);
                break;
            }

            let remaining = self.scan_timeout.saturating_sub(start_time.elapsed());
            debug!(
                "Still scanning for a device... ({} seconds remaining)",
                remaining.as_secs()
            );
            time::sleep(Duration::from_millis(500)).await;
        }
        Ok(found)
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn resolve_device(&self, address: &str) -> Result<Option<DeviceRef>> {
        let Some(peripheral) = self.find_peripheral(address).await? else {
            return Ok(None);
        };
        let props = peripheral.properties().await?.unwrap_or_default();
        Ok(Some(DeviceRef {
            address: address.to_string(),
            name: props.local_name.unwrap_or_default(),
            rssi: props.rssi,
        }))
    }

    #[instrument(skip(self, on_disconnect, cached_services), fields(address = %device.address))]
    async fn connect(
        &self,
        device: &DeviceRef,
        on_disconnect: DisconnectCallback,
        cached_services: Option<&ServiceCache>,
    ) -> Result<Box<dyn Link>> {
        let peripheral = self
            .find_peripheral(&device.address)
            .await?
            .ok_or_else(|| Error::DeviceNotFound(device.address.clone()))?;

        debug!("Connecting to device...");
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }

        if cached_services.is_some() && !peripheral.characteristics().is_empty() {
            debug!("Reusing cached services");
        } else {
            debug!("Discovering services...");
            peripheral.discover_services().await?;
        }

        let mut events = self.adapter.events().await?;
        let id = peripheral.id();
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        on_disconnect();
                        break;
                    }
                }
            }
        });

        Ok(Box::new(BtleplugLink {
            peripheral,
            watcher,
        }))
    }
}

/// A connected btleplug peripheral
pub struct BtleplugLink {
    peripheral: Peripheral,
    watcher: JoinHandle<()>,
}

#[async_trait]
impl Link for BtleplugLink {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    fn characteristics(&self) -> ServiceCache {
        self.peripheral
            .characteristics()
            .into_iter()
            .map(|c| CharacteristicRef {
                uuid: c.uuid,
                service_uuid: c.service_uuid,
            })
            .collect()
    }

    async fn write(
        &self,
        characteristic: &CharacteristicRef,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic.uuid)
            .ok_or_else(|| Error::CharacteristicNotFound(characteristic.uuid.to_string()))?;

        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral.write(&target, data, write_type).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn scan_is_stopped_when_the_body_fails() {
        let stopped = AtomicBool::new(false);

        let out: Result<()> = while_scanning(
            async { Ok(()) },
            async { Err(Error::BleError("peripherals unavailable".to_string())) },
            async {
                stopped.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert!(matches!(out, Err(Error::BleError(_))));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_failure_is_reported_after_a_good_body() {
        let out = while_scanning(
            async { Ok(()) },
            async { Ok(7) },
            async { Err(Error::Busy("org.bluez.Error.Failed".to_string())) },
        )
        .await;

        assert!(matches!(out, Err(Error::Busy(_))));
    }

    #[tokio::test]
    async fn failed_start_skips_body_and_stop() {
        let ran = AtomicBool::new(false);

        let out: Result<()> = while_scanning(
            async { Err(Error::NotConnected) },
            async {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            },
            async {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert!(matches!(out, Err(Error::NotConnected)));
        assert!(!ran.load(Ordering::SeqCst));
    }
}
