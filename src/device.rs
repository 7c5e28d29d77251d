use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::command::{to_hex, Command, DEFAULT_RGB};
use crate::effects::{effect_code, effect_list, EFFECT_NONE};
use crate::retry::{retry, RetryPolicy};
use crate::transport::{
    CharacteristicRef, DeviceRef, DisconnectCallback, Link, ServiceCache, Transport,
};
use crate::{Error, Result};

/// Candidate write characteristics, in order of preference
pub const WRITE_CHARACTERISTIC_UUIDS: [Uuid; 1] =
    [Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb)];

/// Name used when discovery has never seen the device
pub const DEFAULT_NAME: &str = "LEDDMX";

/// Color modes the strip supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    #[default]
    Rgb,
}

/// Last commanded state of the strip
///
/// The device has no read-back, so this is what was sent, not what was confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightState {
    /// Power state, unknown until the first power command
    pub is_on: Option<bool>,
    /// Brightness (0-255)
    pub brightness: u8,
    /// Current RGB color, if one was ever set
    pub rgb: Option<(u8, u8, u8)>,
    /// Active effect name
    pub effect: Option<String>,
    /// Always RGB for these strips
    pub color_mode: ColorMode,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            is_on: None,
            brightness: 255,
            rgb: None,
            effect: None,
            color_mode: ColorMode::Rgb,
        }
    }
}

/// Settings for one bound device
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// MAC address of the strip
    pub address: String,
    /// Name to use if discovery cannot resolve the device
    pub name: Option<String>,
    /// Reset flag carried for the host, not interpreted by the session
    pub reset: bool,
    /// Idle time before the link is dropped, zero keeps it open
    pub idle_delay: Duration,
    /// Retry policy applied to every light command
    pub retry: RetryPolicy,
}

impl SessionConfig {
    /// Default settings for the strip at `address`
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            reset: false,
            idle_delay: Duration::ZERO,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the fallback name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the reset flag
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Sets the idle disconnect delay
    pub fn with_idle_delay(mut self, idle_delay: Duration) -> Self {
        self.idle_delay = idle_delay;
        self
    }

    /// Replaces the default retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A live link plus the characteristic commands go to
struct ConnectionHandle {
    link: Arc<dyn Link>,
    write_characteristic: Option<CharacteristicRef>,
}

struct PendingDisconnect {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    config: SessionConfig,
    device: DeviceRef,
    transport: Arc<dyn Transport>,
    /// Guards both connecting and tearing down
    connect_lock: tokio::sync::Mutex<()>,
    connection: RwLock<Option<Arc<ConnectionHandle>>>,
    cached_services: Mutex<Option<ServiceCache>>,
    expected_disconnect: Arc<AtomicBool>,
    unexpected_disconnects: Arc<AtomicUsize>,
    disconnect_timer: Mutex<Option<PendingDisconnect>>,
    timer_generation: AtomicU64,
    state: Mutex<LightState>,
}

/// Picks the first candidate UUID the device exposes
fn resolve_write_characteristic(services: &ServiceCache) -> Option<CharacteristicRef> {
    WRITE_CHARACTERISTIC_UUIDS
        .iter()
        .find_map(|uuid| services.iter().find(|c| c.uuid == *uuid).cloned())
}

impl Inner {
    /// Returns the current handle if its link is still up
    async fn live_connection(&self) -> Option<Arc<ConnectionHandle>> {
        let handle = self.connection.read().clone()?;
        if handle.link.is_connected().await {
            Some(handle)
        } else {
            None
        }
    }

    async fn ensure_connected(self: &Arc<Self>) -> Result<Arc<ConnectionHandle>> {
        if let Some(handle) = self.live_connection().await {
            self.reset_disconnect_timer();
            return Ok(handle);
        }

        let _guard = self.connect_lock.lock().await;
        // Someone else may have connected while we waited
        if let Some(handle) = self.live_connection().await {
            self.reset_disconnect_timer();
            return Ok(handle);
        }

        debug!("{}: Connecting", self.device.name);
        let cached = self.cached_services.lock().clone();
        let link: Arc<dyn Link> = Arc::from(
            self.transport
                .connect(&self.device, self.disconnect_callback(), cached.as_ref())
                .await?,
        );
        debug!("{}: Connected", self.device.name);

        let services = link.characteristics();
        let write_characteristic = resolve_write_characteristic(&services);
        match &write_characteristic {
            Some(c) => debug!("Found write characteristic: {}", c.uuid),
            None => warn!(
                "{}: None of the known write characteristics were found",
                self.device.name
            ),
        }
        *self.cached_services.lock() = write_characteristic.is_some().then_some(services);

        let handle = Arc::new(ConnectionHandle {
            link,
            write_characteristic,
        });
        *self.connection.write() = Some(Arc::clone(&handle));
        self.reset_disconnect_timer();
        Ok(handle)
    }

    fn disconnect_callback(&self) -> DisconnectCallback {
        let expected = Arc::clone(&self.expected_disconnect);
        let unexpected = Arc::clone(&self.unexpected_disconnects);
        let name = self.device.name.clone();
        Arc::new(move || {
            if expected.load(Ordering::SeqCst) {
                debug!("{}: Disconnected from device", name);
                return;
            }
            unexpected.fetch_add(1, Ordering::SeqCst);
            debug!(
                "{}: Device unexpectedly disconnected, will reconnect on next use",
                name
            );
        })
    }

    /// Cancels any pending idle disconnect and schedules a fresh one
    fn reset_disconnect_timer(self: &Arc<Self>) {
        let mut timer = self.disconnect_timer.lock();
        if let Some(pending) = timer.take() {
            pending.handle.abort();
        }
        self.expected_disconnect.store(false, Ordering::SeqCst);

        let delay = self.config.idle_delay;
        if delay.is_zero() {
            return;
        }
        debug!(
            "{}: Configured disconnect from device in {:?}",
            self.device.name, delay
        );

        let generation = self.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = session.upgrade() else {
                return;
            };
            if !inner.claim_timer(generation) {
                return;
            }
            debug!(
                "{}: Disconnecting after timeout of {:?}",
                inner.device.name, delay
            );
            inner.execute_disconnect().await;
        });
        *timer = Some(PendingDisconnect { generation, handle });
    }

    /// Clears the timer slot if it still belongs to `generation`
    fn claim_timer(&self, generation: u64) -> bool {
        let mut timer = self.disconnect_timer.lock();
        match timer.as_ref() {
            Some(pending) if pending.generation == generation => {
                *timer = None;
                true
            }
            _ => false,
        }
    }

    fn cancel_timer(&self) {
        if let Some(pending) = self.disconnect_timer.lock().take() {
            pending.handle.abort();
        }
    }

    async fn execute_disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        self.expected_disconnect.store(true, Ordering::SeqCst);
        let handle = self.connection.write().take();
        if let Some(handle) = handle {
            if handle.link.is_connected().await {
                if let Err(err) = handle.link.disconnect().await {
                    debug!(
                        "{}: Bluetooth reported error during disconnect (connection already closed): {}",
                        self.device.name, err
                    );
                }
            }
        }
        debug!("{}: Disconnected", self.device.name);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(pending) = self.disconnect_timer.get_mut().take() {
            pending.handle.abort();
        }
    }
}

/// Connection and state for one LEDDMX strip
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<Inner>,
}

impl DeviceSession {
    /// Binds a session to the configured address
    ///
    /// Nothing is connected yet; the first command connects lazily.
    #[instrument(skip(transport))]
    pub async fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        if config.address.trim().is_empty() {
            return Err(Error::Config("device address is empty".to_string()));
        }

        let fallback_name = config.name.as_deref().unwrap_or(DEFAULT_NAME);
        let resolved = match transport.resolve_device(&config.address).await {
            Ok(resolved) => resolved,
            Err(e @ Error::NoBluetoothAdapters) => return Err(e),
            Err(e) => {
                warn!("Discovery of {} failed: {}", config.address, e);
                None
            }
        };
        let device = match resolved {
            Some(device) if device.name.is_empty() => DeviceRef {
                name: fallback_name.to_string(),
                ..device
            },
            Some(device) => device,
            None => {
                debug!(
                    "{} not found by discovery, using a bare device reference",
                    config.address
                );
                DeviceRef::bare(&config.address, fallback_name)
            }
        };
        debug!("Bound device {} at {}", device.name, device.address);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                device,
                transport,
                connect_lock: tokio::sync::Mutex::new(()),
                connection: RwLock::new(None),
                cached_services: Mutex::new(None),
                expected_disconnect: Arc::new(AtomicBool::new(false)),
                unexpected_disconnects: Arc::new(AtomicUsize::new(0)),
                disconnect_timer: Mutex::new(None),
                timer_generation: AtomicU64::new(0),
                state: Mutex::new(LightState::default()),
            }),
        })
    }

    /// MAC address of the bound device
    pub fn mac(&self) -> &str {
        &self.inner.device.address
    }

    /// Discovered name, or the fallback name
    pub fn name(&self) -> &str {
        &self.inner.device.name
    }

    /// Reset flag from the configuration
    pub fn reset(&self) -> bool {
        self.inner.config.reset
    }

    /// Signal strength seen at discovery, if any
    pub fn rssi(&self) -> Option<i16> {
        self.inner.device.rssi
    }

    /// Selectable effect names, "None" first
    pub fn effect_list(&self) -> Vec<&'static str> {
        effect_list()
    }

    /// Snapshot of the last commanded state
    pub fn state(&self) -> LightState {
        self.inner.state.lock().clone()
    }

    /// Whether a live link is currently held
    pub async fn is_connected(&self) -> bool {
        self.inner.live_connection().await.is_some()
    }

    /// Whether an idle disconnect is currently scheduled
    pub fn has_pending_disconnect(&self) -> bool {
        self.inner.disconnect_timer.lock().is_some()
    }

    /// Number of link losses not caused by [`stop`](Self::stop) or the idle timer
    pub fn unexpected_disconnects(&self) -> usize {
        self.inner.unexpected_disconnects.load(Ordering::SeqCst)
    }

    /// Turns the LED strip on
    #[instrument(skip(self), fields(device = %self.name()))]
    pub async fn turn_on(&self) -> Result<()> {
        retry(self.inner.config.retry, "turn_on", || self.send(Command::PowerOn)).await?;
        self.inner.state.lock().is_on = Some(true);
        info!("LED strip powered on");
        Ok(())
    }

    /// Turns the LED strip off
    #[instrument(skip(self), fields(device = %self.name()))]
    pub async fn turn_off(&self) -> Result<()> {
        retry(self.inner.config.retry, "turn_off", || self.send(Command::PowerOff)).await?;
        self.inner.state.lock().is_on = Some(false);
        info!("LED strip powered off");
        Ok(())
    }

    /// Sets the RGB color, scaled by `brightness` or the stored brightness
    ///
    /// The brightness argument only shapes this command; it is not stored.
    #[instrument(skip(self), fields(device = %self.name()))]
    pub async fn set_color(&self, rgb: (u8, u8, u8), brightness: Option<u8>) -> Result<()> {
        let brightness = brightness.unwrap_or_else(|| self.inner.state.lock().brightness);
        let command = Command::Color { rgb, brightness };
        info!("RGB packet: {}", to_hex(&command.encode()));

        retry(self.inner.config.retry, "set_color", || self.send(command)).await?;
        self.inner.state.lock().rgb = Some(rgb);
        Ok(())
    }

    /// Stores a new brightness (0-255) and resends the color with it
    #[instrument(skip(self), fields(device = %self.name()))]
    pub async fn set_brightness_local(&self, value: u8) -> Result<()> {
        let rgb = {
            let mut state = self.inner.state.lock();
            state.brightness = value;
            state.rgb
        };
        self.set_color(rgb.unwrap_or(DEFAULT_RGB), Some(value)).await
    }

    /// Selects an effect by name
    ///
    /// [`EFFECT_NONE`] leaves effect mode and restores the last color.
    /// Unknown names are logged and ignored.
    #[instrument(skip(self), fields(device = %self.name()))]
    pub async fn set_effect(&self, name: &str) -> Result<()> {
        if name == EFFECT_NONE {
            let (last_rgb, brightness) = {
                let state = self.inner.state.lock();
                (state.rgb, state.brightness)
            };
            let command = Command::EffectNone {
                last_rgb,
                brightness,
            };
            retry(self.inner.config.retry, "set_effect", || self.send(command)).await?;

            let mut state = self.inner.state.lock();
            state.effect = None;
            state.rgb = Some(last_rgb.unwrap_or(DEFAULT_RGB));
            info!("Effect cleared");
            return Ok(());
        }

        let Some(code) = effect_code(name) else {
            error!("Effect {} not supported", name);
            return Ok(());
        };
        debug!("Effect {} has code {:#04x}", name, code);

        retry(self.inner.config.retry, "set_effect", || {
            self.send(Command::Effect(code))
        })
        .await?;
        self.inner.state.lock().effect = Some(name.to_string());
        info!("Effect set to {}", name);
        Ok(())
    }

    /// The device has no readable state; kept for callers that poll
    #[instrument(skip(self), fields(device = %self.name()))]
    pub async fn update(&self) -> Result<()> {
        retry(self.inner.config.retry, "update", || async {
            debug!("{}: Update called, nothing to read", self.name());
            Ok::<(), Error>(())
        })
        .await
    }

    /// Disconnects and forgets the link; safe to call when not connected
    #[instrument(skip(self), fields(device = %self.name()))]
    pub async fn stop(&self) {
        debug!("{}: Stop", self.name());
        self.inner.cancel_timer();
        self.inner.execute_disconnect().await;
        // An operation that was already past the connect guard may have re-armed it
        self.inner.cancel_timer();
    }

    /// Records a brightness without sending anything
    pub(crate) fn store_brightness(&self, value: u8) {
        self.inner.state.lock().brightness = value;
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.write(&command.encode()).await
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let handle = self.inner.ensure_connected().await?;
        let characteristic = handle.write_characteristic.as_ref().ok_or_else(|| {
            Error::CharacteristicNotFound(WRITE_CHARACTERISTIC_UUIDS[0].to_string())
        })?;
        debug!("{}: Writing data: {}", self.name(), to_hex(data));
        handle.link.write(characteristic, data, false).await
    }
}
