/*!
 # LEDDMX Bluetooth LED Strip Controller Library

 A Rust library for controlling LEDDMX RGB/DMX light strips over Bluetooth LE.
 Every command is a fixed 9-byte buffer written to a single GATT characteristic.

 ## Features

 * Power on/off control
 * RGB color control with brightness scaling
 * Device-side effect presets
 * Lazy connection with an optional idle disconnect
 * Retries for transient BLE errors

 ## Example

 ```no_run
 use leddmx_controller::*;
 use std::sync::Arc;
 use std::time::Duration;

 #[tokio::main]
 async fn main() -> Result<()> {
     tracing_subscriber::fmt::init();

     let transport = Arc::new(BtleplugTransport::new().await?);
     let config = SessionConfig::new("AA:BB:CC:DD:EE:FF").with_idle_delay(Duration::from_secs(60));
     let device = DeviceSession::new(config, transport).await?;

     device.turn_on().await?;
     device.set_color((255, 0, 0), Some(128)).await?; // Red, half brightness
     device.set_effect("AUTO").await?;

     device.stop().await;
     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the LEDDMX controller library
#[derive(Error, Debug)]
pub enum Error {
    /// No Bluetooth adapters found
    #[error("No Bluetooth adapters found")]
    NoBluetoothAdapters,

    /// The device is not reachable at all; retrying will not help
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The adapter or stack is busy and asks the caller to back off
    #[error("Bluetooth stack busy: {0}")]
    Busy(String),

    /// Failed to find required BLE characteristic
    #[error("Could not find required BLE characteristic: {0}")]
    CharacteristicNotFound(String),

    /// BLE communication error
    #[error("BLE communication error: {0}")]
    BleError(String),

    /// The link was used after it had been closed
    #[error("Not connected to device")]
    NotConnected,

    /// Invalid user-supplied configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<btleplug::Error> for Error {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::DeviceNotFound => Error::DeviceNotFound(err.to_string()),
            btleplug::Error::NotConnected => Error::NotConnected,
            // BlueZ reports "in progress" and "not ready" states as D-Bus errors
            btleplug::Error::Other(inner) if inner.to_string().contains("org.bluez.Error") => {
                Error::Busy(inner.to_string())
            }
            other => Error::BleError(other.to_string()),
        }
    }
}

// Import needed for Result type extension
pub type Result<T> = std::result::Result<T, Error>;

pub mod command;
pub mod device;
pub mod effects;
pub mod light;
pub mod retry;
pub mod scanner;
pub mod transport;

// Re-export key types
pub use command::Command;
pub use device::{ColorMode, DeviceSession, LightState, SessionConfig};
pub use effects::{effect_code, effect_list, EFFECTS, EFFECT_AUTO, EFFECT_NONE};
pub use light::TurnOnRequest;
pub use retry::{RetryClass, RetryPolicy};
pub use transport::{BtleplugTransport, DeviceRef, Link, Transport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bluez_dbus_failures_map_to_busy() {
        let inner: Box<dyn std::error::Error + Send + Sync> =
            "org.bluez.Error.InProgress: Operation already in progress".into();
        let err = Error::from(btleplug::Error::Other(inner));
        assert!(matches!(err, Error::Busy(_)));
    }

    #[test]
    fn missing_device_maps_to_device_not_found() {
        let err = Error::from(btleplug::Error::DeviceNotFound);
        assert!(matches!(err, Error::DeviceNotFound(_)));
    }

    #[test]
    fn other_btleplug_errors_are_plain_ble_errors() {
        let err = Error::from(btleplug::Error::TimedOut(std::time::Duration::from_secs(1)));
        assert!(matches!(err, Error::BleError(_)));
    }
}
