/*!
 # BLE transport seam

 The session talks to the radio only through [`Transport`] and [`Link`].
 [`BtleplugTransport`] is the real implementation; tests use an in-memory one.
*/

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::Result;

mod ble;
#[cfg(test)]
pub(crate) mod mock;

pub(crate) use ble::while_scanning;
pub use ble::{BtleplugLink, BtleplugTransport};

/// Called by the transport when the link drops
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Characteristics discovered on an earlier connection
pub type ServiceCache = Vec<CharacteristicRef>;

/// A device the transport can connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRef {
    /// MAC address (or platform identifier where MACs are hidden)
    pub address: String,
    /// Advertised local name
    pub name: String,
    /// Signal strength of the last advertisement, if seen
    pub rssi: Option<i16>,
}

impl DeviceRef {
    /// A reference built from configuration alone, without a discovery hit
    pub fn bare(address: &str, name: &str) -> Self {
        Self {
            address: address.to_string(),
            name: name.to_string(),
            rssi: None,
        }
    }
}

/// A GATT characteristic on a connected device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
}

/// Device discovery and connection establishment
#[async_trait]
pub trait Transport: Send + Sync {
    /// Looks up a device by address in whatever the transport has discovered
    async fn resolve_device(&self, address: &str) -> Result<Option<DeviceRef>>;

    /// Opens a link to `device`
    ///
    /// `on_disconnect` fires when the link drops for any reason. When
    /// `cached_services` is given the transport may skip service discovery.
    async fn connect(
        &self,
        device: &DeviceRef,
        on_disconnect: DisconnectCallback,
        cached_services: Option<&ServiceCache>,
    ) -> Result<Box<dyn Link>>;
}

/// An open connection to one device
#[async_trait]
pub trait Link: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Characteristics discovered on this link
    fn characteristics(&self) -> ServiceCache;

    async fn write(
        &self,
        characteristic: &CharacteristicRef,
        data: &[u8],
        with_response: bool,
    ) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}
