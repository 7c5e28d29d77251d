/*!
 # Device scanner

 Lists nearby BLE devices with their addresses, to find the address a strip
 should be bound to. Not part of the control path.
*/

use btleplug::api::{Central, Peripheral as _, ScanFilter};
use btleplug::platform::Adapter;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, instrument};

use crate::transport::while_scanning;
use crate::{Error, Result};

/// Advertised name prefix of supported strips, compared case-insensitively
pub const LEDDMX_NAME_PREFIX: &str = "leddmx-";

/// Label for devices that advertise no name
pub const UNKNOWN_NAME: &str = "(unknown)";

/// Whether an advertised name belongs to a supported strip
pub fn is_supported_name(name: &str) -> bool {
    name.to_lowercase().starts_with(LEDDMX_NAME_PREFIX)
}

/// A device seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
}

impl ScannedDevice {
    pub fn is_supported(&self) -> bool {
        is_supported_name(&self.name)
    }
}

/// Keeps devices whose name starts with `prefix` and sorts them by name
pub fn filter_and_sort(devices: Vec<ScannedDevice>, prefix: Option<&str>) -> Vec<ScannedDevice> {
    let mut found: Vec<_> = devices
        .into_iter()
        .filter(|d| prefix.map_or(true, |p| d.name.starts_with(p)))
        .collect();
    found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.address.cmp(&b.address)));
    found
}

/// Scans for `timeout` and returns what was seen
#[instrument(skip(adapter))]
pub async fn scan(
    adapter: &Adapter,
    timeout: Duration,
    prefix: Option<&str>,
) -> Result<Vec<ScannedDevice>> {
    info!("Scanning for BLE devices (timeout: {:?})...", timeout);
    let devices = while_scanning(
        async { adapter.start_scan(ScanFilter::default()).await.map_err(Error::from) },
        async {
            time::sleep(timeout).await;
            collect(adapter).await
        },
        async { adapter.stop_scan().await.map_err(Error::from) },
    )
    .await?;

    Ok(filter_and_sort(devices, prefix))
}

async fn collect(adapter: &Adapter) -> Result<Vec<ScannedDevice>> {
    let mut devices = Vec::new();
    for p in adapter.peripherals().await? {
        let props = p.properties().await?.unwrap_or_default();
        let device = ScannedDevice {
            name: props.local_name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            address: p.address().to_string(),
            rssi: props.rssi,
        };
        debug!("Found device: {} {}", device.address, device.name);
        devices.push(device);
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, address: &str) -> ScannedDevice {
        ScannedDevice {
            name: name.to_string(),
            address: address.to_string(),
            rssi: None,
        }
    }

    #[test]
    fn supported_names_ignore_case() {
        assert!(is_supported_name("LEDDMX-03-2E0E"));
        assert!(is_supported_name("leddmx-00-0001"));
        assert!(!is_supported_name("ELK-BLEDOM"));
        assert!(!is_supported_name("LEDDMX"));
    }

    #[test]
    fn filters_by_prefix_and_sorts() {
        let devices = vec![
            device("LEDDMX-03-DD2B", "AA:00:00:00:00:02"),
            device("ELK-BLEDOM", "AA:00:00:00:00:03"),
            device("LEDDMX-03-2E0E", "AA:00:00:00:00:01"),
        ];

        let found = filter_and_sort(devices.clone(), Some("LEDDMX"));
        let names: Vec<_> = found.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["LEDDMX-03-2E0E", "LEDDMX-03-DD2B"]);

        assert_eq!(filter_and_sort(devices, None).len(), 3);
    }

    #[test]
    fn unnamed_devices_sort_with_their_label() {
        let found = filter_and_sort(
            vec![device("Zeta", "1"), device(UNKNOWN_NAME, "2")],
            None,
        );
        assert_eq!(found[0].name, UNKNOWN_NAME);
        assert!(!found[0].is_supported());
    }
}
