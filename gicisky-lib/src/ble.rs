//! btleplug-backed [`Connector`] and [`Transport`].

use crate::advertisement::Advertisement;
use crate::config::{TransferConfig, WriteMode};
use crate::constants::{MANUFACTURER_ID, SERVICE_CHARACTERISTIC_COUNT, SERVICE_UUID};
use crate::error::GiciskyError;
use crate::transport::{
    Channel, Connector, FragmentPolicy, NotificationSlot, Transport, close_link, request_fragmented,
};
use btleplug::api::{
    BDAddr, Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures_lite::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

pub use btleplug::api::BDAddr as Address;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// First Bluetooth adapter of the host
pub async fn default_adapter() -> Result<Adapter, GiciskyError> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(GiciskyError::NoAdapter)
}

/// A tag seen while scanning
#[derive(Debug, Clone)]
pub struct DiscoveredTag {
    pub address: BDAddr,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Manufacturer data under the Gicisky company id
    pub payload: Vec<u8>,
}

impl DiscoveredTag {
    pub fn advertisement(&self) -> Result<Advertisement, GiciskyError> {
        Advertisement::parse(&self.payload)
    }
}

/// Scan for `duration` and return every peripheral carrying Gicisky manufacturer data
pub async fn scan(adapter: &Adapter, duration: Duration) -> Result<Vec<DiscoveredTag>, GiciskyError> {
    info!("Scanning for display tags for {:?}", duration);
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;
    adapter.stop_scan().await?;

    let mut tags = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let Some(properties) = peripheral.properties().await? else {
            continue;
        };
        let Some(payload) = properties.manufacturer_data.get(&MANUFACTURER_ID) else {
            continue;
        };
        debug!(
            address = %peripheral.address(),
            payload = hex::encode(payload),
            "Found display tag"
        );
        tags.push(DiscoveredTag {
            address: peripheral.address(),
            name: properties.local_name.clone(),
            rssi: properties.rssi,
            payload: payload.clone(),
        });
    }

    info!("Scan complete: found {} display tags", tags.len());
    Ok(tags)
}

/// Connects to one tag by address, opening a fresh [`BleTransport`] per attempt
pub struct BleConnector {
    address: BDAddr,
    config: TransferConfig,
    adapter: Option<Adapter>,
}

impl BleConnector {
    pub fn new(address: BDAddr, config: TransferConfig) -> Self {
        Self {
            address,
            config,
            adapter: None,
        }
    }

    /// Use an already opened adapter instead of the host's first one
    pub fn with_adapter(mut self, adapter: Adapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    async fn adapter(&mut self) -> Result<Adapter, GiciskyError> {
        match &self.adapter {
            Some(adapter) => Ok(adapter.clone()),
            None => {
                let adapter = default_adapter().await?;
                self.adapter = Some(adapter.clone());
                Ok(adapter)
            }
        }
    }

    async fn find_peripheral(&self, adapter: &Adapter) -> Result<Peripheral, GiciskyError> {
        adapter
            .start_scan(ScanFilter {
                services: vec![SERVICE_UUID],
            })
            .await?;

        let address = self.address;
        let found = tokio::time::timeout(self.config.scan_timeout(), async {
            loop {
                let peripherals = adapter.peripherals().await?;
                if let Some(peripheral) = peripherals.into_iter().find(|p| p.address() == address) {
                    return Ok::<_, GiciskyError>(peripheral);
                }
                tokio::time::sleep(SCAN_POLL_INTERVAL).await;
            }
        })
        .await;

        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        match found {
            Ok(result) => result,
            Err(_) => Err(GiciskyError::DeviceNotFound(address.to_string())),
        }
    }

    async fn connect_peripheral(&self, peripheral: &Peripheral) -> Result<(), GiciskyError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match peripheral.connect().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!("Connect attempt {}/{} to {} failed: {}", attempt, attempts, self.address, e);
                    tokio::time::sleep(self.config.retry_policy().backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Connector for BleConnector {
    type Transport = BleTransport;

    async fn connect(&mut self) -> Result<BleTransport, GiciskyError> {
        let adapter = self.adapter().await?;
        let peripheral = self.find_peripheral(&adapter).await?;

        if !peripheral.is_connected().await? {
            self.connect_peripheral(&peripheral).await?;
        }
        info!("Connected to {}", self.address);

        BleTransport::open(peripheral, &self.config).await
    }
}

/// Pick the command and image characteristics out of a discovered GATT table.
///
/// The display service must expose exactly three characteristics. Sorted by UUID they
/// are command (write + notify), image data, and an unused one.
pub fn select_characteristics(
    discovered: impl IntoIterator<Item = Characteristic>,
) -> Result<(Characteristic, Characteristic), GiciskyError> {
    let mut characteristics: Vec<Characteristic> = discovered
        .into_iter()
        .filter(|c| c.service_uuid == SERVICE_UUID)
        .collect();
    if characteristics.len() != SERVICE_CHARACTERISTIC_COUNT {
        return Err(GiciskyError::MissingService {
            found: characteristics.len(),
        });
    }
    characteristics.sort_by_key(|c| c.uuid);

    let mut roles = characteristics.into_iter();
    let (Some(command), Some(image)) = (roles.next(), roles.next()) else {
        return Err(GiciskyError::MissingService { found: 0 });
    };

    if !command.properties.contains(CharPropFlags::NOTIFY) {
        return Err(GiciskyError::MissingCharacteristic(format!(
            "{} does not support notifications",
            command.uuid
        )));
    }
    Ok((command, image))
}

/// An open GATT session with one tag
pub struct BleTransport {
    peripheral: Peripheral,
    command: Characteristic,
    image: Characteristic,
    slot: NotificationSlot,
    pump: Option<JoinHandle<()>>,
    fragments: FragmentPolicy,
    timeout: Duration,
    write_mode: WriteMode,
    closed: bool,
}

impl BleTransport {
    /// Discover the display service and subscribe to command notifications.
    ///
    /// On failure the peripheral is disconnected before the error is returned.
    pub async fn open(peripheral: Peripheral, config: &TransferConfig) -> Result<Self, GiciskyError> {
        match Self::setup(&peripheral, config).await {
            Ok(transport) => Ok(transport),
            Err(e) => {
                warn!("Setup of {} failed: {}", peripheral.address(), e);
                if let Err(disconnect_err) = peripheral.disconnect().await {
                    warn!("Failed to disconnect: {}", disconnect_err);
                }
                Err(e)
            }
        }
    }

    async fn setup(peripheral: &Peripheral, config: &TransferConfig) -> Result<Self, GiciskyError> {
        peripheral.discover_services().await?;

        let (command, image) = select_characteristics(peripheral.characteristics())?;
        debug!(command = %command.uuid, image = %image.uuid, "Display service characteristics");

        peripheral.subscribe(&command).await?;
        let mut notifications = peripheral.notifications().await?;

        let slot = NotificationSlot::new();
        let sink = slot.clone();
        let uuid = command.uuid;
        let pump = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                trace!(bytes = hex::encode(&notification.value), "Notification");
                sink.put(Bytes::from(notification.value));
            }
            debug!("Notification stream ended");
        });

        tokio::time::sleep(config.notify_settle()).await;

        Ok(Self {
            peripheral: peripheral.clone(),
            command,
            image,
            slot,
            pump: Some(pump),
            fragments: config.fragment_policy(),
            timeout: config.response_timeout(),
            write_mode: config.write_mode,
            closed: false,
        })
    }

    fn write_type(&self, characteristic: &Characteristic) -> WriteType {
        match self.write_mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
            WriteMode::Auto if characteristic.properties.contains(CharPropFlags::WRITE) => WriteType::WithResponse,
            WriteMode::Auto => WriteType::WithoutResponse,
        }
    }
}

impl Transport for BleTransport {
    async fn request(&mut self, channel: Channel, packet: Bytes) -> Result<Bytes, GiciskyError> {
        if self.closed {
            return Err(GiciskyError::Protocol("transport already closed".to_string()));
        }
        let characteristic = match channel {
            Channel::Command => &self.command,
            Channel::Image => &self.image,
        };
        let write_type = self.write_type(characteristic);

        let peripheral = &self.peripheral;
        request_fragmented(&self.slot, self.fragments, &packet, self.timeout, |fragment| {
            peripheral.write(characteristic, fragment, write_type)
        })
        .await
    }

    async fn close(&mut self) -> Result<(), GiciskyError> {
        if self.closed {
            return Ok(());
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        let peripheral = &self.peripheral;
        let command = &self.command;
        close_link(
            &mut self.closed,
            || peripheral.unsubscribe(command),
            || peripheral.disconnect(),
        )
        .await?;
        info!("Disconnected from {}", peripheral.address());
        Ok(())
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if self.closed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let peripheral = self.peripheral.clone();
            handle.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    warn!("Failed to disconnect dropped transport: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    const OTHER_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

    fn characteristic(short: u16, service_uuid: Uuid, properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid: Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb | (u128::from(short) << 96)),
            service_uuid,
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    fn display_service() -> Vec<Characteristic> {
        vec![
            characteristic(0xfef3, SERVICE_UUID, CharPropFlags::READ),
            characteristic(0xfef2, SERVICE_UUID, CharPropFlags::WRITE_WITHOUT_RESPONSE),
            characteristic(0xfef1, SERVICE_UUID, CharPropFlags::WRITE | CharPropFlags::NOTIFY),
            characteristic(0x2a19, OTHER_SERVICE, CharPropFlags::READ | CharPropFlags::NOTIFY),
        ]
    }

    #[test]
    fn test_roles_follow_uuid_order() {
        let (command, image) = select_characteristics(display_service()).unwrap();
        assert_eq!(command.uuid, characteristic(0xfef1, SERVICE_UUID, CharPropFlags::empty()).uuid);
        assert_eq!(image.uuid, characteristic(0xfef2, SERVICE_UUID, CharPropFlags::empty()).uuid);
    }

    #[test]
    fn test_wrong_characteristic_count() {
        let mut two = display_service();
        two.remove(0);
        assert!(matches!(
            select_characteristics(two),
            Err(GiciskyError::MissingService { found: 2 })
        ));

        let mut four = display_service();
        four.push(characteristic(0xfef4, SERVICE_UUID, CharPropFlags::READ));
        assert!(matches!(
            select_characteristics(four),
            Err(GiciskyError::MissingService { found: 4 })
        ));

        assert!(matches!(
            select_characteristics(Vec::new()),
            Err(GiciskyError::MissingService { found: 0 })
        ));
    }

    #[test]
    fn test_command_without_notify() {
        let mut service = display_service();
        service[2] = characteristic(0xfef1, SERVICE_UUID, CharPropFlags::WRITE);
        assert!(matches!(
            select_characteristics(service),
            Err(GiciskyError::MissingCharacteristic(_))
        ));
    }
}
