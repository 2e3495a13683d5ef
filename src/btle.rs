use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{self, StreamExt};
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::ble::{
    BleAdapter, BleDevice, BleManager, DeviceStream, GattCharacteristic, GattService,
    WriteOptions,
};
use crate::{Error, Result};

/// Bluetooth stack backed by `btleplug`
#[derive(Clone)]
pub struct BtleManager {
    manager: Manager,
}

impl BtleManager {
    /// Opens a session with the platform Bluetooth stack
    #[instrument]
    pub async fn new() -> Result<Self> {
        debug!("Opening Bluetooth session");
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl BleManager for BtleManager {
    type Adapter = BtleAdapter;

    async fn adapters(&self) -> Result<Vec<BtleAdapter>> {
        let adapters = self.manager.adapters().await?;
        debug!("Found {} Bluetooth adapters", adapters.len());
        Ok(adapters
            .into_iter()
            .map(|central| BtleAdapter { central })
            .collect())
    }
}

/// A local adapter (central)
#[derive(Clone)]
pub struct BtleAdapter {
    central: Adapter,
}

#[async_trait]
impl BleAdapter for BtleAdapter {
    type Device = BtleDevice;

    async fn start_discovery(&self) -> Result<()> {
        self.central.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<()> {
        self.central.stop_scan().await?;
        Ok(())
    }

    async fn discovered_devices(&self) -> Result<DeviceStream<BtleDevice>> {
        let events = self.central.events().await?;

        // Peripherals the stack already knows about never raise DeviceDiscovered again
        let known = self.central.peripherals().await?;
        debug!("{} peripherals already known to the adapter", known.len());

        let central = self.central.clone();
        let discovered = events.filter_map(move |event| {
            let central = central.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        match central.peripheral(&id).await {
                            Ok(peripheral) => Some(BtleDevice { peripheral }),
                            Err(e) => {
                                trace!("Peripheral {} vanished before lookup: {}", id, e);
                                None
                            }
                        }
                    }
                    CentralEvent::DeviceConnected(id) => {
                        trace!("Device {} connected", id);
                        None
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        trace!("Device {} disconnected", id);
                        None
                    }
                    _ => None,
                }
            }
        });

        Ok(stream::iter(known.into_iter().map(|peripheral| BtleDevice { peripheral }))
            .chain(discovered)
            .boxed())
    }
}

/// A remote peripheral
#[derive(Clone)]
pub struct BtleDevice {
    peripheral: Peripheral,
}

#[async_trait]
impl BleDevice for BtleDevice {
    type Service = BtleService;

    fn path(&self) -> String {
        self.peripheral.id().to_string()
    }

    async fn connect(&self) -> Result<()> {
        if !self.peripheral.is_connected().await? {
            self.peripheral.connect().await?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn wait_services_resolved(&self) -> Result<()> {
        self.peripheral.discover_services().await?;
        Ok(())
    }

    async fn service(&self, uuid: Uuid) -> Result<Option<BtleService>> {
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .find(|service| service.uuid == uuid)
            .map(|service| BtleService {
                peripheral: self.peripheral.clone(),
                service,
            }))
    }

    async fn services(&self) -> Result<Vec<BtleService>> {
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|service| BtleService {
                peripheral: self.peripheral.clone(),
                service,
            })
            .collect())
    }
}

/// A GATT service discovered on a [`BtleDevice`]
#[derive(Clone)]
pub struct BtleService {
    peripheral: Peripheral,
    service: Service,
}

#[async_trait]
impl GattService for BtleService {
    type Characteristic = BtleCharacteristic;

    fn uuid(&self) -> Uuid {
        self.service.uuid
    }

    async fn characteristic(&self, uuid: Uuid) -> Result<Option<BtleCharacteristic>> {
        Ok(self
            .service
            .characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .map(|characteristic| BtleCharacteristic {
                peripheral: self.peripheral.clone(),
                characteristic: characteristic.clone(),
            }))
    }
}

/// A GATT characteristic discovered on a [`BtleDevice`]
#[derive(Clone)]
pub struct BtleCharacteristic {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

/// Picks the write type from the `type` option, falling back to what the
/// characteristic supports
fn write_type(properties: CharPropFlags, options: &WriteOptions) -> Result<WriteType> {
    if options.contains_key("offset") {
        return Err(Error::Ble("offset writes are not supported".to_string()));
    }

    match options.get("type").map(String::as_str) {
        Some("request") => Ok(WriteType::WithResponse),
        Some("command") => Ok(WriteType::WithoutResponse),
        Some(other) => Err(Error::Ble(format!("unsupported write type '{other}'"))),
        None if properties.contains(CharPropFlags::WRITE) => Ok(WriteType::WithResponse),
        None => Ok(WriteType::WithoutResponse),
    }
}

#[async_trait]
impl GattCharacteristic for BtleCharacteristic {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }

    async fn write_value(&self, value: &[u8], options: &WriteOptions) -> Result<()> {
        let kind = write_type(self.characteristic.properties, options)?;
        trace!(
            "Writing {} bytes to {} ({:?})",
            value.len(),
            self.characteristic.uuid,
            kind
        );

        if let Err(e) = self
            .peripheral
            .write(&self.characteristic, value, kind)
            .await
        {
            warn!("Write to {} failed: {}", self.characteristic.uuid, e);
            return Err(e.into());
        }

        Ok(())
    }
}
