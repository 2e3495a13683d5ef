/*!
 # BLE capability surface

 The power engine only needs a handful of operations from the Bluetooth stack:
 listing adapters, scanning, connecting, looking up GATT services and
 characteristics, and writing a value. They are expressed as traits here so
 the engine can run against `btleplug` in production (see [`crate::btle`]) and
 against an in-memory stack in tests.
*/

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::{uuid, Uuid};

use crate::Result;

/// GATT service exposed by lighthouses
pub const POWER_SERVICE_UUID: Uuid = uuid!("00001523-1212-efde-1523-785feabcd124");

/// Power characteristic inside [`POWER_SERVICE_UUID`]
pub const POWER_CHARACTERISTIC_UUID: Uuid = uuid!("00001525-1212-efde-1523-785feabcd124");

/// Options passed along with a characteristic write (BlueZ style, e.g. `type`)
pub type WriteOptions = HashMap<String, String>;

/// Stream of devices reported by an adapter while it scans
pub type DeviceStream<D> = BoxStream<'static, D>;

/// Entry point into the Bluetooth stack
#[async_trait]
pub trait BleManager: Send + Sync {
    type Adapter: BleAdapter;

    /// Lists the local adapters, possibly none
    async fn adapters(&self) -> Result<Vec<Self::Adapter>>;
}

/// A local BLE radio
#[async_trait]
pub trait BleAdapter: Send + Sync {
    type Device: BleDevice;

    async fn start_discovery(&self) -> Result<()>;

    async fn stop_discovery(&self) -> Result<()>;

    /// Subscribes to device-found events.
    ///
    /// Subscribe before starting discovery so no advertisement is missed. A
    /// device may be reported more than once.
    async fn discovered_devices(&self) -> Result<DeviceStream<Self::Device>>;
}

/// A remote BLE peripheral
#[async_trait]
pub trait BleDevice: Send + Sync {
    type Service: GattService;

    /// Adapter-assigned path, e.g. `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_01`
    fn path(&self) -> String;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Completes once the GATT tree of a connected device can be queried.
    ///
    /// Devices without a resolution signal are resolved as soon as they are
    /// connected.
    async fn wait_services_resolved(&self) -> Result<()> {
        Ok(())
    }

    async fn service(&self, uuid: Uuid) -> Result<Option<Self::Service>>;

    async fn services(&self) -> Result<Vec<Self::Service>>;
}

/// A resolved GATT service, valid while its device stays connected
#[async_trait]
pub trait GattService: Send + Sync {
    type Characteristic: GattCharacteristic;

    fn uuid(&self) -> Uuid;

    async fn characteristic(&self, uuid: Uuid) -> Result<Option<Self::Characteristic>>;
}

/// A resolved GATT characteristic, valid while its device stays connected
#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    fn uuid(&self) -> Uuid;

    async fn write_value(&self, value: &[u8], options: &WriteOptions) -> Result<()>;
}
