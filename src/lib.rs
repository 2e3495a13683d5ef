/*!
 # Lighthouse power control over Bluetooth LE

 A Rust library for switching Valve Index base stations ("lighthouses") on and
 off. The base stations expose a single power characteristic over GATT; this
 crate finds them by address, connects to each one in turn, writes the power
 byte and always disconnects again afterwards.

 ## Features

 * Discovery of a fixed set of lighthouses by hardware address
 * Sequential connect with a per-device service-resolution timeout
 * Power on/off writes to the lighthouse power characteristic
 * Guaranteed release of scanning and connections on every exit path
 * JSON registry of known lighthouse addresses

 ## Example

 ```no_run
 use lighthouse_power::*;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let lighthouses: Vec<LighthouseAddress> = vec![
         "AA:BB:CC:DD:EE:01".parse()?,
         "AA:BB:CC:DD:EE:02".parse()?,
     ];

     let orchestrator =
         PowerStateOrchestrator::with_system_adapter(OrchestratorConfig::default()).await?;
     orchestrator
         .try_set_power_state(PowerState::On, &lighthouses)
         .await?;

     Ok(())
 }
 ```
*/

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Custom error types for the lighthouse power library
#[derive(Error, Debug)]
pub enum Error {
    /// No Bluetooth adapters found
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    /// Nothing to do: the request named no lighthouses
    #[error("No lighthouse addresses were given")]
    NoAddresses,

    /// Not every requested lighthouse advertised before the deadline
    #[error("Timed out after {}s waiting for lighthouses: {}", .timeout.as_secs(), join_addresses(.missing))]
    DiscoveryTimeout {
        timeout: Duration,
        missing: Vec<LighthouseAddress>,
    },

    /// The connect call for a device failed
    #[error("Failed to connect to {device}")]
    ConnectFailure {
        device: String,
        #[source]
        source: Box<Error>,
    },

    /// Services were not resolved within the per-device timeout
    #[error("Services of {device} were not resolved within {}s", .timeout.as_secs())]
    ServiceResolutionTimeout { device: String, timeout: Duration },

    /// The lighthouse GATT service is missing
    #[error("No GATT service {uuid} found on {device}")]
    ServiceNotFound { device: String, uuid: Uuid },

    /// The power characteristic is missing from the lighthouse service
    #[error("Could not find power characteristic {uuid} on {device}")]
    CharacteristicNotFound { device: String, uuid: Uuid },

    /// Writing the power byte failed
    #[error("Failed to write power state to {device}")]
    WriteFailure {
        device: String,
        #[source]
        source: Box<Error>,
    },

    /// Disconnecting a device failed; only ever logged
    #[error("Failed to disconnect from {device}")]
    DisconnectFailure {
        device: String,
        #[source]
        source: Box<Error>,
    },

    /// Malformed lighthouse address
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    /// Unknown power state name
    #[error("Unknown power state '{0}', expected 'on' or 'off'")]
    InvalidPowerState(String),

    /// BLE communication error
    #[error("BLE communication error: {0}")]
    Ble(String),

    /// Error from btleplug
    #[error(transparent)]
    BtlePlugError(#[from] btleplug::Error),
}

pub(crate) fn join_addresses(addresses: &[LighthouseAddress]) -> String {
    addresses
        .iter()
        .map(LighthouseAddress::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod address;
pub mod ble;
pub mod btle;
pub mod characteristic;
pub mod connection;
pub mod discovery;
pub mod logging;
pub mod orchestrator;
pub mod power;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use address::{AddressError, LighthouseAddress};
pub use ble::{
    BleAdapter, BleDevice, BleManager, GattCharacteristic, GattService, WriteOptions,
    POWER_CHARACTERISTIC_UUID, POWER_SERVICE_UUID,
};
pub use discovery::{DeviceSet, MatchedDevice};
pub use orchestrator::{OrchestratorConfig, PowerStateOrchestrator};
pub use power::PowerState;
pub use registry::{Registry, RegistryError};
