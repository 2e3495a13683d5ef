use tracing::{error, info, instrument, trace};

use crate::ble::{BleDevice, GattService, POWER_CHARACTERISTIC_UUID, POWER_SERVICE_UUID};
use crate::discovery::MatchedDevice;
use crate::{Error, Result};

/// Power characteristic handle of a connected device
pub type PowerCharacteristic<D> =
    <<D as BleDevice>::Service as GattService>::Characteristic;

/// Looks up the lighthouse power characteristic on a connected device.
///
/// When the lighthouse service is missing, every service the device does
/// expose is logged to help diagnose the wrong device or firmware.
#[instrument(skip(matched), fields(address = %matched.address))]
pub async fn resolve_writable<D: BleDevice>(
    matched: &MatchedDevice<D>,
) -> Result<PowerCharacteristic<D>> {
    let path = matched.path();

    trace!("Getting the GATT service {} of {}...", POWER_SERVICE_UUID, matched.address);
    let Some(service) = matched.device.service(POWER_SERVICE_UUID).await? else {
        error!(
            "No GATT service ({}) found for {}",
            POWER_SERVICE_UUID, matched.address
        );
        log_services(matched).await;
        return Err(Error::ServiceNotFound {
            device: path,
            uuid: POWER_SERVICE_UUID,
        });
    };

    trace!(
        "Getting the power characteristic {} of {}...",
        POWER_CHARACTERISTIC_UUID,
        matched.address
    );
    match service.characteristic(POWER_CHARACTERISTIC_UUID).await? {
        Some(characteristic) => Ok(characteristic),
        None => {
            error!(
                "No power characteristic ({}) for {} ({})",
                POWER_CHARACTERISTIC_UUID, matched.address, path
            );
            Err(Error::CharacteristicNotFound {
                device: path,
                uuid: POWER_CHARACTERISTIC_UUID,
            })
        }
    }
}

async fn log_services<D: BleDevice>(matched: &MatchedDevice<D>) {
    match matched.device.services().await {
        Ok(services) if services.is_empty() => {
            error!("No services found for {}", matched.address);
        }
        Ok(services) => {
            info!("Found {} services for {}", services.len(), matched.address);
            for service in &services {
                info!("Found service: {}", service.uuid());
            }
        }
        Err(e) => error!("Could not list services of {}: {}", matched.address, e),
    }
}
