/*!
 # Connecting to discovered lighthouses

 Devices are connected strictly one after another in discovery order, which
 keeps the adapter from juggling several connection attempts at once. Each
 connect is followed by a bounded wait for service resolution.
*/

use std::time::Duration;

use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use crate::ble::BleDevice;
use crate::discovery::{DeviceSet, MatchedDevice};
use crate::{Error, Result};

/// Default upper bound on service resolution, per device
pub const DEFAULT_SERVICE_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Devices connected during one run.
///
/// Whoever holds this owes a [`Connections::release`]; it consumes the value so
/// every device is disconnected exactly once.
pub struct Connections<'a, D> {
    devices: Vec<&'a MatchedDevice<D>>,
}

impl<'a, D: BleDevice> Connections<'a, D> {
    fn new(capacity: usize) -> Self {
        Self {
            devices: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Connected devices in connection order
    pub fn iter(&self) -> impl Iterator<Item = &'a MatchedDevice<D>> + '_ {
        self.devices.iter().copied()
    }

    /// Disconnects every device, carrying on past failures
    #[instrument(skip(self), fields(devices = self.devices.len()))]
    pub async fn release(self) {
        for matched in self.devices {
            disconnect_quietly(matched).await;
        }
    }
}

/// Best-effort disconnect; a failure is only logged
pub(crate) async fn disconnect_quietly<D: BleDevice>(matched: &MatchedDevice<D>) {
    let path = matched.path();
    debug!("Disconnecting from {}", path);
    if let Err(source) = matched.device.disconnect().await {
        let cause = source.to_string();
        let e = Error::DisconnectFailure {
            device: path,
            source: Box::new(source),
        };
        warn!("{}: {}", e, cause);
    }
}

/// Connects every device in `devices`, in order.
///
/// On failure nothing is left connected: the failing device is disconnected
/// if it got that far, and so are all devices connected before it.
#[instrument(skip(devices), fields(devices = devices.len(), timeout_secs = timeout.as_secs()))]
pub async fn connect_all<D: BleDevice>(
    devices: &DeviceSet<D>,
    timeout: Duration,
) -> Result<Connections<'_, D>> {
    let mut connections = Connections::new(devices.len());

    for matched in devices {
        match connect_one(matched, timeout).await {
            Ok(()) => connections.devices.push(matched),
            Err(e) => {
                connections.release().await;
                return Err(e);
            }
        }
    }

    info!("Connected to {} lighthouses", connections.len());
    Ok(connections)
}

async fn connect_one<D: BleDevice>(matched: &MatchedDevice<D>, timeout: Duration) -> Result<()> {
    let path = matched.path();

    debug!("Connecting to {} ({})...", matched.address, path);
    if let Err(source) = matched.device.connect().await {
        error!("Failed to connect to {}: {}", path, source);
        return Err(Error::ConnectFailure {
            device: path,
            source: Box::new(source),
        });
    }

    debug!(
        "Waiting for services of {} to be resolved, this will time out after {} seconds...",
        path,
        timeout.as_secs()
    );
    match time::timeout(timeout, matched.device.wait_services_resolved()).await {
        Ok(Ok(())) => {
            debug!("Services resolved for {}", path);
            Ok(())
        }
        Ok(Err(source)) => {
            error!("Service resolution failed for {}: {}", path, source);
            disconnect_quietly(matched).await;
            Err(Error::ConnectFailure {
                device: path,
                source: Box::new(source),
            })
        }
        Err(_) => {
            error!(
                "Failed to resolve services within {} seconds for {}",
                timeout.as_secs(),
                path
            );
            disconnect_quietly(matched).await;
            Err(Error::ServiceResolutionTimeout {
                device: path,
                timeout,
            })
        }
    }
}
