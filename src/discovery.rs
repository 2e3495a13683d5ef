/*!
 # Lighthouse discovery

 Scans with the first local adapter until every requested lighthouse has been
 seen or the discovery timeout fires, whichever comes first.
*/

use std::time::Duration;

use futures::StreamExt;
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::ble::{BleAdapter, BleDevice, BleManager, DeviceStream};
use crate::{Error, LighthouseAddress, Result};

/// Default upper bound on discovery
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// A discovered device together with the address it was matched against
#[derive(Debug, Clone)]
pub struct MatchedDevice<D> {
    pub address: LighthouseAddress,
    pub device: D,
}

impl<D: BleDevice> MatchedDevice<D> {
    pub fn path(&self) -> String {
        self.device.path()
    }
}

/// Devices matched during one discovery, in the order they were found
#[derive(Debug, Clone)]
pub struct DeviceSet<D> {
    devices: Vec<MatchedDevice<D>>,
}

impl<D> DeviceSet<D> {
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MatchedDevice<D>> {
        self.devices.iter()
    }
}

impl<'a, D> IntoIterator for &'a DeviceSet<D> {
    type Item = &'a MatchedDevice<D>;
    type IntoIter = std::slice::Iter<'a, MatchedDevice<D>>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

/// Accumulates matches; lives outside the timed future so that the missing
/// addresses can still be reported after a timeout
struct AddressMatcher<'a, D> {
    requested: &'a [LighthouseAddress],
    found: Vec<MatchedDevice<D>>,
}

impl<'a, D: BleDevice> AddressMatcher<'a, D> {
    fn new(requested: &'a [LighthouseAddress]) -> Self {
        Self {
            requested,
            found: Vec::with_capacity(requested.len()),
        }
    }

    fn is_complete(&self) -> bool {
        self.requested
            .iter()
            .all(|address| self.is_satisfied(address))
    }

    fn is_satisfied(&self, address: &LighthouseAddress) -> bool {
        self.found.iter().any(|m| &m.address == address)
    }

    fn missing(&self) -> Vec<LighthouseAddress> {
        self.requested
            .iter()
            .filter(|address| !self.is_satisfied(address))
            .cloned()
            .collect()
    }

    /// Tests one reported device against the requested addresses
    fn offer(&mut self, device: D) {
        let path = device.path();

        let Some(address) = self
            .requested
            .iter()
            .find(|address| address.matches_path(&path))
        else {
            trace!("Device {} is not one of the requested lighthouses, skipping", path);
            return;
        };

        if self.is_satisfied(address) {
            trace!("Lighthouse {} already found, ignoring {}", address, path);
            return;
        }

        if self.found.iter().any(|m| m.device.path() == path) {
            trace!("Device {} already matched another address, ignoring", path);
            return;
        }

        info!("Found lighthouse {} at {}", address, path);
        self.found.push(MatchedDevice {
            address: address.clone(),
            device,
        });
    }

    /// Consumes reported devices until every address is matched
    async fn run(&mut self, mut devices: DeviceStream<D>) -> Result<()> {
        while !self.is_complete() {
            match devices.next().await {
                Some(device) => self.offer(device),
                None => {
                    return Err(Error::Ble(
                        "adapter stopped reporting devices during discovery".to_string(),
                    ))
                }
            }
        }
        debug!("Finished finding all lighthouses");
        Ok(())
    }
}

/// Gets the first Bluetooth adapter
#[instrument(skip(manager))]
async fn first_adapter<M: BleManager>(manager: &M) -> Result<M::Adapter> {
    debug!("Getting default Bluetooth adapter");
    let adapters = manager.adapters().await?;
    match adapters.into_iter().next() {
        Some(adapter) => Ok(adapter),
        None => {
            error!("No Bluetooth adapters found");
            Err(Error::NoAdapter)
        }
    }
}

/// Discovers one device per requested address.
///
/// Scanning is stopped again on every path out of this function once it has
/// been started.
#[instrument(skip(manager, addresses), fields(requested = addresses.len(), timeout_secs = timeout.as_secs()))]
pub async fn discover<M: BleManager>(
    manager: &M,
    addresses: &[LighthouseAddress],
    timeout: Duration,
) -> Result<DeviceSet<<M::Adapter as BleAdapter>::Device>> {
    let adapter = first_adapter(manager).await?;
    let devices = adapter.discovered_devices().await?;

    debug!("Starting device discovery");
    adapter.start_discovery().await?;

    let mut matcher = AddressMatcher::new(addresses);
    info!(
        "Waiting for {} lighthouses, this will time out after {} seconds",
        addresses.len(),
        timeout.as_secs()
    );
    let timed = time::timeout(timeout, matcher.run(devices)).await;
    let outcome = match timed {
        Ok(result) => result,
        Err(_) => {
            let missing = matcher.missing();
            error!(
                "Timed out after {} seconds, still missing {} of {} lighthouses",
                timeout.as_secs(),
                missing.len(),
                addresses.len()
            );
            Err(Error::DiscoveryTimeout { timeout, missing })
        }
    };

    debug!("Stopping device discovery");
    if let Err(e) = adapter.stop_discovery().await {
        warn!("Failed to stop device discovery: {}", e);
    }

    outcome?;
    Ok(DeviceSet {
        devices: matcher.found,
    })
}
