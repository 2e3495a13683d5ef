/*!
 # Power state orchestration

 One call to [`PowerStateOrchestrator::set_power_state`] walks through

 1. discovery of every requested lighthouse,
 2. connecting to each of them in discovery order,
 3. resolving the power characteristic and writing the power byte, device by
    device,
 4. disconnecting every connected device, whatever happened in step 3.

 Writes that already happened are not undone when a later device fails.
*/

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, info, instrument, trace};

use crate::ble::{BleDevice, BleManager, GattCharacteristic, WriteOptions};
use crate::btle::BtleManager;
use crate::characteristic::resolve_writable;
use crate::connection::{connect_all, Connections, DEFAULT_SERVICE_RESOLUTION_TIMEOUT};
use crate::discovery::{discover, DEFAULT_DISCOVERY_TIMEOUT};
use crate::{join_addresses, Error, LighthouseAddress, PowerState, Result};

/// Timeouts bounding a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// How long to scan for the requested lighthouses
    pub discovery_timeout: Duration,
    /// How long to wait for each device's services after connecting
    pub service_resolution_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            service_resolution_timeout: DEFAULT_SERVICE_RESOLUTION_TIMEOUT,
        }
    }
}

/// Phases of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunPhase {
    Idle,
    Discovering,
    Connecting,
    Resolving,
    Writing,
    Disconnecting,
    Succeeded,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Discovering => "discovering",
            RunPhase::Connecting => "connecting",
            RunPhase::Resolving => "resolving",
            RunPhase::Writing => "writing",
            RunPhase::Disconnecting => "disconnecting",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks the phase of the current run
struct Run {
    phase: RunPhase,
}

impl Run {
    fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
        }
    }

    fn enter(&mut self, next: RunPhase) {
        trace!("Run phase {} -> {}", self.phase, next);
        self.phase = next;
    }

    /// Logs a failure against the phase it happened in
    fn check<T>(&self, outcome: Result<T>) -> Result<T> {
        if let Err(e) = &outcome {
            error!("Run failed while {}: {}", self.phase, e);
        }
        outcome
    }

    /// Records the terminal phase and passes the outcome through
    fn finish(&mut self, outcome: Result<()>) -> Result<()> {
        let terminal = if outcome.is_ok() {
            RunPhase::Succeeded
        } else {
            RunPhase::Failed
        };
        self.enter(terminal);
        outcome
    }
}

/// Drives discovery, connection, power writes and cleanup for a set of
/// lighthouses
pub struct PowerStateOrchestrator<M> {
    manager: M,
    config: OrchestratorConfig,
}

impl PowerStateOrchestrator<BtleManager> {
    /// Creates an orchestrator on top of the platform Bluetooth stack
    pub async fn with_system_adapter(config: OrchestratorConfig) -> Result<Self> {
        Ok(Self::new(BtleManager::new().await?, config))
    }
}

impl<M: BleManager> PowerStateOrchestrator<M> {
    pub fn new(manager: M, config: OrchestratorConfig) -> Self {
        Self { manager, config }
    }

    /// Sets the power state of every lighthouse in `addresses`.
    ///
    /// Returns `true` only if every lighthouse was written. The cause of a
    /// failure is logged once, together with the phase it happened in.
    pub async fn set_power_state(
        &self,
        state: PowerState,
        addresses: &[LighthouseAddress],
    ) -> bool {
        self.try_set_power_state(state, addresses).await.is_ok()
    }

    /// Like [`Self::set_power_state`], but hands back the failure
    #[instrument(skip(self, addresses), fields(lighthouses = addresses.len()))]
    pub async fn try_set_power_state(
        &self,
        state: PowerState,
        addresses: &[LighthouseAddress],
    ) -> Result<()> {
        let addresses = dedup(addresses);
        if addresses.is_empty() {
            error!("{}", Error::NoAddresses);
            return Err(Error::NoAddresses);
        }

        let mut run = Run::new();

        run.enter(RunPhase::Discovering);
        let discovered = discover(&self.manager, &addresses, self.config.discovery_timeout).await;
        let devices = match run.check(discovered) {
            Ok(devices) => devices,
            Err(e) => return run.finish(Err(e)),
        };

        run.enter(RunPhase::Connecting);
        let connected = connect_all(&devices, self.config.service_resolution_timeout).await;
        let connections = match run.check(connected) {
            Ok(connections) => connections,
            Err(e) => return run.finish(Err(e)),
        };

        info!(
            "Changing power state to {} for the following lighthouses: {}",
            state,
            join_addresses(&addresses)
        );
        let written = write_all(&mut run, state, &connections).await;
        let outcome = run.check(written);

        run.enter(RunPhase::Disconnecting);
        connections.release().await;

        run.finish(outcome)
    }
}

/// Resolves and writes each connected device in order, stopping at the first
/// failure
async fn write_all<D: BleDevice>(
    run: &mut Run,
    state: PowerState,
    connections: &Connections<'_, D>,
) -> Result<()> {
    let value = state.characteristic_value();
    let options = WriteOptions::new();

    for matched in connections.iter() {
        run.enter(RunPhase::Resolving);
        let characteristic = resolve_writable(matched).await?;

        run.enter(RunPhase::Writing);
        debug!(
            "Writing power state {} to {} ({})...",
            state,
            matched.address,
            matched.path()
        );
        if let Err(source) = characteristic.write_value(&value, &options).await {
            error!("Failed to write power state to {}: {}", matched.address, source);
            return Err(Error::WriteFailure {
                device: matched.path(),
                source: Box::new(source),
            });
        }
    }

    debug!("Finished setting the power states of all devices");
    Ok(())
}

/// Drops repeated addresses, keeping the first occurrence
fn dedup(addresses: &[LighthouseAddress]) -> Vec<LighthouseAddress> {
    let mut unique: Vec<LighthouseAddress> = Vec::with_capacity(addresses.len());
    for address in addresses {
        if unique.contains(address) {
            debug!("Ignoring repeated lighthouse {}", address);
        } else {
            unique.push(address.clone());
        }
    }
    unique
}
