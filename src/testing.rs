//! In-memory Bluetooth stack used by the unit tests.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::time::sleep;
use uuid::Uuid;

use crate::ble::{
    BleAdapter, BleDevice, BleManager, DeviceStream, GattCharacteristic, GattService,
    WriteOptions, POWER_CHARACTERISTIC_UUID, POWER_SERVICE_UUID,
};
use crate::{Error, LighthouseAddress, Result};

const DEVICE_INFORMATION_SERVICE: Uuid = uuid::uuid!("0000180a-0000-1000-8000-00805f9b34fb");

/// `AA:BB:CC:DD:EE:<n>`
pub(crate) fn address(n: u8) -> LighthouseAddress {
    format!("AA:BB:CC:DD:EE:{n:02X}").parse().unwrap()
}

#[derive(Clone, Default)]
pub(crate) struct FakeManager {
    adapters: Vec<FakeAdapter>,
}

impl FakeManager {
    pub(crate) fn without_adapters() -> Self {
        Self::default()
    }

    pub(crate) fn with_adapter(adapter: FakeAdapter) -> Self {
        Self {
            adapters: vec![adapter],
        }
    }
}

#[async_trait]
impl BleManager for FakeManager {
    type Adapter = FakeAdapter;

    async fn adapters(&self) -> Result<Vec<FakeAdapter>> {
        Ok(self.adapters.clone())
    }
}

#[derive(Default)]
struct AdapterState {
    advertisements: Vec<(Duration, FakeDevice)>,
    finite: bool,
    scanning: bool,
    start_calls: usize,
    stop_calls: usize,
}

#[derive(Clone, Default)]
pub(crate) struct FakeAdapter {
    state: Arc<Mutex<AdapterState>>,
}

impl FakeAdapter {
    /// Reports `device` once `after` has passed since the subscription
    pub(crate) fn advertise(self, after: Duration, device: FakeDevice) -> Self {
        self.state.lock().advertisements.push((after, device));
        self
    }

    /// Ends the device stream after the last advertisement
    pub(crate) fn finite(self) -> Self {
        self.state.lock().finite = true;
        self
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    pub(crate) fn start_calls(&self) -> usize {
        self.state.lock().start_calls
    }

    pub(crate) fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }
}

#[async_trait]
impl BleAdapter for FakeAdapter {
    type Device = FakeDevice;

    async fn start_discovery(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.start_calls += 1;
        state.scanning = true;
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.stop_calls += 1;
        state.scanning = false;
        Ok(())
    }

    async fn discovered_devices(&self) -> Result<DeviceStream<FakeDevice>> {
        let (mut advertisements, finite) = {
            let state = self.state.lock();
            (state.advertisements.clone(), state.finite)
        };
        advertisements.sort_by_key(|(after, _)| *after);

        let mut elapsed = Duration::ZERO;
        let steps: Vec<_> = advertisements
            .into_iter()
            .map(|(after, device)| {
                let wait = after.saturating_sub(elapsed);
                elapsed = elapsed.max(after);
                (wait, device)
            })
            .collect();

        let reported = stream::iter(steps).then(|(wait, device)| async move {
            sleep(wait).await;
            device
        });

        if finite {
            Ok(reported.boxed())
        } else {
            Ok(reported.chain(stream::pending()).boxed())
        }
    }
}

#[derive(Clone, Copy)]
enum Resolution {
    After(Duration),
    Never,
    Fails,
}

struct DeviceState {
    path: String,
    connect_fails: bool,
    disconnect_fails: bool,
    resolution: Resolution,
    services: Vec<FakeService>,
    connected: bool,
    connect_calls: usize,
    disconnect_calls: usize,
    services_calls: usize,
}

#[derive(Clone)]
pub(crate) struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl fmt::Debug for FakeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeDevice")
            .field("path", &self.state.lock().path)
            .finish_non_exhaustive()
    }
}

impl FakeDevice {
    fn with_path(path: String, services: Vec<FakeService>) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                path,
                connect_fails: false,
                disconnect_fails: false,
                resolution: Resolution::After(Duration::ZERO),
                services,
                connected: false,
                connect_calls: 0,
                disconnect_calls: 0,
                services_calls: 0,
            })),
        }
    }

    /// A lighthouse at [`address`]`(n)` exposing the power service
    pub(crate) fn lighthouse(n: u8) -> Self {
        let path = format!("/org/bluez/hci0/dev_{}", address(n).path_suffix());
        Self::with_path(
            path,
            vec![
                FakeService::new(DEVICE_INFORMATION_SERVICE, Vec::new()),
                FakeService::new(
                    POWER_SERVICE_UUID,
                    vec![FakeCharacteristic::new(POWER_CHARACTERISTIC_UUID)],
                ),
            ],
        )
    }

    /// Some other peripheral, `suffix` in underscore form
    pub(crate) fn unrelated(suffix: &str) -> Self {
        Self::with_path(format!("/org/bluez/hci0/dev_{suffix}"), Vec::new())
    }

    pub(crate) fn failing_connect(self) -> Self {
        self.state.lock().connect_fails = true;
        self
    }

    pub(crate) fn failing_disconnect(self) -> Self {
        self.state.lock().disconnect_fails = true;
        self
    }

    pub(crate) fn resolving_after(self, after: Duration) -> Self {
        self.state.lock().resolution = Resolution::After(after);
        self
    }

    pub(crate) fn never_resolving(self) -> Self {
        self.state.lock().resolution = Resolution::Never;
        self
    }

    pub(crate) fn failing_resolution(self) -> Self {
        self.state.lock().resolution = Resolution::Fails;
        self
    }

    pub(crate) fn without_power_service(self) -> Self {
        self.state
            .lock()
            .services
            .retain(|service| service.uuid != POWER_SERVICE_UUID);
        self
    }

    pub(crate) fn without_services(self) -> Self {
        self.state.lock().services.clear();
        self
    }

    pub(crate) fn without_power_characteristic(self) -> Self {
        for service in &mut self.state.lock().services {
            service.characteristics.clear();
        }
        self
    }

    pub(crate) fn failing_writes(self) -> Self {
        for service in &self.state.lock().services {
            for characteristic in &service.characteristics {
                *characteristic.fails.lock() = true;
            }
        }
        self
    }

    pub(crate) fn same_as(&self, other: &FakeDevice) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.state.lock().connect_calls
    }

    pub(crate) fn disconnect_calls(&self) -> usize {
        self.state.lock().disconnect_calls
    }

    /// How often the full service list was requested
    pub(crate) fn services_calls(&self) -> usize {
        self.state.lock().services_calls
    }

    /// Every value written to any characteristic of this device, in order
    pub(crate) fn writes(&self) -> Vec<(Vec<u8>, WriteOptions)> {
        self.state
            .lock()
            .services
            .iter()
            .flat_map(|service| service.characteristics.iter())
            .flat_map(|characteristic| characteristic.writes.lock().clone())
            .collect()
    }
}

#[async_trait]
impl BleDevice for FakeDevice {
    type Service = FakeService;

    fn path(&self) -> String {
        self.state.lock().path.clone()
    }

    async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.connect_calls += 1;
        if state.connect_fails {
            return Err(Error::Ble("connection refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.disconnect_calls += 1;
        if state.disconnect_fails {
            return Err(Error::Ble("device busy".to_string()));
        }
        state.connected = false;
        Ok(())
    }

    async fn wait_services_resolved(&self) -> Result<()> {
        let resolution = self.state.lock().resolution;
        match resolution {
            Resolution::After(after) => {
                sleep(after).await;
                Ok(())
            }
            Resolution::Never => std::future::pending().await,
            Resolution::Fails => Err(Error::Ble("service discovery failed".to_string())),
        }
    }

    async fn service(&self, uuid: Uuid) -> Result<Option<FakeService>> {
        Ok(self
            .state
            .lock()
            .services
            .iter()
            .find(|service| service.uuid == uuid)
            .cloned())
    }

    async fn services(&self) -> Result<Vec<FakeService>> {
        let mut state = self.state.lock();
        state.services_calls += 1;
        Ok(state.services.clone())
    }
}

#[derive(Clone)]
pub(crate) struct FakeService {
    uuid: Uuid,
    characteristics: Vec<FakeCharacteristic>,
}

impl FakeService {
    fn new(uuid: Uuid, characteristics: Vec<FakeCharacteristic>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }
}

#[async_trait]
impl GattService for FakeService {
    type Characteristic = FakeCharacteristic;

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn characteristic(&self, uuid: Uuid) -> Result<Option<FakeCharacteristic>> {
        Ok(self
            .characteristics
            .iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .cloned())
    }
}

#[derive(Clone)]
pub(crate) struct FakeCharacteristic {
    uuid: Uuid,
    fails: Arc<Mutex<bool>>,
    writes: Arc<Mutex<Vec<(Vec<u8>, WriteOptions)>>>,
}

impl FakeCharacteristic {
    fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            fails: Arc::new(Mutex::new(false)),
            writes: Arc::default(),
        }
    }
}

#[async_trait]
impl GattCharacteristic for FakeCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn write_value(&self, value: &[u8], options: &WriteOptions) -> Result<()> {
        if *self.fails.lock() {
            return Err(Error::Ble("write rejected".to_string()));
        }
        self.writes.lock().push((value.to_vec(), options.clone()));
        Ok(())
    }
}

/// Collects formatted log output of the current thread
#[derive(Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Routes this thread's events into the capture until the guard drops
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    /// Number of occurrences of `needle` in the captured output
    pub(crate) fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
