use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::model::{
    CharacteristicInfo, CharacteristicProperties, DescriptorInfo, FoundDevice, ScanFilter,
    ScanResult, ServiceInfo,
};
use super::platform::{AdapterProbe, BlePlatform, EventHub, LinkInfo, PlatformEvent, ScanStream};
use crate::error::{FixtureError, PlatformError};
use crate::protocol::{
    self, CLIENT_CHARACTERISTIC_CONFIGURATION, CharacteristicAddress, ConnectionPriority,
    DescriptorAddress, DeviceIdentifier, WriteMode,
};

const FAKE_MTU: u16 = 247;
const FAKE_DEFAULT_RSSI: i16 = -60;
const FAKE_NOTIFICATION_INTERVAL: Duration = Duration::from_millis(50);

/// Parsed fake scan fixture records.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct ScanFixture {
    results: Vec<ScanResult>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let results = parse_scan_fixture(value)?;
        Ok(Self { results })
    }
}

/// Values the fake platform raises once notifications are enabled.
///
/// Parsed from comma-separated hexadecimal payloads.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct NotificationScript {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationScript {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }
        let payloads = value
            .split(',')
            .map(|raw| {
                protocol::decode_value(raw).map_err(|_error| FixtureError::InvalidNotification {
                    value: raw.trim().to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { payloads })
    }
}

/// Adapter condition simulated by the fake platform.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum FakeAdapter {
    #[default]
    Powered,
    Off,
    Unavailable,
    Unsupported,
}

/// Platform call that can be delayed or failed in the fake platform.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum FakeCall {
    SetPowered,
    StopScan,
    Connect,
    Disconnect,
    CreateBond,
    DiscoverServices,
    Read,
    Write,
    ReadDescriptor,
    WriteDescriptor,
    SetNotify,
    ReadRssi,
    RequestConnectionPriority,
}

/// How long a fake platform call takes to answer.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum FakeLatency {
    #[default]
    Immediate,
    After(Duration),
    /// The platform never answers.
    Never,
}

/// One write observed by the fake platform.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FakeWrite {
    pub device_id: DeviceIdentifier,
    pub address: CharacteristicAddress,
    pub value: Vec<u8>,
    pub mode: WriteMode,
}

/// Settings for constructing a fake platform.
#[derive(Debug, Builder)]
pub struct FakePlatformConfig {
    #[builder(default)]
    scan_fixture: ScanFixture,
    #[builder(default)]
    adapter: FakeAdapter,
    #[builder(default)]
    discovery_delay: Duration,
    #[builder(default)]
    notifications: NotificationScript,
    services: Option<Vec<ServiceInfo>>,
}

/// Scripted platform used in tests and non-hardware environments.
///
/// Clones share state, so a test can keep one handle to drive the platform
/// while the orchestrator owns another.
#[derive(Debug, Clone)]
pub struct FakePlatform {
    inner: Arc<FakeInner>,
}

#[derive(Debug)]
struct FakeInner {
    state: Mutex<FakeState>,
    events: EventHub,
    fixture: Vec<ScanResult>,
    services: Vec<ServiceInfo>,
    notifications: Vec<Vec<u8>>,
    discovery_delay: Duration,
}

#[derive(Debug, Default)]
struct FakeState {
    adapter: FakeAdapter,
    latency: HashMap<FakeCall, FakeLatency>,
    failures: HashMap<FakeCall, String>,
    reject_stop_scan: bool,
    scan: Option<ActiveScan>,
    known: HashSet<DeviceIdentifier>,
    connected: HashSet<DeviceIdentifier>,
    bonded: HashSet<DeviceIdentifier>,
    notifying: HashSet<(DeviceIdentifier, CharacteristicAddress)>,
    values: HashMap<(DeviceIdentifier, CharacteristicAddress), Vec<u8>>,
    descriptor_values: HashMap<(DeviceIdentifier, DescriptorAddress), Vec<u8>>,
    writes: Vec<FakeWrite>,
    priorities: Vec<(DeviceIdentifier, ConnectionPriority)>,
}

#[derive(Debug)]
struct ActiveScan {
    filter: ScanFilter,
    sender: mpsc::UnboundedSender<ScanResult>,
}

impl FakePlatform {
    /// Creates a fake platform from explicit settings.
    #[must_use]
    pub fn new(config: FakePlatformConfig) -> Self {
        let FakePlatformConfig {
            scan_fixture,
            adapter,
            discovery_delay,
            notifications,
            services,
        } = config;
        let fixture: Vec<ScanResult> = scan_fixture.into();
        let known = fixture
            .iter()
            .map(|result| result.device().device_id().clone())
            .collect();

        Self {
            inner: Arc::new(FakeInner {
                state: Mutex::new(FakeState {
                    adapter,
                    known,
                    ..FakeState::default()
                }),
                events: EventHub::default(),
                fixture,
                services: services.unwrap_or_else(default_services),
                notifications: notifications.into(),
                discovery_delay,
            }),
        }
    }

    /// Delays every later call of one kind.
    pub fn set_latency(&self, call: FakeCall, latency: FakeLatency) {
        self.inner.state.lock().latency.insert(call, latency);
    }

    /// Makes every later call of one kind fail with a platform rejection.
    pub fn fail_with(&self, call: FakeCall, reason: impl Into<String>) {
        self.inner.state.lock().failures.insert(call, reason.into());
    }

    /// Makes `stop_scan` fail until reset.
    pub fn reject_stop_scan(&self, reject: bool) {
        self.inner.state.lock().reject_stop_scan = reject;
    }

    /// Changes the simulated adapter, raising a power event when it flips.
    pub fn set_adapter(&self, adapter: FakeAdapter) {
        let previous = std::mem::replace(&mut self.inner.state.lock().adapter, adapter);
        let was_powered = previous == FakeAdapter::Powered;
        let is_powered = adapter == FakeAdapter::Powered;
        if was_powered != is_powered {
            self.inner
                .events
                .publish(PlatformEvent::AdapterPowered(is_powered));
        }
    }

    /// Delivers an advertisement to the active scan, if any.
    pub fn advertise(&self, result: ScanResult) {
        let mut state = self.inner.state.lock();
        state.known.insert(result.device().device_id().clone());
        if let Some(scan) = &state.scan
            && scan.filter.matches(&result)
        {
            let _ = scan.sender.send(result);
        }
    }

    /// Raises a value change if notifications are enabled for the characteristic.
    ///
    /// Returns whether the value was delivered.
    pub fn emit_value(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
        value: Vec<u8>,
    ) -> bool {
        let notifying = self
            .inner
            .state
            .lock()
            .notifying
            .contains(&(device_id.clone(), *address));
        if !notifying {
            return false;
        }
        self.inner.events.publish(PlatformEvent::ValueChanged {
            device_id: device_id.clone(),
            address: *address,
            value,
        })
    }

    /// Simulates a peer-initiated link loss.
    pub fn drop_link(&self, device_id: &DeviceIdentifier) {
        {
            let mut state = self.inner.state.lock();
            state.connected.remove(device_id);
            state.notifying.retain(|(id, _)| id != device_id);
        }
        self.inner.events.publish(PlatformEvent::LinkLost {
            device_id: device_id.clone(),
        });
    }

    /// Stores the value later returned by `read`.
    pub fn set_value(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
        value: Vec<u8>,
    ) {
        self.inner
            .state
            .lock()
            .values
            .insert((device_id.clone(), *address), value);
    }

    /// Returns every write observed so far.
    #[must_use]
    pub fn written(&self) -> Vec<FakeWrite> {
        self.inner.state.lock().writes.clone()
    }

    /// Returns every connection priority request observed so far.
    #[must_use]
    pub fn requested_priorities(&self) -> Vec<(DeviceIdentifier, ConnectionPriority)> {
        self.inner.state.lock().priorities.clone()
    }

    #[must_use]
    pub fn scan_active(&self) -> bool {
        self.inner.state.lock().scan.is_some()
    }

    #[must_use]
    pub fn is_connected(&self, device_id: &DeviceIdentifier) -> bool {
        self.inner.state.lock().connected.contains(device_id)
    }

    #[must_use]
    pub fn is_notifying(&self, device_id: &DeviceIdentifier, address: &CharacteristicAddress) -> bool {
        self.inner
            .state
            .lock()
            .notifying
            .contains(&(device_id.clone(), *address))
    }

    async fn answer(&self, call: FakeCall) -> Result<(), PlatformError> {
        let latency = self
            .inner
            .state
            .lock()
            .latency
            .get(&call)
            .copied()
            .unwrap_or_default();
        match latency {
            FakeLatency::Immediate => {}
            FakeLatency::After(delay) => sleep(delay).await,
            FakeLatency::Never => std::future::pending::<()>().await,
        }

        match self.inner.state.lock().failures.get(&call) {
            Some(reason) => Err(PlatformError::rejected(reason.clone())),
            None => Ok(()),
        }
    }

    fn play_notifications(&self, device_id: DeviceIdentifier, address: CharacteristicAddress) {
        let platform = self.clone();
        tokio::spawn(async move {
            for payload in &platform.inner.notifications {
                sleep(FAKE_NOTIFICATION_INTERVAL).await;
                if !platform.emit_value(&device_id, &address, payload.clone()) {
                    break;
                }
            }
        });
    }

    fn require_adapter(&self) -> Result<(), PlatformError> {
        match self.inner.state.lock().adapter {
            FakeAdapter::Powered | FakeAdapter::Off => Ok(()),
            FakeAdapter::Unavailable | FakeAdapter::Unsupported => Err(PlatformError::NoAdapters),
        }
    }

    fn require_connected(&self, device_id: &DeviceIdentifier) -> Result<(), PlatformError> {
        if self.inner.state.lock().connected.contains(device_id) {
            Ok(())
        } else {
            Err(PlatformError::rejected(format!("{device_id} is not connected")))
        }
    }

    fn characteristic(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
    ) -> Result<&CharacteristicInfo, PlatformError> {
        self.inner
            .services
            .iter()
            .find(|service| service.uuid() == address.service())
            .and_then(|service| service.characteristic(address.characteristic()))
            .ok_or_else(|| PlatformError::MissingAttribute {
                device_id: device_id.to_string(),
                uuid: address.characteristic().to_string(),
            })
    }

    fn descriptor(
        &self,
        device_id: &DeviceIdentifier,
        address: &DescriptorAddress,
    ) -> Result<(), PlatformError> {
        let characteristic = self.characteristic(device_id, &address.characteristic())?;
        if characteristic
            .descriptors()
            .iter()
            .any(|descriptor| descriptor.uuid() == address.descriptor())
        {
            Ok(())
        } else {
            Err(PlatformError::MissingAttribute {
                device_id: device_id.to_string(),
                uuid: address.descriptor().to_string(),
            })
        }
    }

    fn fixture_rssi(&self, device_id: &DeviceIdentifier) -> i16 {
        self.inner
            .fixture
            .iter()
            .find(|result| result.device().device_id() == device_id)
            .and_then(ScanResult::rssi)
            .unwrap_or(FAKE_DEFAULT_RSSI)
    }
}

#[async_trait]
impl BlePlatform for FakePlatform {
    async fn probe(&self) -> AdapterProbe {
        match self.inner.state.lock().adapter {
            FakeAdapter::Powered => AdapterProbe::Present { powered: true },
            FakeAdapter::Off => AdapterProbe::Present { powered: false },
            FakeAdapter::Unavailable => AdapterProbe::Unavailable,
            FakeAdapter::Unsupported => AdapterProbe::Unsupported,
        }
    }

    async fn is_powered(&self) -> Result<bool, PlatformError> {
        self.require_adapter()?;
        Ok(self.inner.state.lock().adapter == FakeAdapter::Powered)
    }

    async fn set_powered(&self, powered: bool) -> Result<bool, PlatformError> {
        self.require_adapter()?;
        self.answer(FakeCall::SetPowered).await?;
        self.set_adapter(if powered {
            FakeAdapter::Powered
        } else {
            FakeAdapter::Off
        });
        Ok(true)
    }

    fn events(&self) -> mpsc::UnboundedReceiver<PlatformEvent> {
        self.inner.events.subscribe()
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self, filter: ScanFilter) -> Result<ScanStream, PlatformError> {
        self.require_adapter()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let fixture: Vec<ScanResult> = self
            .inner
            .fixture
            .iter()
            .filter(|result| filter.matches(result))
            .cloned()
            .collect();
        self.inner.state.lock().scan = Some(ActiveScan {
            filter,
            sender: sender.clone(),
        });

        let discovery_delay = self.inner.discovery_delay;
        tokio::spawn(async move {
            if !discovery_delay.is_zero() {
                sleep(discovery_delay).await;
            }
            for result in fixture {
                if sender.send(result).is_err() {
                    break;
                }
            }
        });

        info!("fake scan started");
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        if self.inner.state.lock().reject_stop_scan {
            return Err(PlatformError::rejected("stopScan rejected by platform"));
        }
        self.answer(FakeCall::StopScan).await?;
        self.inner.state.lock().scan = None;
        debug!("fake scan stopped");
        Ok(())
    }

    async fn connected_devices(&self) -> Result<Vec<DeviceIdentifier>, PlatformError> {
        self.require_adapter()?;
        let mut devices: Vec<_> = self.inner.state.lock().connected.iter().cloned().collect();
        devices.sort();
        Ok(devices)
    }

    async fn connect(&self, device_id: &DeviceIdentifier) -> Result<LinkInfo, PlatformError> {
        self.answer(FakeCall::Connect).await?;
        let mut state = self.inner.state.lock();
        if !state.known.contains(device_id) {
            return Err(PlatformError::UnknownDevice {
                device_id: device_id.to_string(),
            });
        }
        state.connected.insert(device_id.clone());
        Ok(LinkInfo::new(FAKE_MTU))
    }

    async fn disconnect(&self, device_id: &DeviceIdentifier) -> Result<(), PlatformError> {
        self.answer(FakeCall::Disconnect).await?;
        let mut state = self.inner.state.lock();
        state.connected.remove(device_id);
        state.notifying.retain(|(id, _)| id != device_id);
        Ok(())
    }

    async fn create_bond(&self, device_id: &DeviceIdentifier) -> Result<(), PlatformError> {
        self.answer(FakeCall::CreateBond).await?;
        self.inner.state.lock().bonded.insert(device_id.clone());
        Ok(())
    }

    async fn is_bonded(&self, device_id: &DeviceIdentifier) -> Result<bool, PlatformError> {
        Ok(self.inner.state.lock().bonded.contains(device_id))
    }

    async fn discover_services(
        &self,
        device_id: &DeviceIdentifier,
    ) -> Result<Vec<ServiceInfo>, PlatformError> {
        self.answer(FakeCall::DiscoverServices).await?;
        self.require_connected(device_id)?;
        Ok(self.inner.services.clone())
    }

    async fn read(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
    ) -> Result<Vec<u8>, PlatformError> {
        self.answer(FakeCall::Read).await?;
        self.require_connected(device_id)?;
        self.characteristic(device_id, address)?;
        let stored = self
            .inner
            .state
            .lock()
            .values
            .get(&(device_id.clone(), *address))
            .cloned();
        Ok(stored.unwrap_or_else(|| default_value(address.characteristic())))
    }

    async fn write(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), PlatformError> {
        self.answer(FakeCall::Write).await?;
        self.require_connected(device_id)?;
        self.characteristic(device_id, address)?;
        let mut state = self.inner.state.lock();
        state
            .values
            .insert((device_id.clone(), *address), value.to_vec());
        state.writes.push(FakeWrite {
            device_id: device_id.clone(),
            address: *address,
            value: value.to_vec(),
            mode,
        });
        Ok(())
    }

    async fn read_descriptor(
        &self,
        device_id: &DeviceIdentifier,
        address: &DescriptorAddress,
    ) -> Result<Vec<u8>, PlatformError> {
        self.answer(FakeCall::ReadDescriptor).await?;
        self.require_connected(device_id)?;
        self.descriptor(device_id, address)?;
        let state = self.inner.state.lock();
        if let Some(value) = state.descriptor_values.get(&(device_id.clone(), *address)) {
            return Ok(value.clone());
        }
        if address.descriptor() == CLIENT_CHARACTERISTIC_CONFIGURATION {
            let notifying = state
                .notifying
                .contains(&(device_id.clone(), address.characteristic()));
            return Ok(vec![u8::from(notifying), 0x00]);
        }
        Ok(Vec::new())
    }

    async fn write_descriptor(
        &self,
        device_id: &DeviceIdentifier,
        address: &DescriptorAddress,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        self.answer(FakeCall::WriteDescriptor).await?;
        self.require_connected(device_id)?;
        self.descriptor(device_id, address)?;
        self.inner
            .state
            .lock()
            .descriptor_values
            .insert((device_id.clone(), *address), value.to_vec());
        Ok(())
    }

    async fn set_notify(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
        enabled: bool,
    ) -> Result<(), PlatformError> {
        self.answer(FakeCall::SetNotify).await?;
        self.require_connected(device_id)?;
        self.characteristic(device_id, address)?;
        {
            let mut state = self.inner.state.lock();
            let key = (device_id.clone(), *address);
            if enabled {
                state.notifying.insert(key);
            } else {
                state.notifying.remove(&key);
            }
        }
        if enabled && !self.inner.notifications.is_empty() {
            self.play_notifications(device_id.clone(), *address);
        }
        Ok(())
    }

    async fn read_rssi(&self, device_id: &DeviceIdentifier) -> Result<i16, PlatformError> {
        self.answer(FakeCall::ReadRssi).await?;
        self.require_connected(device_id)?;
        Ok(self.fixture_rssi(device_id))
    }

    async fn request_connection_priority(
        &self,
        device_id: &DeviceIdentifier,
        priority: ConnectionPriority,
    ) -> Result<(), PlatformError> {
        self.answer(FakeCall::RequestConnectionPriority).await?;
        self.require_connected(device_id)?;
        self.inner
            .state
            .lock()
            .priorities
            .push((device_id.clone(), priority));
        Ok(())
    }
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<ScanResult>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(parse_scan_record)
        .collect::<Result<Vec<_>, _>>()
}

fn parse_scan_record(raw_record: &str) -> Result<ScanResult, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    if !matches!(fields.len(), 3 | 4) {
        return Err(FixtureError::InvalidRecordFieldCount);
    }
    if fields.iter().any(|field| field.is_empty()) {
        return Err(FixtureError::EmptyRecordField);
    }

    let device_id = DeviceIdentifier::parse(fields[0]).map_err(FixtureError::InvalidIdentifier)?;
    let name = (fields[1] != "-").then(|| fields[1].to_string());
    let rssi = if fields[2] == "-" {
        None
    } else {
        Some(fields[2].parse::<i16>()?)
    };
    let uuids = match fields.get(3) {
        Some(raw_services) => raw_services
            .split(',')
            .map(|raw| {
                protocol::parse_uuid(raw).ok_or_else(|| FixtureError::InvalidServiceUuid {
                    value: raw.trim().to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    Ok(ScanResult::new(FoundDevice::new(device_id, name, uuids), rssi))
}

fn short_uuid(value: u16) -> Uuid {
    protocol::parse_uuid(&format!("{value:04x}")).unwrap_or(Uuid::nil())
}

fn nus_uuid(value: u128) -> Uuid {
    Uuid::from_u128(0x6e40_0000_b5a3_f393_e0a9_e50e_24dc_ca9e | (value << 96))
}

fn default_services() -> Vec<ServiceInfo> {
    let cccd = || vec![DescriptorInfo::new(CLIENT_CHARACTERISTIC_CONFIGURATION)];
    vec![
        ServiceInfo::new(
            short_uuid(0x180d),
            true,
            vec![
                CharacteristicInfo::new(
                    short_uuid(0x2a37),
                    CharacteristicProperties {
                        notify: true,
                        ..CharacteristicProperties::default()
                    },
                    cccd(),
                ),
                CharacteristicInfo::new(
                    short_uuid(0x2a38),
                    CharacteristicProperties {
                        read: true,
                        ..CharacteristicProperties::default()
                    },
                    Vec::new(),
                ),
            ],
        ),
        ServiceInfo::new(
            nus_uuid(1),
            true,
            vec![
                CharacteristicInfo::new(
                    nus_uuid(2),
                    CharacteristicProperties {
                        write: true,
                        write_without_response: true,
                        ..CharacteristicProperties::default()
                    },
                    Vec::new(),
                ),
                CharacteristicInfo::new(
                    nus_uuid(3),
                    CharacteristicProperties {
                        notify: true,
                        ..CharacteristicProperties::default()
                    },
                    cccd(),
                ),
            ],
        ),
    ]
}

fn default_value(characteristic: Uuid) -> Vec<u8> {
    if characteristic == short_uuid(0x2a38) {
        vec![0x01]
    } else {
        Vec::new()
    }
}
