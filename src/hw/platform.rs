use std::pin::Pin;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use super::model::{ScanFilter, ScanResult, ServiceInfo};
use crate::error::PlatformError;
use crate::protocol::{
    CharacteristicAddress, ConnectionPriority, DescriptorAddress, DeviceIdentifier, WriteMode,
};

/// Advertisement stream produced by an active platform scan.
pub type ScanStream = Pin<Box<dyn Stream<Item = ScanResult> + Send>>;

/// Result of probing for BLE support.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AdapterProbe {
    /// The platform has no BLE stack at all.
    Unsupported,
    /// BLE is supported but no adapter handle could be obtained.
    Unavailable,
    Present { powered: bool },
}

/// Link parameters reported once a connection is up.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LinkInfo {
    mtu: u16,
}

impl LinkInfo {
    /// Minimum ATT MTU, used when the platform does not report one.
    pub const DEFAULT_MTU: u16 = 23;

    #[must_use]
    pub fn new(mtu: u16) -> Self {
        Self { mtu }
    }

    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.mtu
    }
}

/// Events the platform raises outside of any caller-issued operation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PlatformEvent {
    AdapterPowered(bool),
    LinkLost {
        device_id: DeviceIdentifier,
    },
    ValueChanged {
        device_id: DeviceIdentifier,
        address: CharacteristicAddress,
        value: Vec<u8>,
    },
}

/// Lossless fan-out of platform events.
///
/// Each subscriber owns an unbounded queue, so a slow consumer delays events
/// but never loses them. Closed subscribers are pruned on publish.
#[derive(Debug, Default)]
pub(crate) struct EventHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PlatformEvent>>>,
}

impl EventHub {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<PlatformEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Returns whether at least one subscriber took the event.
    pub(crate) fn publish(&self, event: PlatformEvent) -> bool {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| !subscriber.is_closed());
        let mut delivered = false;
        for subscriber in subscribers.iter() {
            delivered |= subscriber.send(event.clone()).is_ok();
        }
        delivered
    }
}

/// The platform BLE stack, seen from the orchestrator.
///
/// Every call returns once the platform has answered; deadlines, admission and
/// result delivery are enforced by the caller.
#[async_trait]
pub trait BlePlatform: Send + Sync {
    /// Reports BLE support and whether an adapter is present.
    async fn probe(&self) -> AdapterProbe;

    async fn is_powered(&self) -> Result<bool, PlatformError>;

    /// Requests an adapter power change.
    async fn set_powered(&self, powered: bool) -> Result<bool, PlatformError>;

    /// Subscribes to platform-originated events.
    ///
    /// Every event raised after the call is delivered, in order.
    fn events(&self) -> mpsc::UnboundedReceiver<PlatformEvent>;

    async fn start_scan(&self, filter: ScanFilter) -> Result<ScanStream, PlatformError>;

    async fn stop_scan(&self) -> Result<(), PlatformError>;

    async fn connected_devices(&self) -> Result<Vec<DeviceIdentifier>, PlatformError>;

    async fn connect(&self, device_id: &DeviceIdentifier) -> Result<LinkInfo, PlatformError>;

    async fn disconnect(&self, device_id: &DeviceIdentifier) -> Result<(), PlatformError>;

    async fn create_bond(&self, device_id: &DeviceIdentifier) -> Result<(), PlatformError>;

    async fn is_bonded(&self, device_id: &DeviceIdentifier) -> Result<bool, PlatformError>;

    async fn discover_services(
        &self,
        device_id: &DeviceIdentifier,
    ) -> Result<Vec<ServiceInfo>, PlatformError>;

    async fn read(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
    ) -> Result<Vec<u8>, PlatformError>;

    async fn write(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), PlatformError>;

    async fn read_descriptor(
        &self,
        device_id: &DeviceIdentifier,
        address: &DescriptorAddress,
    ) -> Result<Vec<u8>, PlatformError>;

    async fn write_descriptor(
        &self,
        device_id: &DeviceIdentifier,
        address: &DescriptorAddress,
        value: &[u8],
    ) -> Result<(), PlatformError>;

    /// Enables or disables value-change events for a characteristic.
    async fn set_notify(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
        enabled: bool,
    ) -> Result<(), PlatformError>;

    async fn read_rssi(&self, device_id: &DeviceIdentifier) -> Result<i16, PlatformError>;

    async fn request_connection_priority(
        &self,
        device_id: &DeviceIdentifier,
        priority: ConnectionPriority,
    ) -> Result<(), PlatformError>;
}
