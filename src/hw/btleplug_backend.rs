use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Descriptor,
    Manager as _, Peripheral as _, PeripheralProperties, ScanFilter as BtleScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use parking_lot::Mutex;
use tokio::sync::{OnceCell, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use super::model::{
    CharacteristicInfo, CharacteristicProperties, DescriptorInfo, FoundDevice, ScanFilter,
    ScanResult, ServiceInfo,
};
use super::platform::{AdapterProbe, BlePlatform, EventHub, LinkInfo, PlatformEvent, ScanStream};
use crate::error::PlatformError;
use crate::protocol::{
    CharacteristicAddress, ConnectionPriority, DescriptorAddress, DeviceIdentifier, WriteMode,
};

/// Platform backed by `btleplug`, using the first adapter the manager reports.
#[derive(Debug, Clone)]
pub struct BtleplugPlatform {
    inner: Arc<BtleplugInner>,
}

#[derive(Debug)]
struct BtleplugInner {
    adapter: OnceCell<Adapter>,
    events: EventHub,
    peripherals: Mutex<HashMap<DeviceIdentifier, Peripheral>>,
    subscriptions: Mutex<HashMap<DeviceIdentifier, HashSet<CharacteristicAddress>>>,
    notification_pumps: Mutex<HashMap<DeviceIdentifier, CancellationToken>>,
    scan: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl Drop for BtleplugInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Default for BtleplugPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl BtleplugPlatform {
    /// Creates the real BLE backend. The adapter is acquired on first use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BtleplugInner {
                adapter: OnceCell::new(),
                events: EventHub::default(),
                peripherals: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(HashMap::new()),
                notification_pumps: Mutex::new(HashMap::new()),
                scan: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapter(&self) -> Result<&Adapter, PlatformError> {
        self.inner
            .adapter
            .get_or_try_init(|| async move {
                let manager = Manager::new().await?;
                let adapter = manager
                    .adapters()
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(PlatformError::NoAdapters)?;
                let info = adapter.adapter_info().await?;
                info!(adapter = %info, "acquired BLE adapter");
                spawn_central_event_pump(&adapter, &self.inner).await?;
                Ok::<_, PlatformError>(adapter)
            })
            .await
    }

    async fn peripheral(&self, device_id: &DeviceIdentifier) -> Result<Peripheral, PlatformError> {
        if let Some(peripheral) = self.inner.peripherals.lock().get(device_id) {
            return Ok(peripheral.clone());
        }

        let adapter = self.adapter().await?;
        for peripheral in adapter.peripherals().await? {
            if identifier_for(&peripheral).as_ref() == Some(device_id) {
                self.inner
                    .peripherals
                    .lock()
                    .insert(device_id.clone(), peripheral.clone());
                return Ok(peripheral);
            }
        }

        Err(PlatformError::UnknownDevice {
            device_id: device_id.to_string(),
        })
    }

    async fn characteristic(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
    ) -> Result<(Peripheral, Characteristic), PlatformError> {
        let peripheral = self.peripheral(device_id).await?;
        let characteristic = find_characteristic(&peripheral, address).ok_or_else(|| {
            PlatformError::MissingAttribute {
                device_id: device_id.to_string(),
                uuid: address.characteristic().to_string(),
            }
        })?;
        Ok((peripheral, characteristic))
    }

    async fn descriptor(
        &self,
        device_id: &DeviceIdentifier,
        address: &DescriptorAddress,
    ) -> Result<(Peripheral, Descriptor), PlatformError> {
        let (peripheral, characteristic) =
            self.characteristic(device_id, &address.characteristic()).await?;
        let descriptor = characteristic
            .descriptors
            .iter()
            .find(|descriptor| descriptor.uuid == address.descriptor())
            .cloned()
            .ok_or_else(|| PlatformError::MissingAttribute {
                device_id: device_id.to_string(),
                uuid: address.descriptor().to_string(),
            })?;
        Ok((peripheral, descriptor))
    }

    async fn ensure_notification_pump(
        &self,
        device_id: &DeviceIdentifier,
        peripheral: &Peripheral,
    ) -> Result<(), PlatformError> {
        if self.inner.notification_pumps.lock().contains_key(device_id) {
            return Ok(());
        }

        let mut notifications = peripheral.notifications().await?;
        let token = self.inner.shutdown.child_token();
        self.inner
            .notification_pumps
            .lock()
            .insert(device_id.clone(), token.clone());

        let inner = Arc::downgrade(&self.inner);
        let device_id = device_id.clone();
        let peripheral = peripheral.clone();
        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    () = token.cancelled() => break,
                    next = notifications.next() => match next {
                        Some(notification) => notification,
                        None => break,
                    },
                };
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let Some(address) =
                    subscribed_address(&inner, &device_id, &peripheral, notification.uuid)
                else {
                    trace!(uuid = %notification.uuid, "ignoring unsubscribed notification");
                    continue;
                };
                inner.events.publish(PlatformEvent::ValueChanged {
                    device_id: device_id.clone(),
                    address,
                    value: notification.value,
                });
            }
            debug!(%device_id, "notification pump stopped");
        });
        Ok(())
    }

    fn forget_device(&self, device_id: &DeviceIdentifier) {
        if let Some(token) = self.inner.notification_pumps.lock().remove(device_id) {
            token.cancel();
        }
        self.inner.subscriptions.lock().remove(device_id);
    }
}

#[async_trait]
impl BlePlatform for BtleplugPlatform {
    async fn probe(&self) -> AdapterProbe {
        match self.adapter().await {
            Ok(adapter) => {
                let powered = adapter
                    .adapter_state()
                    .await
                    .map_or(true, |state| matches!(state, CentralState::PoweredOn));
                AdapterProbe::Present { powered }
            }
            Err(PlatformError::NoAdapters) => AdapterProbe::Unavailable,
            Err(error) => {
                debug!(?error, "BLE manager could not be created");
                AdapterProbe::Unsupported
            }
        }
    }

    async fn is_powered(&self) -> Result<bool, PlatformError> {
        let state = self.adapter().await?.adapter_state().await?;
        Ok(matches!(state, CentralState::PoweredOn))
    }

    async fn set_powered(&self, _powered: bool) -> Result<bool, PlatformError> {
        Err(PlatformError::Unsupported {
            operation: "adapter power control",
        })
    }

    fn events(&self) -> mpsc::UnboundedReceiver<PlatformEvent> {
        self.inner.events.subscribe()
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self, filter: ScanFilter) -> Result<ScanStream, PlatformError> {
        let adapter = self.adapter().await?.clone();
        let mut central_events = adapter.events().await?;
        adapter
            .start_scan(BtleScanFilter {
                services: filter.services().to_vec(),
            })
            .await?;

        let token = self.inner.shutdown.child_token();
        if let Some(previous) = self.inner.scan.lock().replace(token.clone()) {
            previous.cancel();
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = token.cancelled() => break,
                    next = central_events.next() => match next {
                        Some(event) => event,
                        None => break,
                    },
                };
                let (CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) = event
                else {
                    continue;
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                let Some(device_id) = identifier_for(&peripheral) else {
                    continue;
                };
                if let Some(inner) = inner.upgrade() {
                    inner
                        .peripherals
                        .lock()
                        .insert(device_id.clone(), peripheral.clone());
                }
                let result = scan_result_from_properties(device_id, properties);
                if filter.matches(&result) && sender.send(result).is_err() {
                    break;
                }
            }
            trace!("scan event pump stopped");
        });

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        if let Some(token) = self.inner.scan.lock().take() {
            token.cancel();
        }
        self.adapter().await?.stop_scan().await?;
        Ok(())
    }

    async fn connected_devices(&self) -> Result<Vec<DeviceIdentifier>, PlatformError> {
        let adapter = self.adapter().await?;
        let mut connected = Vec::new();
        for peripheral in adapter.peripherals().await? {
            if peripheral.is_connected().await?
                && let Some(device_id) = identifier_for(&peripheral)
            {
                connected.push(device_id);
            }
        }
        connected.sort();
        Ok(connected)
    }

    #[instrument(skip(self), level = "debug", fields(%device_id))]
    async fn connect(&self, device_id: &DeviceIdentifier) -> Result<LinkInfo, PlatformError> {
        let peripheral = self.peripheral(device_id).await?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        Ok(LinkInfo::new(LinkInfo::DEFAULT_MTU))
    }

    #[instrument(skip(self), level = "debug", fields(%device_id))]
    async fn disconnect(&self, device_id: &DeviceIdentifier) -> Result<(), PlatformError> {
        let peripheral = self.peripheral(device_id).await?;
        self.forget_device(device_id);
        if peripheral.is_connected().await? {
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn create_bond(&self, _device_id: &DeviceIdentifier) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported {
            operation: "bonding",
        })
    }

    async fn is_bonded(&self, _device_id: &DeviceIdentifier) -> Result<bool, PlatformError> {
        Err(PlatformError::Unsupported {
            operation: "bond state query",
        })
    }

    #[instrument(skip(self), level = "debug", fields(%device_id))]
    async fn discover_services(
        &self,
        device_id: &DeviceIdentifier,
    ) -> Result<Vec<ServiceInfo>, PlatformError> {
        let peripheral = self.peripheral(device_id).await?;
        peripheral.discover_services().await?;
        Ok(collect_services(&peripheral))
    }

    #[instrument(skip(self), level = "trace", fields(%device_id, %address))]
    async fn read(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
    ) -> Result<Vec<u8>, PlatformError> {
        let (peripheral, characteristic) = self.characteristic(device_id, address).await?;
        Ok(peripheral.read(&characteristic).await?)
    }

    #[instrument(skip(self, value), level = "trace", fields(%device_id, %address, ?mode, value_len = value.len()))]
    async fn write(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), PlatformError> {
        let (peripheral, characteristic) = self.characteristic(device_id, address).await?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        peripheral.write(&characteristic, value, write_type).await?;
        Ok(())
    }

    async fn read_descriptor(
        &self,
        device_id: &DeviceIdentifier,
        address: &DescriptorAddress,
    ) -> Result<Vec<u8>, PlatformError> {
        let (peripheral, descriptor) = self.descriptor(device_id, address).await?;
        Ok(peripheral.read_descriptor(&descriptor).await?)
    }

    async fn write_descriptor(
        &self,
        device_id: &DeviceIdentifier,
        address: &DescriptorAddress,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        let (peripheral, descriptor) = self.descriptor(device_id, address).await?;
        peripheral.write_descriptor(&descriptor, value).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%device_id, %address))]
    async fn set_notify(
        &self,
        device_id: &DeviceIdentifier,
        address: &CharacteristicAddress,
        enabled: bool,
    ) -> Result<(), PlatformError> {
        let (peripheral, characteristic) = self.characteristic(device_id, address).await?;
        if enabled {
            self.ensure_notification_pump(device_id, &peripheral).await?;
            peripheral.subscribe(&characteristic).await?;
            self.inner
                .subscriptions
                .lock()
                .entry(device_id.clone())
                .or_default()
                .insert(*address);
        } else {
            if let Some(addresses) = self.inner.subscriptions.lock().get_mut(device_id) {
                addresses.remove(address);
            }
            peripheral.unsubscribe(&characteristic).await?;
        }
        Ok(())
    }

    async fn read_rssi(&self, device_id: &DeviceIdentifier) -> Result<i16, PlatformError> {
        let peripheral = self.peripheral(device_id).await?;
        peripheral
            .properties()
            .await?
            .and_then(|properties| properties.rssi)
            .ok_or(PlatformError::Unsupported {
                operation: "RSSI read without a recent advertisement",
            })
    }

    async fn request_connection_priority(
        &self,
        _device_id: &DeviceIdentifier,
        _priority: ConnectionPriority,
    ) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported {
            operation: "connection priority",
        })
    }
}

async fn spawn_central_event_pump(
    adapter: &Adapter,
    inner: &Arc<BtleplugInner>,
) -> Result<(), PlatformError> {
    let mut central_events = adapter.events().await?;
    let adapter = adapter.clone();
    let token = inner.shutdown.child_token();
    let inner = Arc::downgrade(inner);

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = token.cancelled() => break,
                next = central_events.next() => match next {
                    Some(event) => event,
                    None => break,
                },
            };
            let Some(inner) = inner.upgrade() else {
                break;
            };
            match event {
                CentralEvent::DeviceDisconnected(id) => {
                    let Ok(peripheral) = adapter.peripheral(&id).await else {
                        continue;
                    };
                    let Some(device_id) = identifier_for(&peripheral) else {
                        continue;
                    };
                    if let Some(pump) = inner.notification_pumps.lock().remove(&device_id) {
                        pump.cancel();
                    }
                    info!(%device_id, "peripheral disconnected");
                    inner.events.publish(PlatformEvent::LinkLost { device_id });
                }
                CentralEvent::StateUpdate(state) => {
                    let powered = matches!(state, CentralState::PoweredOn);
                    info!(powered, "adapter state changed");
                    inner.events.publish(PlatformEvent::AdapterPowered(powered));
                }
                _ => {}
            }
        }
        debug!("central event pump stopped");
    });
    Ok(())
}

fn subscribed_address(
    inner: &BtleplugInner,
    device_id: &DeviceIdentifier,
    peripheral: &Peripheral,
    characteristic_uuid: uuid::Uuid,
) -> Option<CharacteristicAddress> {
    let subscriptions = inner.subscriptions.lock();
    let addresses = subscriptions.get(device_id)?;
    peripheral
        .characteristics()
        .into_iter()
        .filter(|characteristic| characteristic.uuid == characteristic_uuid)
        .map(|characteristic| {
            CharacteristicAddress::new(characteristic.service_uuid, characteristic.uuid)
        })
        .find(|address| addresses.contains(address))
}

fn identifier_for(peripheral: &Peripheral) -> Option<DeviceIdentifier> {
    let address = peripheral.address();
    let raw = if address == BDAddr::default() {
        peripheral.id().to_string()
    } else {
        address.to_string()
    };
    DeviceIdentifier::parse(&raw).ok()
}

fn find_characteristic(
    peripheral: &Peripheral,
    address: &CharacteristicAddress,
) -> Option<Characteristic> {
    peripheral.characteristics().into_iter().find(|characteristic| {
        characteristic.service_uuid == address.service()
            && characteristic.uuid == address.characteristic()
    })
}

fn scan_result_from_properties(
    device_id: DeviceIdentifier,
    properties: PeripheralProperties,
) -> ScanResult {
    let PeripheralProperties {
        local_name,
        tx_power_level,
        rssi,
        manufacturer_data,
        service_data,
        services,
        ..
    } = properties;
    ScanResult::new(FoundDevice::new(device_id, local_name, services), rssi)
        .with_tx_power(tx_power_level)
        .with_manufacturer_data(manufacturer_data.into_iter().collect::<BTreeMap<_, _>>())
        .with_service_data(service_data.into_iter().collect::<BTreeMap<_, _>>())
}

fn collect_services(peripheral: &Peripheral) -> Vec<ServiceInfo> {
    peripheral
        .services()
        .into_iter()
        .map(|service| {
            let characteristics = service
                .characteristics
                .iter()
                .map(|characteristic| {
                    CharacteristicInfo::new(
                        characteristic.uuid,
                        properties_from_flags(characteristic.properties),
                        characteristic
                            .descriptors
                            .iter()
                            .map(|descriptor| DescriptorInfo::new(descriptor.uuid))
                            .collect(),
                    )
                })
                .collect();
            ServiceInfo::new(service.uuid, service.primary, characteristics)
        })
        .collect()
}

fn properties_from_flags(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        broadcast: flags.contains(CharPropFlags::BROADCAST),
        read: flags.contains(CharPropFlags::READ),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        write: flags.contains(CharPropFlags::WRITE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
        authenticated_signed_writes: flags.contains(CharPropFlags::AUTHENTICATED_SIGNED_WRITES),
        extended_properties: flags.contains(CharPropFlags::EXTENDED_PROPERTIES),
    }
}
