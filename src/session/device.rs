use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strum_macros::Display;
use tokio::sync::oneshot;
use tracing::{debug, error, instrument, trace, warn};

use super::operation::{Completion, Operation, OperationKind, OperationValue};
use crate::context::{CallbackContext, Notification};
use crate::error::{BleError, PlatformError};
use crate::hw::{BlePlatform, ServiceInfo};
use crate::notification::NotificationLog;
use crate::protocol::{CharacteristicAddress, DeviceIdentifier, notification_key};

type Outcome = Result<OperationValue, BleError>;

/// Connection state of one device session.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Point-in-time view of a device session.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SessionSnapshot {
    pub link: LinkState,
    pub bonding: bool,
    pub pending: Option<OperationKind>,
    pub mtu: Option<u16>,
    pub subscriptions: usize,
}

struct PendingOperation {
    id: u64,
    kind: OperationKind,
    link_before: LinkState,
    subscriber: Option<Arc<CallbackContext>>,
    sender: oneshot::Sender<Outcome>,
}

struct SessionState {
    link: LinkState,
    bonding: bool,
    pending: Option<PendingOperation>,
    next_operation_id: u64,
    services: Option<Vec<ServiceInfo>>,
    mtu: Option<u16>,
    subscriptions: HashMap<CharacteristicAddress, Arc<CallbackContext>>,
    disconnect_listener: Option<Arc<CallbackContext>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            link: LinkState::Disconnected,
            bonding: false,
            pending: None,
            next_operation_id: 0,
            services: None,
            mtu: None,
            subscriptions: HashMap::new(),
            disconnect_listener: None,
        }
    }

    fn drop_link(&mut self) {
        self.link = LinkState::Disconnected;
        self.bonding = false;
        self.services = None;
        self.mtu = None;
        self.subscriptions.clear();
    }

    fn apply(
        &mut self,
        kind: OperationKind,
        completion: Completion,
        subscriber: Option<Arc<CallbackContext>>,
        operation_address: Option<CharacteristicAddress>,
    ) -> OperationValue {
        if kind == OperationKind::CreateBond {
            self.bonding = false;
        }
        match (kind, completion) {
            (OperationKind::Disconnect, _) => {
                self.drop_link();
                OperationValue::None
            }
            (_, Completion::Link(info)) => {
                self.link = LinkState::Connected;
                self.mtu = Some(info.mtu());
                OperationValue::None
            }
            (_, Completion::Services(services)) => {
                self.services = Some(services);
                OperationValue::None
            }
            (_, Completion::Bytes(value)) => OperationValue::Bytes(value),
            (_, Completion::Rssi(rssi)) => OperationValue::Rssi(rssi),
            (OperationKind::SetNotificationState, Completion::Done) => {
                if let Some(address) = operation_address {
                    match subscriber {
                        Some(ctx) => {
                            self.subscriptions.insert(address, ctx);
                        }
                        None => {
                            self.subscriptions.remove(&address);
                        }
                    }
                }
                OperationValue::None
            }
            (_, Completion::Done) => OperationValue::None,
        }
    }
}

/// Serialized access to one remote device.
///
/// At most one operation is pending at a time. Connect and disconnect
/// preempt a pending operation of a different kind; everything else is
/// refused while the session is busy.
pub struct DeviceSession {
    device_id: DeviceIdentifier,
    platform: Arc<dyn BlePlatform>,
    log: Arc<NotificationLog>,
    state: Mutex<SessionState>,
}

/// An admitted operation awaiting its single outcome.
pub(crate) struct OperationHandle {
    session: Arc<DeviceSession>,
    id: u64,
    kind: OperationKind,
    timeout: Duration,
    receiver: oneshot::Receiver<Outcome>,
}

impl OperationHandle {
    pub(crate) fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Waits for the platform answer or the deadline, whichever comes first.
    pub(crate) async fn outcome(mut self) -> Outcome {
        tokio::select! {
            biased;
            received = &mut self.receiver => self.session.received(received),
            () = tokio::time::sleep(self.timeout) => {
                if self.session.expire(self.id) {
                    Err(BleError::Timeout {
                        operation: self.kind,
                        timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    })
                } else {
                    // The platform answered while the deadline fired.
                    let received = (&mut self.receiver).await;
                    self.session.received(received)
                }
            }
        }
    }
}

impl DeviceSession {
    pub(crate) fn new(
        device_id: DeviceIdentifier,
        platform: Arc<dyn BlePlatform>,
        log: Arc<NotificationLog>,
    ) -> Self {
        Self {
            device_id,
            platform,
            log,
            state: Mutex::new(SessionState::new()),
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &DeviceIdentifier {
        &self.device_id
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            link: state.link,
            bonding: state.bonding,
            pending: state.pending.as_ref().map(|pending| pending.kind),
            mtu: state.mtu,
            subscriptions: state.subscriptions.len(),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.lock().link == LinkState::Connected
    }

    pub(crate) fn services(&self) -> Option<Vec<ServiceInfo>> {
        self.state.lock().services.clone()
    }

    pub(crate) fn mtu(&self) -> Option<u16> {
        self.state.lock().mtu
    }

    pub(crate) fn is_subscribed(&self, address: &CharacteristicAddress) -> bool {
        self.state.lock().subscriptions.contains_key(address)
    }

    /// Admits an operation and hands it to the platform.
    ///
    /// Refusals are returned directly and never reach the platform.
    #[instrument(skip(self, ctx), level = "debug", fields(device_id = %self.device_id, kind = %operation.kind()))]
    pub(crate) fn submit(
        self: &Arc<Self>,
        operation: Operation,
        timeout: Duration,
        ctx: &Arc<CallbackContext>,
    ) -> Result<OperationHandle, BleError> {
        let kind = operation.kind();
        let (sender, receiver) = oneshot::channel();
        let id = {
            let mut state = self.state.lock();
            self.admit(&mut state, kind)?;

            let id = state.next_operation_id;
            state.next_operation_id += 1;

            let subscriber = match &operation {
                Operation::SetNotificationState { enabled: true, .. } => Some(Arc::clone(ctx)),
                _ => None,
            };
            state.pending = Some(PendingOperation {
                id,
                kind,
                link_before: state.link,
                subscriber,
                sender,
            });
            match kind {
                OperationKind::Connect => {
                    state.link = LinkState::Connecting;
                    if ctx.has_disconnect_handler() {
                        state.disconnect_listener = Some(Arc::clone(ctx));
                    }
                }
                OperationKind::CreateBond => state.bonding = true,
                _ => {}
            }
            id
        };

        let session = Arc::clone(self);
        tokio::spawn(async move {
            let address = operation_address(&operation);
            let result = session.execute(operation).await;
            session.complete(id, result, address);
        });

        Ok(OperationHandle {
            session: Arc::clone(self),
            id,
            kind,
            timeout,
            receiver,
        })
    }

    fn admit(&self, state: &mut SessionState, kind: OperationKind) -> Result<(), BleError> {
        if kind.requires_connection() && state.link != LinkState::Connected {
            return Err(BleError::NotConnected {
                device_id: self.device_id.to_string(),
            });
        }

        let Some(pending_kind) = state.pending.as_ref().map(|pending| pending.kind) else {
            return Ok(());
        };
        if !kind.preempts() || pending_kind == kind {
            return Err(BleError::SessionBusy {
                device_id: self.device_id.to_string(),
            });
        }

        if let Some(displaced) = state.pending.take() {
            debug!(displaced = %displaced.kind, by = %kind, "preempting pending operation");
            if displaced.kind == OperationKind::CreateBond {
                state.bonding = false;
            }
            let _ = displaced.sender.send(Err(BleError::Superseded {
                operation: displaced.kind,
                by: kind,
            }));
        }
        Ok(())
    }

    async fn execute(&self, operation: Operation) -> Result<Completion, PlatformError> {
        let platform = &self.platform;
        let device_id = &self.device_id;
        match operation {
            Operation::Connect => platform.connect(device_id).await.map(Completion::Link),
            Operation::CreateBond => platform.create_bond(device_id).await.map(|()| Completion::Done),
            Operation::Disconnect => platform.disconnect(device_id).await.map(|()| Completion::Done),
            Operation::DiscoverServices => platform
                .discover_services(device_id)
                .await
                .map(Completion::Services),
            Operation::ReadCharacteristic(address) => {
                platform.read(device_id, &address).await.map(Completion::Bytes)
            }
            Operation::WriteCharacteristic {
                address,
                value,
                mode,
            } => platform
                .write(device_id, &address, &value, mode)
                .await
                .map(|()| Completion::Done),
            Operation::ReadDescriptor(address) => platform
                .read_descriptor(device_id, &address)
                .await
                .map(Completion::Bytes),
            Operation::WriteDescriptor { address, value } => platform
                .write_descriptor(device_id, &address, &value)
                .await
                .map(|()| Completion::Done),
            Operation::SetNotificationState { address, enabled } => platform
                .set_notify(device_id, &address, enabled)
                .await
                .map(|()| Completion::Done),
            Operation::ReadRssi => platform.read_rssi(device_id).await.map(Completion::Rssi),
            Operation::RequestConnectionPriority(priority) => platform
                .request_connection_priority(device_id, priority)
                .await
                .map(|()| Completion::Done),
        }
    }

    fn complete(
        &self,
        id: u64,
        result: Result<Completion, PlatformError>,
        address: Option<CharacteristicAddress>,
    ) {
        let mut state = self.state.lock();
        let Some(pending) = state.pending.take_if(|pending| pending.id == id) else {
            trace!(device_id = %self.device_id, id, "discarding late platform completion");
            return;
        };

        let outcome = match result {
            Ok(completion) => Ok(state.apply(pending.kind, completion, pending.subscriber, address)),
            Err(error) => {
                debug!(device_id = %self.device_id, kind = %pending.kind, %error, "platform rejected operation");
                state.link = pending.link_before;
                if pending.kind == OperationKind::CreateBond {
                    state.bonding = false;
                }
                Err(error.into())
            }
        };
        let _ = pending.sender.send(outcome);
    }

    /// Drops the pending operation if it is still `id`.
    ///
    /// Returns `false` when it already completed or was displaced.
    fn expire(&self, id: u64) -> bool {
        let expired = {
            let mut state = self.state.lock();
            let Some(pending) = state.pending.take_if(|pending| pending.id == id) else {
                return false;
            };
            match pending.kind {
                OperationKind::Connect => state.link = LinkState::Disconnected,
                OperationKind::CreateBond => {
                    state.link = pending.link_before;
                    state.bonding = false;
                }
                _ => state.link = pending.link_before,
            }
            pending.kind
        };

        warn!(device_id = %self.device_id, kind = %expired, "operation deadline elapsed");
        if expired == OperationKind::Connect {
            // Abandon the half-open link so the radio does not keep trying.
            let platform = Arc::clone(&self.platform);
            let device_id = self.device_id.clone();
            tokio::spawn(async move {
                if let Err(error) = platform.disconnect(&device_id).await {
                    debug!(%device_id, %error, "cleanup after connect timeout failed");
                }
            });
        }
        true
    }

    fn received(&self, received: Result<Outcome, oneshot::error::RecvError>) -> Outcome {
        received.unwrap_or_else(|_| {
            Err(BleError::Disconnected {
                device_id: self.device_id.to_string(),
            })
        })
    }

    /// Handles an unrequested link drop.
    ///
    /// A pending disconnect or connect owns the transition, so the event is
    /// ignored while one is in flight.
    pub(crate) fn on_link_lost(&self) {
        let listener = {
            let mut state = self.state.lock();
            if state.link != LinkState::Connected {
                trace!(device_id = %self.device_id, link = %state.link, "ignoring link loss");
                return;
            }
            if let Some(pending) = &state.pending
                && pending.kind.preempts()
            {
                trace!(device_id = %self.device_id, kind = %pending.kind, "link loss owned by pending operation");
                return;
            }

            state.drop_link();
            if let Some(pending) = state.pending.take() {
                let _ = pending.sender.send(Err(BleError::Disconnected {
                    device_id: self.device_id.to_string(),
                }));
            }
            state.disconnect_listener.clone()
        };

        debug!(device_id = %self.device_id, "link lost");
        if let Some(listener) = listener {
            listener.disconnected(&self.device_id);
        }
    }

    /// Persists a value change and forwards it to the live subscriber.
    pub(crate) fn on_value_changed(&self, address: CharacteristicAddress, value: Vec<u8>) {
        let Some(subscriber) = self.state.lock().subscriptions.get(&address).cloned() else {
            trace!(device_id = %self.device_id, %address, "value change without subscription");
            return;
        };

        let key = notification_key(&self.device_id, &address);
        let timestamp_ms = match self.log.append(key.clone(), value.clone()) {
            Ok(record) => Some(record.timestamp_ms()),
            Err(error) => {
                error!(device_id = %self.device_id, %error, "failed to persist notification");
                None
            }
        };
        subscriber.notify(Notification::characteristic_value(key, value, timestamp_ms));
    }
}

fn operation_address(operation: &Operation) -> Option<CharacteristicAddress> {
    match operation {
        Operation::SetNotificationState { address, .. } => Some(*address),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hw::{FakeCall, FakeLatency, FakePlatform, FakePlatformConfig, ScanFixture};

    const DEVICE: &str = "AA:BB:CC:DD:EE:01";

    fn fixture() -> ScanFixture {
        format!("{DEVICE}|Pump-01|-50")
            .parse()
            .expect("fixture should parse")
    }

    fn session_with(platform: &FakePlatform) -> Arc<DeviceSession> {
        Arc::new(DeviceSession::new(
            DeviceIdentifier::parse(DEVICE).expect("device id should parse"),
            Arc::new(platform.clone()),
            Arc::new(NotificationLog::in_memory()),
        ))
    }

    fn heart_rate_measurement() -> CharacteristicAddress {
        CharacteristicAddress::parse("180d", "2a37").expect("address should parse")
    }

    async fn connect(session: &Arc<DeviceSession>) {
        let ctx = Arc::new(CallbackContext::new());
        let handle = session
            .submit(Operation::Connect, Duration::from_secs(1), &ctx)
            .expect("connect should be admitted");
        handle.outcome().await.expect("connect should succeed");
    }

    #[tokio::test(start_paused = true)]
    async fn operations_require_a_connection() {
        let platform = FakePlatform::new(FakePlatformConfig::builder().scan_fixture(fixture()).build());
        let session = session_with(&platform);
        let ctx = Arc::new(CallbackContext::new());

        let refused = session.submit(Operation::ReadRssi, Duration::from_secs(1), &ctx);

        assert_matches!(refused.err(), Some(BleError::NotConnected { .. }));
        assert_eq!(LinkState::Disconnected, session.snapshot().link);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_records_link_parameters() {
        let platform = FakePlatform::new(FakePlatformConfig::builder().scan_fixture(fixture()).build());
        let session = session_with(&platform);

        connect(&session).await;

        let snapshot = session.snapshot();
        assert_eq!(LinkState::Connected, snapshot.link);
        assert_eq!(Some(247), snapshot.mtu);
        assert_eq!(None, snapshot.pending);
    }

    #[tokio::test(start_paused = true)]
    async fn second_operation_is_refused_while_busy() {
        let platform = FakePlatform::new(FakePlatformConfig::builder().scan_fixture(fixture()).build());
        let session = session_with(&platform);
        connect(&session).await;
        platform.set_latency(FakeCall::ReadRssi, FakeLatency::Never);
        let ctx = Arc::new(CallbackContext::new());

        let _first = session
            .submit(Operation::ReadRssi, Duration::from_secs(5), &ctx)
            .expect("first read should be admitted");
        let second = session.submit(
            Operation::ReadCharacteristic(heart_rate_measurement()),
            Duration::from_secs(5),
            &ctx,
        );

        assert_matches!(second.err(), Some(BleError::SessionBusy { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_preempts_pending_operation() {
        let platform = FakePlatform::new(FakePlatformConfig::builder().scan_fixture(fixture()).build());
        let session = session_with(&platform);
        connect(&session).await;
        platform.set_latency(FakeCall::ReadRssi, FakeLatency::Never);
        let ctx = Arc::new(CallbackContext::new());

        let read = session
            .submit(Operation::ReadRssi, Duration::from_secs(5), &ctx)
            .expect("read should be admitted");
        let disconnect = session
            .submit(Operation::Disconnect, Duration::from_secs(5), &ctx)
            .expect("disconnect should preempt");

        assert_matches!(
            read.outcome().await,
            Err(BleError::Superseded {
                operation: OperationKind::ReadRssi,
                by: OperationKind::Disconnect,
            })
        );
        assert_eq!(Ok(OperationValue::None), disconnect.outcome().await);
        assert_eq!(LinkState::Disconnected, session.snapshot().link);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_connect_is_refused_while_connecting() {
        let platform = FakePlatform::new(FakePlatformConfig::builder().scan_fixture(fixture()).build());
        platform.set_latency(FakeCall::Connect, FakeLatency::Never);
        let session = session_with(&platform);
        let ctx = Arc::new(CallbackContext::new());

        let _first = session
            .submit(Operation::Connect, Duration::from_secs(5), &ctx)
            .expect("connect should be admitted");
        let second = session.submit(Operation::Connect, Duration::from_secs(5), &ctx);

        assert_matches!(second.err(), Some(BleError::SessionBusy { .. }));
        assert_eq!(LinkState::Connecting, session.snapshot().link);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fails_once_and_discards_late_answer() {
        let platform = FakePlatform::new(FakePlatformConfig::builder().scan_fixture(fixture()).build());
        let session = session_with(&platform);
        connect(&session).await;
        platform.set_latency(FakeCall::ReadRssi, FakeLatency::After(Duration::from_secs(3)));
        let ctx = Arc::new(CallbackContext::new());

        let handle = session
            .submit(Operation::ReadRssi, Duration::from_secs(1), &ctx)
            .expect("read should be admitted");

        assert_eq!(
            Err(BleError::Timeout {
                operation: OperationKind::ReadRssi,
                timeout_ms: 1_000,
            }),
            handle.outcome().await
        );
        tokio::time::sleep(Duration::from_secs(5)).await;
        let snapshot = session.snapshot();
        assert_eq!(None, snapshot.pending);
        assert_eq!(LinkState::Connected, snapshot.link);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_abandons_the_link() {
        let platform = FakePlatform::new(FakePlatformConfig::builder().scan_fixture(fixture()).build());
        platform.set_latency(FakeCall::Connect, FakeLatency::Never);
        let session = session_with(&platform);
        let ctx = Arc::new(CallbackContext::new());

        let handle = session
            .submit(Operation::Connect, Duration::from_millis(500), &ctx)
            .expect("connect should be admitted");

        assert_matches!(
            handle.outcome().await,
            Err(BleError::Timeout {
                operation: OperationKind::Connect,
                ..
            })
        );
        assert_eq!(LinkState::Disconnected, session.snapshot().link);
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_fails_pending_and_notifies_listener() {
        let platform = FakePlatform::new(FakePlatformConfig::builder().scan_fixture(fixture()).build());
        let session = session_with(&platform);
        let (ctx, mut events) = CallbackContext::recording();
        let ctx = Arc::new(ctx);
        session
            .submit(Operation::Connect, Duration::from_secs(1), &ctx)
            .expect("connect should be admitted")
            .outcome()
            .await
            .expect("connect should succeed");
        platform.set_latency(FakeCall::Write, FakeLatency::Never);

        let write = session
            .submit(
                Operation::WriteCharacteristic {
                    address: heart_rate_measurement(),
                    value: vec![0x01],
                    mode: crate::protocol::WriteMode::WithoutResponse,
                },
                Duration::from_secs(5),
                &ctx,
            )
            .expect("write should be admitted");
        session.on_link_lost();

        assert_matches!(write.outcome().await, Err(BleError::Disconnected { .. }));
        assert_matches!(
            events.recv().await,
            Some(crate::context::CallbackEvent::Disconnect(device_id)) if device_id.as_str() == DEVICE
        );
        assert_eq!(LinkState::Disconnected, session.snapshot().link);
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_during_disconnect_is_ignored() {
        let platform = FakePlatform::new(FakePlatformConfig::builder().scan_fixture(fixture()).build());
        let session = session_with(&platform);
        connect(&session).await;
        platform.set_latency(FakeCall::Disconnect, FakeLatency::After(Duration::from_millis(50)));
        let ctx = Arc::new(CallbackContext::new());

        let disconnect = session
            .submit(Operation::Disconnect, Duration::from_secs(1), &ctx)
            .expect("disconnect should be admitted");
        session.on_link_lost();

        assert_eq!(Some(OperationKind::Disconnect), session.snapshot().pending);
        assert_eq!(Ok(OperationValue::None), disconnect.outcome().await);
    }

    #[tokio::test(start_paused = true)]
    async fn value_changes_reach_subscriber_and_log() {
        let platform = FakePlatform::new(FakePlatformConfig::builder().scan_fixture(fixture()).build());
        let session = session_with(&platform);
        connect(&session).await;
        let (ctx, mut events) = CallbackContext::recording();
        let ctx = Arc::new(ctx);
        let address = heart_rate_measurement();

        session
            .submit(
                Operation::SetNotificationState {
                    address,
                    enabled: true,
                },
                Duration::from_secs(1),
                &ctx,
            )
            .expect("subscribe should be admitted")
            .outcome()
            .await
            .expect("subscribe should succeed");
        session.on_value_changed(address, vec![0x00, 0x48]);

        assert!(session.is_subscribed(&address));
        assert_eq!(1, session.log.len());
        assert_matches!(
            events.recv().await,
            Some(crate::context::CallbackEvent::Notify(notification))
                if notification.key() == format!("notification|{DEVICE}|{}|{}", address.service(), address.characteristic())
        );
    }
}
