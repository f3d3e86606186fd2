use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use strum_macros::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::OrchestratorConfig;
use crate::context::{CallbackContext, Notification};
use crate::error::{BleError, LogError};
use crate::hw::{AdapterProbe, BlePlatform, FoundDevice, PlatformEvent, ServiceInfo};
use crate::notification::{NotificationLog, NotificationRecord};
use crate::protocol::{
    CharacteristicAddress, ConnectionPriority, DescriptorAddress, DeviceIdentifier, WriteMode,
};
use crate::session::{
    DeviceSession, Operation, OperationKind, OperationValue, ScanMode, ScanOptions, ScanSession,
    ScanState, SessionSnapshot,
};

/// Outcome of [`BleOrchestrator::initialize`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum InitStatus {
    #[strum(to_string = "Initialization Success!")]
    Ready,
    #[strum(to_string = "BLE not supported.")]
    AdapterUnsupported,
    #[strum(to_string = "BLE not available.")]
    AdapterUnavailable,
}

/// Power state of the shared adapter.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum AdapterState {
    Absent,
    Disabled,
    Enabled,
}

/// Single entry point for every BLE request.
///
/// Owns the adapter, the device session registry, the active scan and the
/// notification log. Cloning yields another handle to the same orchestrator.
///
/// Device requests taking a [`CallbackContext`] return as soon as the request
/// is admitted or refused. Awaiting them never waits for the platform; the
/// outcome is delivered to the context from a background task.
///
/// ```
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// use std::sync::Arc;
///
/// use blesession::{
///     BleOrchestrator, CallbackContext, FakePlatform, FakePlatformConfig, InitStatus,
///     NotificationLog, OrchestratorConfig,
/// };
///
/// let platform = FakePlatform::new(
///     FakePlatformConfig::builder()
///         .scan_fixture("AA:BB:CC:DD:EE:01|Pump-01|-48".parse()?)
///         .build(),
/// );
/// let orchestrator = BleOrchestrator::new(
///     Arc::new(platform),
///     NotificationLog::in_memory(),
///     OrchestratorConfig::default(),
/// );
/// assert_eq!(InitStatus::Ready, orchestrator.initialize().await);
///
/// let (ctx, mut events) = CallbackContext::recording();
/// orchestrator.connect("AA:BB:CC:DD:EE:01", None, ctx).await;
/// let _connected = events.recv().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BleOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    platform: Arc<dyn BlePlatform>,
    config: OrchestratorConfig,
    log: Arc<NotificationLog>,
    status: Mutex<Option<InitStatus>>,
    adapter: Mutex<AdapterState>,
    sessions: Mutex<HashMap<DeviceIdentifier, Arc<DeviceSession>>>,
    scan: tokio::sync::Mutex<Option<ScanSession>>,
    adapter_watcher: Mutex<Option<Arc<CallbackContext>>>,
    lifecycle: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BleOrchestrator {
    #[must_use]
    pub fn new(
        platform: Arc<dyn BlePlatform>,
        log: NotificationLog,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                platform,
                config,
                log: Arc::new(log),
                status: Mutex::new(None),
                adapter: Mutex::new(AdapterState::Absent),
                sessions: Mutex::new(HashMap::new()),
                scan: tokio::sync::Mutex::new(None),
                adapter_watcher: Mutex::new(None),
                lifecycle: CancellationToken::new(),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Checks BLE support on the platform and starts routing platform events.
    ///
    /// Missing BLE support and a missing adapter are reported separately.
    #[instrument(skip(self), level = "info")]
    pub async fn initialize(&self) -> InitStatus {
        let (status, adapter) = match self.inner.platform.probe().await {
            AdapterProbe::Unsupported => (InitStatus::AdapterUnsupported, AdapterState::Absent),
            AdapterProbe::Unavailable => (InitStatus::AdapterUnavailable, AdapterState::Absent),
            AdapterProbe::Present { powered } => (
                InitStatus::Ready,
                if powered {
                    AdapterState::Enabled
                } else {
                    AdapterState::Disabled
                },
            ),
        };
        *self.inner.status.lock() = Some(status);
        *self.inner.adapter.lock() = adapter;

        if status == InitStatus::Ready {
            self.start_dispatcher();
        }
        info!(%status, %adapter, "BLE initialised");
        status
    }

    fn start_dispatcher(&self) {
        let mut dispatcher = self.inner.dispatcher.lock();
        if dispatcher.is_some() || self.inner.lifecycle.is_cancelled() {
            return;
        }
        let events = self.inner.platform.events();
        *dispatcher = Some(tokio::spawn(dispatch_events(
            Arc::downgrade(&self.inner),
            events,
            self.inner.lifecycle.child_token(),
        )));
    }

    #[must_use]
    pub fn adapter_state(&self) -> AdapterState {
        *self.inner.adapter.lock()
    }

    /// Returns whether the adapter is powered; `false` without an adapter.
    pub async fn is_enabled(&self) -> bool {
        if self.inner.ensure_ready().is_err() {
            return false;
        }
        match self.inner.platform.is_powered().await {
            Ok(powered) => powered,
            Err(error) => {
                debug!(%error, "failed to query adapter power");
                false
            }
        }
    }

    /// Requests adapter power on.
    ///
    /// # Errors
    ///
    /// Fails without an adapter, or when the platform refuses the change.
    pub async fn enable(&self) -> Result<bool, BleError> {
        self.set_powered(true).await
    }

    /// Requests adapter power off.
    ///
    /// # Errors
    ///
    /// Fails without an adapter, or when the platform refuses the change.
    pub async fn disable(&self) -> Result<bool, BleError> {
        self.set_powered(false).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn set_powered(&self, powered: bool) -> Result<bool, BleError> {
        self.inner.ensure_ready()?;
        let accepted = self.inner.platform.set_powered(powered).await?;
        Ok(accepted)
    }

    /// Registers `ctx` for `onEnabledChanged` notifications.
    ///
    /// Returns `false` when a watcher is already registered; the existing one
    /// is kept.
    ///
    /// # Errors
    ///
    /// Fails with the adapter error when initialisation did not succeed.
    pub fn watch_adapter_state(&self, ctx: CallbackContext) -> Result<bool, BleError> {
        self.inner.ensure_ready()?;
        let mut watcher = self.inner.adapter_watcher.lock();
        if watcher.is_some() {
            return Ok(false);
        }
        *watcher = Some(Arc::new(ctx));
        Ok(true)
    }

    /// Removes the adapter watcher, returning whether one was registered.
    pub fn unwatch_adapter_state(&self) -> bool {
        self.inner.adapter_watcher.lock().take().is_some()
    }

    /// Returns the session for `device_id`, creating it on first reference.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIdentifier` for malformed identifiers.
    pub fn get_or_create_session(&self, device_id: &str) -> Result<Arc<DeviceSession>, BleError> {
        let device_id = DeviceIdentifier::parse(device_id)?;
        Ok(self.inner.get_or_create_session(device_id))
    }

    /// Returns the state of an existing session without creating one.
    #[must_use]
    pub fn session_snapshot(&self, device_id: &DeviceIdentifier) -> Option<SessionSnapshot> {
        self.inner
            .session(device_id)
            .map(|session| session.snapshot())
    }

    /// Runs a bounded pick-one scan.
    ///
    /// The first device whose name matches the optional prefix is reported
    /// through `on_device`; otherwise `on_fail` receives `NoDeviceFound` once
    /// `duration` (capped at the configured maximum) elapses.
    #[instrument(skip(self, ctx), level = "info")]
    pub async fn request_device(
        &self,
        options: ScanOptions,
        duration: Option<Duration>,
        ctx: CallbackContext,
    ) {
        let max = self.inner.config.max_scan_duration();
        let duration = duration.map_or(max, |duration| duration.min(max));
        self.start_scan(options, ScanMode::Bounded { duration }, ctx)
            .await;
    }

    /// Starts a continuous scan reporting through `on_scan_result`.
    ///
    /// `on_success` fires once when the platform scan has started.
    #[instrument(skip(self, ctx), level = "info")]
    pub async fn request_scan(
        &self,
        options: ScanOptions,
        allow_duplicates: bool,
        ctx: CallbackContext,
    ) {
        self.start_scan(options, ScanMode::Continuous { allow_duplicates }, ctx)
            .await;
    }

    async fn start_scan(&self, options: ScanOptions, mode: ScanMode, ctx: CallbackContext) {
        let ctx = Arc::new(ctx);
        let filter = match self
            .inner
            .ensure_ready()
            .and_then(|()| options.filter())
        {
            Ok(filter) => filter,
            Err(error) => {
                ctx.fail(&error);
                return;
            }
        };

        let mut slot = self.inner.scan.lock().await;
        if let Some(active) = slot.as_ref().filter(|active| active.is_active()) {
            if let Err(error) = self.inner.platform.stop_scan().await {
                let error = BleError::from(error);
                warn!(%error, "could not stop the running scan");
                ctx.fail(&error);
                return;
            }
            debug!(mode = ?active.mode(), "stopped previous scan");
            active.stop();
        }
        *slot = None;

        let stream = match self.inner.platform.start_scan(filter).await {
            Ok(stream) => stream,
            Err(error) => {
                ctx.fail(&error.into());
                return;
            }
        };
        if matches!(mode, ScanMode::Continuous { .. }) {
            ctx.succeed(OperationValue::None);
        }
        *slot = Some(ScanSession::spawn(
            Arc::clone(&self.inner.platform),
            stream,
            mode,
            options,
            self.inner.config.duplicate_filter(),
            ctx,
            self.inner.lifecycle.child_token(),
        ));
    }

    /// Stops the active scan, if any.
    ///
    /// # Errors
    ///
    /// Fails when the platform refuses to stop; the scan keeps running.
    #[instrument(skip(self), level = "info")]
    pub async fn stop_scan(&self) -> Result<(), BleError> {
        self.inner.ensure_ready()?;
        let mut slot = self.inner.scan.lock().await;
        let Some(active) = slot.take_if(|active| active.is_active()) else {
            return Ok(());
        };
        if let Err(error) = self.inner.platform.stop_scan().await {
            *slot = Some(active);
            return Err(error.into());
        }
        active.stop();
        Ok(())
    }

    /// Returns the state of the most recent scan session.
    pub async fn scan_state(&self) -> Option<ScanState> {
        self.inner.scan.lock().await.as_ref().map(ScanSession::state)
    }

    /// Lists devices the platform reports as connected.
    ///
    /// # Errors
    ///
    /// Fails without an adapter or when the platform query fails.
    pub async fn get_connected_devices(&self) -> Result<Vec<FoundDevice>, BleError> {
        self.inner.ensure_ready()?;
        let devices = self.inner.platform.connected_devices().await?;
        Ok(devices.into_iter().map(FoundDevice::from_identifier).collect())
    }

    /// Wraps known identifiers into device records without touching the radio.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidIdentifier` on the first malformed identifier.
    pub fn get_devices<S: AsRef<str>>(&self, device_ids: &[S]) -> Result<Vec<FoundDevice>, BleError> {
        device_ids
            .iter()
            .map(|device_id| DeviceIdentifier::parse(device_id.as_ref()).map(FoundDevice::from_identifier))
            .collect()
    }

    /// Connects to a device; `on_disconnect` on `ctx` observes later link loss.
    ///
    /// Returns once the request is submitted. The outcome arrives on `ctx`.
    pub async fn connect(&self, device_id: &str, timeout: Option<Duration>, ctx: CallbackContext) {
        self.run_operation(device_id, Ok(Operation::Connect), timeout, ctx);
    }

    /// Disconnects and forgets the session once the platform confirms.
    ///
    /// A refused disconnect keeps the session and its link.
    pub async fn disconnect(&self, device_id: &str, timeout: Option<Duration>, ctx: CallbackContext) {
        self.run_operation(device_id, Ok(Operation::Disconnect), timeout, ctx);
    }

    pub async fn create_bond(&self, device_id: &str, timeout: Option<Duration>, ctx: CallbackContext) {
        self.run_operation(device_id, Ok(Operation::CreateBond), timeout, ctx);
    }

    /// # Errors
    ///
    /// Fails without an adapter, for malformed identifiers, or when the
    /// platform cannot answer.
    pub async fn is_bonded(&self, device_id: &str) -> Result<bool, BleError> {
        self.inner.ensure_ready()?;
        let device_id = DeviceIdentifier::parse(device_id)?;
        Ok(self.inner.platform.is_bonded(&device_id).await?)
    }

    pub async fn discover_services(
        &self,
        device_id: &str,
        timeout: Option<Duration>,
        ctx: CallbackContext,
    ) {
        self.run_operation(device_id, Ok(Operation::DiscoverServices), timeout, ctx);
    }

    /// Returns the topology cached by the last discovery.
    ///
    /// # Errors
    ///
    /// Fails with `NotConnected` unless the device is connected.
    pub fn get_services(&self, device_id: &str) -> Result<Vec<ServiceInfo>, BleError> {
        let session = self.connected_session(device_id)?;
        Ok(session.services().unwrap_or_default())
    }

    /// Returns the negotiated MTU.
    ///
    /// # Errors
    ///
    /// Fails with `NotConnected` unless the device is connected.
    pub fn get_mtu(&self, device_id: &str) -> Result<u16, BleError> {
        let session = self.connected_session(device_id)?;
        session.mtu().ok_or_else(|| BleError::NotConnected {
            device_id: session.device_id().to_string(),
        })
    }

    /// Requests a connection priority given as its integer code (0, 1 or 2).
    pub async fn request_connection_priority(
        &self,
        device_id: &str,
        priority: i32,
        timeout: Option<Duration>,
        ctx: CallbackContext,
    ) {
        let operation =
            ConnectionPriority::try_from(priority).map(Operation::RequestConnectionPriority);
        self.run_operation(device_id, operation, timeout, ctx);
    }

    pub async fn read_rssi(&self, device_id: &str, timeout: Option<Duration>, ctx: CallbackContext) {
        self.run_operation(device_id, Ok(Operation::ReadRssi), timeout, ctx);
    }

    pub async fn read(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
        timeout: Option<Duration>,
        ctx: CallbackContext,
    ) {
        let operation =
            CharacteristicAddress::parse(service, characteristic).map(Operation::ReadCharacteristic);
        self.run_operation(device_id, operation, timeout, ctx);
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn write(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
        value: Vec<u8>,
        mode: WriteMode,
        timeout: Option<Duration>,
        ctx: CallbackContext,
    ) {
        let operation = CharacteristicAddress::parse(service, characteristic).map(|address| {
            Operation::WriteCharacteristic {
                address,
                value,
                mode,
            }
        });
        self.run_operation(device_id, operation, timeout, ctx);
    }

    pub async fn write_without_response(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
        value: Vec<u8>,
        timeout: Option<Duration>,
        ctx: CallbackContext,
    ) {
        self.write(
            device_id,
            service,
            characteristic,
            value,
            WriteMode::WithoutResponse,
            timeout,
            ctx,
        )
        .await;
    }

    pub async fn read_descriptor(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
        descriptor: &str,
        timeout: Option<Duration>,
        ctx: CallbackContext,
    ) {
        let operation = DescriptorAddress::parse(service, characteristic, descriptor)
            .map(Operation::ReadDescriptor);
        self.run_operation(device_id, operation, timeout, ctx);
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn write_descriptor(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
        descriptor: &str,
        value: Vec<u8>,
        timeout: Option<Duration>,
        ctx: CallbackContext,
    ) {
        let operation = DescriptorAddress::parse(service, characteristic, descriptor)
            .map(|address| Operation::WriteDescriptor { address, value });
        self.run_operation(device_id, operation, timeout, ctx);
    }

    /// Subscribes to value changes; `ctx` keeps receiving `on_notify` until
    /// notifications are stopped or the link drops.
    pub async fn start_notifications(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
        timeout: Option<Duration>,
        ctx: CallbackContext,
    ) {
        let operation = CharacteristicAddress::parse(service, characteristic).map(|address| {
            Operation::SetNotificationState {
                address,
                enabled: true,
            }
        });
        self.run_operation(device_id, operation, timeout, ctx);
    }

    /// Unsubscribes from value changes.
    ///
    /// Stopping a characteristic that was never started succeeds without a
    /// platform call.
    pub async fn stop_notifications(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
        timeout: Option<Duration>,
        ctx: CallbackContext,
    ) {
        let subscribed = self.inner.ensure_ready().and_then(|()| {
            let device_id = DeviceIdentifier::parse(device_id)?;
            let address = CharacteristicAddress::parse(service, characteristic)?;
            Ok(self
                .inner
                .session(&device_id)
                .is_some_and(|session| session.is_subscribed(&address)))
        });
        match subscribed {
            Ok(true) => {
                let operation = CharacteristicAddress::parse(service, characteristic).map(
                    |address| Operation::SetNotificationState {
                        address,
                        enabled: false,
                    },
                );
                self.run_operation(device_id, operation, timeout, ctx);
            }
            Ok(false) => {
                trace!(device_id, "stopping notifications that were never started");
                ctx.succeed(OperationValue::None);
            }
            Err(error) => ctx.fail(&error),
        }
    }

    /// Returns every buffered notification at or after `since_ms` and clears
    /// the log.
    ///
    /// # Errors
    ///
    /// Fails when the durable log cannot be truncated.
    #[instrument(skip(self), level = "info")]
    pub fn catchup(&self, since_ms: Option<i64>) -> Result<Vec<NotificationRecord>, LogError> {
        let records = self.inner.log.catch_up(since_ms)?;
        info!(records = records.len(), "notification catch-up");
        Ok(records)
    }

    /// Wipes the notification log without reading it.
    ///
    /// # Errors
    ///
    /// Fails when the durable log cannot be truncated.
    pub fn clear_notification_log(&self) -> Result<(), LogError> {
        self.inner.log.clear()
    }

    /// Stops the event dispatcher, the adapter watcher and any running scan.
    #[instrument(skip(self), level = "info")]
    pub async fn shutdown(&self) {
        self.inner.lifecycle.cancel();
        self.unwatch_adapter_state();

        if let Some(active) = self.inner.scan.lock().await.take()
            && active.is_active()
        {
            if let Err(error) = self.inner.platform.stop_scan().await {
                warn!(%error, "failed to stop scan during shutdown");
            }
            active.stop();
        }

        let dispatcher = self.inner.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher
            && let Err(error) = dispatcher.await
        {
            warn!(%error, "event dispatcher ended abnormally");
        }
    }

    fn connected_session(&self, device_id: &str) -> Result<Arc<DeviceSession>, BleError> {
        let device_id = DeviceIdentifier::parse(device_id)?;
        match self.inner.session(&device_id) {
            Some(session) if session.is_connected() => Ok(session),
            _ => Err(BleError::NotConnected {
                device_id: device_id.to_string(),
            }),
        }
    }

    fn run_operation(
        &self,
        device_id: &str,
        operation: Result<Operation, BleError>,
        timeout: Option<Duration>,
        ctx: CallbackContext,
    ) {
        let ctx = Arc::new(ctx);
        let admitted = self.inner.ensure_ready().and_then(|()| {
            let operation = operation?;
            let timeout = timeout.unwrap_or_else(|| self.default_timeout(operation.kind()));
            let session = self.get_or_create_session(device_id)?;
            let handle = session.submit(operation, timeout, &ctx)?;
            Ok((session, handle))
        });
        let (session, handle) = match admitted {
            Ok(admitted) => admitted,
            Err(error) => {
                debug!(device_id, %error, "operation refused");
                ctx.fail(&error);
                return;
            }
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let kind = handle.kind();
            let outcome = handle.outcome().await;
            if kind == OperationKind::Disconnect && outcome.is_ok() {
                inner.remove_session(&session);
            }
            ctx.resolve(outcome);
        });
    }

    fn default_timeout(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Connect => self.inner.config.connect_timeout(),
            _ => self.inner.config.operation_timeout(),
        }
    }
}

impl Inner {
    fn ensure_ready(&self) -> Result<(), BleError> {
        match *self.status.lock() {
            Some(InitStatus::Ready) => Ok(()),
            Some(InitStatus::AdapterUnsupported) => Err(BleError::AdapterUnsupported),
            Some(InitStatus::AdapterUnavailable) | None => Err(BleError::AdapterUnavailable),
        }
    }

    fn session(&self, device_id: &DeviceIdentifier) -> Option<Arc<DeviceSession>> {
        self.sessions.lock().get(device_id).cloned()
    }

    fn get_or_create_session(&self, device_id: DeviceIdentifier) -> Arc<DeviceSession> {
        let mut sessions = self.sessions.lock();
        Arc::clone(sessions.entry(device_id).or_insert_with_key(|device_id| {
            debug!(%device_id, "creating device session");
            Arc::new(DeviceSession::new(
                device_id.clone(),
                Arc::clone(&self.platform),
                Arc::clone(&self.log),
            ))
        }))
    }

    fn remove_session(&self, session: &Arc<DeviceSession>) {
        let mut sessions = self.sessions.lock();
        if sessions
            .get(session.device_id())
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(session.device_id());
            debug!(device_id = %session.device_id(), "removed device session");
        }
    }

    fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::AdapterPowered(powered) => {
                *self.adapter.lock() = if powered {
                    AdapterState::Enabled
                } else {
                    AdapterState::Disabled
                };
                let watcher = self.adapter_watcher.lock().clone();
                if let Some(watcher) = watcher {
                    watcher.notify(Notification::adapter_state(powered));
                }
            }
            PlatformEvent::LinkLost { device_id } => match self.session(&device_id) {
                Some(session) => session.on_link_lost(),
                None => trace!(%device_id, "link loss for unknown session"),
            },
            PlatformEvent::ValueChanged {
                device_id,
                address,
                value,
            } => match self.session(&device_id) {
                Some(session) => session.on_value_changed(address, value),
                None => trace!(%device_id, "value change for unknown session"),
            },
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.lifecycle.cancel();
    }
}

async fn dispatch_events(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<PlatformEvent>,
    lifecycle: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = lifecycle.cancelled() => break,
            next = events.recv() => match next {
                Some(event) => event,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if matches!(event, PlatformEvent::ValueChanged { .. }) {
            // Value changes append to the notification log, which blocks on file I/O.
            let handled = tokio::task::spawn_blocking(move || inner.handle_event(event)).await;
            if let Err(error) = handled {
                warn!(%error, "value change handler failed");
            }
        } else {
            inner.handle_event(event);
        }
    }
    debug!("platform event dispatcher stopped");
}
