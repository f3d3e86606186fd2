use std::fmt;

use tokio::sync::mpsc;

use crate::error::BleError;
use crate::hw::{FoundDevice, ScanResult};
use crate::protocol::DeviceIdentifier;
use crate::session::OperationValue;

/// Notification key used for adapter power transitions.
pub const ADAPTER_STATE_KEY: &str = "onEnabledChanged";

type SuccessHandler = Box<dyn Fn(OperationValue) + Send + Sync>;
type FailHandler = Box<dyn Fn(&BleError) + Send + Sync>;
type DeviceHandler = Box<dyn Fn(FoundDevice) + Send + Sync>;
type DisconnectHandler = Box<dyn Fn(&DeviceIdentifier) + Send + Sync>;
type NotifyHandler = Box<dyn Fn(Notification) + Send + Sync>;
type ScanResultHandler = Box<dyn Fn(ScanResult) + Send + Sync>;

/// Payload of an `on_notify` event.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NotifyValue {
    /// Adapter power state.
    Enabled(bool),
    /// Characteristic value bytes.
    Bytes(Vec<u8>),
}

/// A keyed notification delivered through `on_notify`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Notification {
    key: String,
    value: NotifyValue,
    timestamp_ms: Option<i64>,
}

impl Notification {
    pub(crate) fn adapter_state(enabled: bool) -> Self {
        Self {
            key: ADAPTER_STATE_KEY.to_string(),
            value: NotifyValue::Enabled(enabled),
            timestamp_ms: None,
        }
    }

    pub(crate) fn characteristic_value(
        key: String,
        value: Vec<u8>,
        timestamp_ms: Option<i64>,
    ) -> Self {
        Self {
            key,
            value: NotifyValue::Bytes(value),
            timestamp_ms,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &NotifyValue {
        &self.value
    }

    /// Returns the log timestamp for characteristic values that reached the log.
    #[must_use]
    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp_ms
    }
}

/// One event observed by a recording context.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CallbackEvent {
    Success(OperationValue),
    Fail(BleError),
    Device(FoundDevice),
    Disconnect(DeviceIdentifier),
    Notify(Notification),
    ScanResult(ScanResult),
}

/// Per-request table of result and event handlers.
///
/// Slots left empty are simply not observed.
///
/// ```
/// use blesession::CallbackContext;
///
/// let ctx = CallbackContext::new()
///     .on_success(|value| println!("done: {value:?}"))
///     .on_fail(|error| eprintln!("failed: {error}"));
/// let _ = ctx;
/// ```
#[derive(Default)]
pub struct CallbackContext {
    on_success: Option<SuccessHandler>,
    on_fail: Option<FailHandler>,
    on_device: Option<DeviceHandler>,
    on_disconnect: Option<DisconnectHandler>,
    on_notify: Option<NotifyHandler>,
    on_scan_result: Option<ScanResultHandler>,
}

impl CallbackContext {
    /// Creates a context with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context that forwards every event to a channel.
    #[must_use]
    pub fn recording() -> (Self, mpsc::UnboundedReceiver<CallbackEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let success = sender.clone();
        let fail = sender.clone();
        let device = sender.clone();
        let disconnect = sender.clone();
        let notify = sender.clone();
        let scan_result = sender;

        let ctx = Self::new()
            .on_success(move |value| {
                let _ = success.send(CallbackEvent::Success(value));
            })
            .on_fail(move |error| {
                let _ = fail.send(CallbackEvent::Fail(error.clone()));
            })
            .on_device(move |found| {
                let _ = device.send(CallbackEvent::Device(found));
            })
            .on_disconnect(move |device_id| {
                let _ = disconnect.send(CallbackEvent::Disconnect(device_id.clone()));
            })
            .on_notify(move |notification| {
                let _ = notify.send(CallbackEvent::Notify(notification));
            })
            .on_scan_result(move |result| {
                let _ = scan_result.send(CallbackEvent::ScanResult(result));
            });
        (ctx, receiver)
    }

    #[must_use]
    pub fn on_success(mut self, handler: impl Fn(OperationValue) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_fail(mut self, handler: impl Fn(&BleError) + Send + Sync + 'static) -> Self {
        self.on_fail = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_device(mut self, handler: impl Fn(FoundDevice) + Send + Sync + 'static) -> Self {
        self.on_device = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_disconnect(
        mut self,
        handler: impl Fn(&DeviceIdentifier) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_notify(mut self, handler: impl Fn(Notification) + Send + Sync + 'static) -> Self {
        self.on_notify = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_scan_result(mut self, handler: impl Fn(ScanResult) + Send + Sync + 'static) -> Self {
        self.on_scan_result = Some(Box::new(handler));
        self
    }

    pub(crate) fn has_disconnect_handler(&self) -> bool {
        self.on_disconnect.is_some()
    }

    pub(crate) fn succeed(&self, value: OperationValue) {
        if let Some(handler) = &self.on_success {
            handler(value);
        }
    }

    pub(crate) fn fail(&self, error: &BleError) {
        if let Some(handler) = &self.on_fail {
            handler(error);
        }
    }

    pub(crate) fn resolve(&self, result: Result<OperationValue, BleError>) {
        match result {
            Ok(value) => self.succeed(value),
            Err(error) => self.fail(&error),
        }
    }

    pub(crate) fn device(&self, device: FoundDevice) {
        if let Some(handler) = &self.on_device {
            handler(device);
        }
    }

    pub(crate) fn disconnected(&self, device_id: &DeviceIdentifier) {
        if let Some(handler) = &self.on_disconnect {
            handler(device_id);
        }
    }

    pub(crate) fn notify(&self, notification: Notification) {
        if let Some(handler) = &self.on_notify {
            handler(notification);
        }
    }

    pub(crate) fn scan_result(&self, result: ScanResult) {
        if let Some(handler) = &self.on_scan_result {
            handler(result);
        }
    }
}

impl fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackContext")
            .field("on_success", &self.on_success.is_some())
            .field("on_fail", &self.on_fail.is_some())
            .field("on_device", &self.on_device.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_notify", &self.on_notify.is_some())
            .field("on_scan_result", &self.on_scan_result.is_some())
            .finish()
    }
}
