use std::error::Error as StdError;

use thiserror::Error;

use crate::session::OperationKind;

/// Failure reasons delivered to callers through their callback context.
///
/// The `Display` form is the reason string handed across the host boundary.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum BleError {
    #[error("BLE not supported.")]
    AdapterUnsupported,
    #[error("BLE not available.")]
    AdapterUnavailable,
    #[error("Invalid DeviceId `{value}`")]
    InvalidIdentifier { value: String },
    #[error("Invalid scan filter: {reason}")]
    InvalidFilter { reason: String },
    #[error("{reason}")]
    InvalidArgument { reason: String },
    #[error("device `{device_id}` already has an operation in flight")]
    SessionBusy { device_id: String },
    #[error("device `{device_id}` is not connected")]
    NotConnected { device_id: String },
    #[error("device `{device_id}` disconnected")]
    Disconnected { device_id: String },
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: OperationKind,
        timeout_ms: u64,
    },
    #[error("{operation} was superseded by {by}")]
    Superseded {
        operation: OperationKind,
        by: OperationKind,
    },
    #[error("No device found.")]
    NoDeviceFound,
    #[error("Scan stopped.")]
    ScanStopped,
    #[error("{reason}")]
    PlatformRejected { reason: String },
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },
}

impl BleError {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// Errors reported by a platform BLE backend.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("BLE permission was denied by the platform")]
    PermissionDenied,
    #[error("peripheral `{device_id}` is unknown to the adapter")]
    UnknownDevice { device_id: String },
    #[error("attribute {uuid} was not found on `{device_id}`")]
    MissingAttribute { device_id: String, uuid: String },
    #[error("{operation} is not supported by this platform backend")]
    Unsupported { operation: &'static str },
    #[error("{reason}")]
    Rejected { reason: String },
}

impl PlatformError {
    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

impl From<PlatformError> for BleError {
    fn from(error: PlatformError) -> Self {
        match error {
            PlatformError::NoAdapters => Self::AdapterUnavailable,
            PlatformError::PermissionDenied
            | PlatformError::Ble(btleplug::Error::PermissionDenied) => Self::PermissionDenied {
                reason: error.to_string(),
            },
            other => Self::PlatformRejected {
                reason: error_chain(&other),
            },
        }
    }
}

/// Errors returned by the durable notification log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed while reading or writing the notification log")]
    Io { source: std::io::Error },
    #[error("invalid persisted notification record on line {line}")]
    CorruptRecord {
        line: usize,
        source: serde_json::Error,
    },
    #[error("failed to encode a notification record")]
    Encode { source: serde_json::Error },
}

/// Errors returned when parsing fake platform fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three or four pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("fixture device identifier is invalid")]
    InvalidIdentifier(#[source] BleError),
    #[error("fixture service UUID `{value}` is invalid")]
    InvalidServiceUuid { value: String },
    #[error("fake notification payload `{value}` is not valid hexadecimal")]
    InvalidNotification { value: String },
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

fn error_chain(error: &dyn StdError) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
