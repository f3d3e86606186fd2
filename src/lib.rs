mod app;
mod cli;
mod config;
mod context;
mod error;
mod hw;
mod notification;
mod orchestrator;
mod protocol;
mod session;
mod telemetry;
mod terminal;
mod utils;

pub use app::{RunOptions, fake_platform, real_platform, run, run_with_clients, run_with_options};
pub use cli::{
    Args, CatchupArgs, CharacteristicArgs, Command, FakeArgs, InspectArgs, ListenArgs, LogLevel,
    OutputFormat, ReadArgs, RequestDeviceArgs, ScanArgs, ScanFilterArgs, WriteArgs,
};
pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_OPERATION_TIMEOUT, DuplicateFilter, MAX_SCAN_DURATION,
    OrchestratorConfig, default_notification_log_path,
};
pub use context::{ADAPTER_STATE_KEY, CallbackContext, CallbackEvent, Notification, NotifyValue};
pub use error::{BleError, FixtureError, LogError, PlatformError};
pub use hw::{
    AdapterProbe, BlePlatform, BtleplugPlatform, CharacteristicInfo, CharacteristicProperties,
    DescriptorInfo, FakeAdapter, FakeCall, FakeLatency, FakePlatform, FakePlatformConfig,
    FakeWrite, FoundDevice, LinkInfo, NotificationScript, PlatformEvent, ScanFilter, ScanFixture,
    ScanResult, ScanStream, ServiceInfo,
};
pub use notification::{NotificationLog, NotificationRecord};
pub use orchestrator::{AdapterState, BleOrchestrator, InitStatus};
pub use protocol::{
    CharacteristicAddress, ConnectionPriority, DescriptorAddress, DeviceIdentifier, WriteMode,
    decode_value, encode_value,
};
pub use session::{
    DeviceSession, LinkState, Operation, OperationKind, OperationValue, ScanMode, ScanOptions,
    ScanState, SessionSnapshot,
};
pub use terminal::TerminalClient;
