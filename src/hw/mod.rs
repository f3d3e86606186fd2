mod btleplug_backend;
mod fake_backend;
mod model;
mod platform;

pub use self::btleplug_backend::BtleplugPlatform;
pub use self::fake_backend::{
    FakeAdapter, FakeCall, FakeLatency, FakePlatform, FakePlatformConfig, FakeWrite,
    NotificationScript, ScanFixture,
};
pub use self::model::{
    CharacteristicInfo, CharacteristicProperties, DescriptorInfo, FoundDevice, ScanFilter,
    ScanResult, ServiceInfo,
};
pub use self::platform::{AdapterProbe, BlePlatform, LinkInfo, PlatformEvent, ScanStream};
