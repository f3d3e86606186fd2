pub(crate) mod catchup;
pub(crate) mod command;
pub(crate) mod gatt;
pub(crate) mod inspect;
mod link;
pub(crate) mod listen;
pub(crate) mod scan;
pub(crate) mod ui;

pub use self::catchup::CatchupArgs;
pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::gatt::{CharacteristicArgs, ReadArgs, WriteArgs};
pub use self::inspect::InspectArgs;
pub use self::listen::ListenArgs;
pub use self::scan::{RequestDeviceArgs, ScanArgs, ScanFilterArgs};
