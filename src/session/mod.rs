mod device;
mod operation;
mod scan;

pub use self::device::{DeviceSession, LinkState, SessionSnapshot};
pub use self::operation::{Operation, OperationKind, OperationValue};
pub use self::scan::{ScanMode, ScanOptions, ScanState};
pub(crate) use self::scan::ScanSession;
