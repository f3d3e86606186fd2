mod device_view;
mod inspect_view;
mod listen_view;
mod painter;
mod spinner;
mod table;
mod value_view;

pub(crate) use self::device_view::{DeviceView, ScanResultView};
pub(crate) use self::inspect_view::InspectView;
pub(crate) use self::listen_view::{ListenReadyView, NotificationView, StopReason, SummaryView};
pub(crate) use self::painter::Painter;
pub(crate) use self::spinner::Spinner;
pub(crate) use self::value_view::{CatchupView, ValueView};
