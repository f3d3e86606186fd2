use std::fmt::{self, Display, Formatter};

use derive_more::Display as DeriveDisplay;

use crate::context::{Notification, NotifyValue};
use crate::protocol::CharacteristicAddress;
use crate::utils::{format_hex, format_timestamp_ms};

use super::device_view::attribute_label;
use super::painter::Painter;
use super::table::Table;

/// Why a streaming command stopped.
#[derive(Debug, Clone, Eq, PartialEq, DeriveDisplay)]
pub(crate) enum StopReason {
    #[display("reached max notifications ({_0})")]
    ReachedLimit(usize),
    #[display("scan duration elapsed")]
    DurationElapsed,
    #[display("interrupted by user")]
    Interrupted,
    #[display("event stream closed")]
    StreamClosed,
    #[display("device disconnected")]
    Disconnected,
}

/// Renders the subscription a listen session is waiting on.
pub(crate) struct ListenReadyView<'a> {
    device_id: &'a str,
    address: &'a CharacteristicAddress,
    painter: &'a Painter,
}

impl<'a> ListenReadyView<'a> {
    pub(crate) fn new(
        device_id: &'a str,
        address: &'a CharacteristicAddress,
        painter: &'a Painter,
    ) -> Self {
        Self {
            device_id,
            address,
            painter,
        }
    }
}

impl Display for ListenReadyView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                ("device_id", self.painter.value(self.device_id)),
                (
                    "service",
                    attribute_label(&self.address.service(), self.painter),
                ),
                (
                    "listening_on",
                    attribute_label(&self.address.characteristic(), self.painter),
                ),
            ],
        );
        write!(f, "{}", self.painter.heading("Listen session:"))?;
        write!(f, "\n{table}")
    }
}

/// Renders a single notification line.
pub(crate) struct NotificationView<'a> {
    index: usize,
    notification: &'a Notification,
    painter: &'a Painter,
}

impl<'a> NotificationView<'a> {
    pub(crate) fn new(index: usize, notification: &'a Notification, painter: &'a Painter) -> Self {
        Self {
            index,
            notification,
            painter,
        }
    }
}

impl Display for NotificationView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let index_label = self.painter.muted(format!("[{:04}]", self.index));
        let timestamp = self
            .notification
            .timestamp_ms()
            .map_or_else(|| "unlogged".to_string(), format_timestamp_ms);
        let value = match self.notification.value() {
            NotifyValue::Bytes(bytes) => format!("raw={}", format_hex(bytes)),
            NotifyValue::Enabled(enabled) => format!("enabled={enabled}"),
        };
        write!(
            f,
            "{index_label} {} {}",
            self.painter.muted(timestamp),
            self.painter.value(value)
        )
    }
}

/// Renders how many events a streaming command saw and why it stopped.
pub(crate) struct SummaryView<'a> {
    noun: &'a str,
    count: usize,
    stop_reason: &'a StopReason,
    painter: &'a Painter,
}

impl<'a> SummaryView<'a> {
    pub(crate) fn new(
        noun: &'a str,
        count: usize,
        stop_reason: &'a StopReason,
        painter: &'a Painter,
    ) -> Self {
        Self {
            noun,
            count,
            stop_reason,
            painter,
        }
    }
}

impl Display for SummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let stop_reason = match self.stop_reason {
            StopReason::ReachedLimit(_) | StopReason::DurationElapsed => {
                self.painter.success(self.stop_reason.to_string())
            }
            StopReason::Interrupted | StopReason::StreamClosed | StopReason::Disconnected => {
                self.painter.warning(self.stop_reason.to_string())
            }
        };
        write!(
            f,
            "{} {} {}",
            self.painter.heading("Stopped:"),
            stop_reason,
            self.painter
                .value(format!("- received {} {}(s)", self.count, self.noun))
        )
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn notification_formats_index_and_hex() {
        let painter = Painter::new(false);
        let notification = Notification::characteristic_value(
            "notification|AA:BB:CC:DD:EE:01|svc|chr".into(),
            vec![0x05, 0x00, 0x01],
            Some(0),
        );

        assert_snapshot!(
            NotificationView::new(42, &notification, &painter).to_string(),
            @"[0042] 1970-01-01T00:00:00Z raw=05 00 01"
        );
    }

    #[test]
    fn unlogged_notification_says_so() {
        let painter = Painter::new(false);
        let notification = Notification::characteristic_value("key".into(), Vec::new(), None);

        assert_snapshot!(
            NotificationView::new(1, &notification, &painter).to_string(),
            @"[0001] unlogged raw=<empty>"
        );
    }

    #[rstest]
    #[case::reached_limit(
        StopReason::ReachedLimit(10),
        "Stopped: reached max notifications (10) - received 10 notification(s)"
    )]
    #[case::interrupted(
        StopReason::Interrupted,
        "Stopped: interrupted by user - received 10 notification(s)"
    )]
    #[case::disconnected(
        StopReason::Disconnected,
        "Stopped: device disconnected - received 10 notification(s)"
    )]
    fn summary_renders_stop_reason(#[case] stop_reason: StopReason, #[case] expected: &str) {
        let painter = Painter::new(false);

        assert_eq!(
            expected,
            SummaryView::new("notification", 10, &stop_reason, &painter).to_string()
        );
    }
}
