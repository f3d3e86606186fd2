use std::fmt::{self, Display, Formatter};

use crate::notification::NotificationRecord;
use crate::protocol::CharacteristicAddress;
use crate::utils::{format_hex, format_timestamp_ms};

use super::device_view::attribute_label;
use super::painter::Painter;
use super::table::Table;

/// Renders a characteristic value read from a device.
pub(crate) struct ValueView<'a> {
    device_id: &'a str,
    address: &'a CharacteristicAddress,
    value: &'a [u8],
    painter: &'a Painter,
}

impl<'a> ValueView<'a> {
    pub(crate) fn new(
        device_id: &'a str,
        address: &'a CharacteristicAddress,
        value: &'a [u8],
        painter: &'a Painter,
    ) -> Self {
        Self {
            device_id,
            address,
            value,
            painter,
        }
    }
}

impl Display for ValueView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                ("device_id", self.painter.value(self.device_id)),
                (
                    "characteristic",
                    attribute_label(&self.address.characteristic(), self.painter),
                ),
                ("length", self.painter.value(self.value.len().to_string())),
                ("value", self.painter.value(format_hex(self.value))),
            ],
        );
        write!(f, "{table}")
    }
}

/// Renders buffered notification records returned by catch-up.
pub(crate) struct CatchupView<'a> {
    records: &'a [NotificationRecord],
    painter: &'a Painter,
}

impl<'a> CatchupView<'a> {
    pub(crate) fn new(records: &'a [NotificationRecord], painter: &'a Painter) -> Self {
        Self { records, painter }
    }
}

impl Display for CatchupView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.records.is_empty() {
            return write!(f, "{}", self.painter.muted("No buffered notifications."));
        }

        let rows = self
            .records
            .iter()
            .map(|record| {
                vec![
                    record.sequence().to_string(),
                    self.painter.muted(format_timestamp_ms(record.timestamp_ms())),
                    record.key().to_string(),
                    self.painter.value(format_hex(record.value())),
                ]
            })
            .collect();
        let table = Table::grid(["seq", "timestamp", "key", "value"], rows);
        write!(
            f,
            "{}\n{table}",
            self.painter
                .heading(format!("Buffered notifications ({}):", self.records.len()))
        )
    }
}
