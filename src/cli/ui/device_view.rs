use std::fmt::{self, Display, Formatter};

use uuid::Uuid;

use crate::hw::{FoundDevice, ScanResult};
use crate::protocol;

use super::painter::Painter;
use super::table::Table;

/// Renders a `FoundDevice` as a key-value table.
pub(crate) struct DeviceView<'a> {
    device: &'a FoundDevice,
    painter: &'a Painter,
}

impl<'a> DeviceView<'a> {
    pub(crate) fn new(device: &'a FoundDevice, painter: &'a Painter) -> Self {
        Self { device, painter }
    }
}

impl Display for DeviceView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = self.device.name().unwrap_or("<unknown>");
        let services = if self.device.uuids().is_empty() {
            self.painter.muted("-")
        } else {
            self.device
                .uuids()
                .iter()
                .map(|uuid| attribute_label(uuid, self.painter))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let table = Table::key_value(
            self.painter,
            vec![
                (
                    "device_id",
                    self.painter.value(self.device.device_id().as_str()),
                ),
                ("name", self.painter.value(name)),
                ("services", services),
            ],
        );
        write!(f, "{table}")
    }
}

/// Renders one advertisement as a single line.
pub(crate) struct ScanResultView<'a> {
    result: &'a ScanResult,
    painter: &'a Painter,
}

impl<'a> ScanResultView<'a> {
    pub(crate) fn new(result: &'a ScanResult, painter: &'a Painter) -> Self {
        Self { result, painter }
    }
}

impl Display for ScanResultView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let device = self.result.device();
        write!(
            f,
            "{} {} {}",
            self.painter.value(device.device_id().as_str()),
            device.name().unwrap_or("<unknown>"),
            self.painter.signal(self.result.rssi())
        )?;
        if !self.result.service_uuids().is_empty() {
            let services = self
                .result
                .service_uuids()
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>()
                .join(",");
            write!(f, " {}", self.painter.muted(format!("services={services}")))?;
        }
        Ok(())
    }
}

/// Formats a UUID with its well-known name, when there is one.
pub(crate) fn attribute_label(uuid: &Uuid, painter: &Painter) -> String {
    match protocol::known_attribute(uuid) {
        Some(known) => format!("{uuid} {}", painter.muted(format!("({known})"))),
        None => uuid.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use rstest::rstest;

    use crate::protocol::DeviceIdentifier;

    use super::*;

    const HEART_RATE: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

    fn device(name: Option<&str>, uuids: Vec<Uuid>) -> FoundDevice {
        let device_id = DeviceIdentifier::parse("AA:BB:CC:DD:EE:01").expect("valid identifier");
        FoundDevice::new(device_id, name.map(String::from), uuids)
    }

    #[rstest]
    #[case::all_fields(Some("Pump-01"), vec![HEART_RATE], "Heart Rate")]
    #[case::missing_name(None, vec![], "<unknown>")]
    fn device_view_renders(
        #[case] name: Option<&str>,
        #[case] uuids: Vec<Uuid>,
        #[case] expected: &str,
    ) {
        let found = device(name, uuids);
        let painter = Painter::new(false);
        let rendered = DeviceView::new(&found, &painter).to_string();

        assert!(rendered.contains("AA:BB:CC:DD:EE:01"));
        assert!(rendered.contains(expected), "{rendered}");
    }

    #[test]
    fn scan_result_renders_on_one_line() {
        let result = ScanResult::new(device(Some("Pump-01"), vec![]), Some(-48));
        let painter = Painter::new(false);

        assert_snapshot!(
            ScanResultView::new(&result, &painter).to_string(),
            @"AA:BB:CC:DD:EE:01 Pump-01 -48 dBm"
        );
    }

    #[test]
    fn unknown_attributes_render_bare() {
        let painter = Painter::new(false);
        let uuid = Uuid::from_u128(0x1234);

        assert_snapshot!(
            attribute_label(&uuid, &painter),
            @"00000000-0000-0000-0000-000000001234"
        );
    }
}
