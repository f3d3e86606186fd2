use std::fmt::{self, Display, Formatter};

use crate::cli::inspect::InspectReport;
use crate::hw::CharacteristicInfo;

use super::device_view::attribute_label;
use super::painter::Painter;
use super::table::Table;

/// Renders link facts followed by the discovered GATT topology.
pub(crate) struct InspectView<'a> {
    report: &'a InspectReport,
    painter: &'a Painter,
}

impl<'a> InspectView<'a> {
    pub(crate) fn new(report: &'a InspectReport, painter: &'a Painter) -> Self {
        Self { report, painter }
    }

    fn characteristic_row(&self, service: String, characteristic: &CharacteristicInfo) -> Vec<String> {
        let properties = characteristic.properties().labels().join(",");
        let descriptors = characteristic
            .descriptors()
            .iter()
            .map(|descriptor| attribute_label(&descriptor.uuid(), self.painter))
            .collect::<Vec<_>>();
        vec![
            service,
            attribute_label(&characteristic.uuid(), self.painter),
            self.painter.value(properties),
            if descriptors.is_empty() {
                self.painter.muted("-")
            } else {
                descriptors.join("\n")
            },
        ]
    }
}

impl Display for InspectView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let link = Table::key_value(
            self.painter,
            vec![
                ("device_id", self.painter.value(self.report.device_id())),
                ("mtu", self.painter.value(self.report.mtu().to_string())),
                ("rssi", self.painter.signal(self.report.rssi())),
            ],
        );

        let mut rows = Vec::new();
        for service in self.report.services() {
            let mut label = attribute_label(&service.uuid(), self.painter);
            if !service.is_primary() {
                label = format!("{label} {}", self.painter.muted("[secondary]"));
            }
            if service.characteristics().is_empty() {
                rows.push(vec![
                    label,
                    self.painter.muted("-"),
                    String::new(),
                    String::new(),
                ]);
                continue;
            }
            for (index, characteristic) in service.characteristics().iter().enumerate() {
                let service_cell = if index == 0 {
                    label.clone()
                } else {
                    String::new()
                };
                rows.push(self.characteristic_row(service_cell, characteristic));
            }
        }

        write!(f, "{}", self.painter.heading("Connected device:"))?;
        write!(f, "\n{link}")?;
        writeln!(f)?;
        write!(f, "\n{}", self.painter.heading("Services:"))?;
        if rows.is_empty() {
            write!(f, "\n{}", self.painter.warning("No services discovered."))
        } else {
            let services = Table::grid(
                ["service", "characteristic", "properties", "descriptors"],
                rows,
            );
            write!(f, "\n{services}")
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::hw::{CharacteristicProperties, DescriptorInfo, ServiceInfo};
    use crate::protocol::CLIENT_CHARACTERISTIC_CONFIGURATION;

    use super::*;

    const HEART_RATE: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);
    const MEASUREMENT: Uuid = Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

    fn report(services: Vec<ServiceInfo>) -> InspectReport {
        InspectReport::new("AA:BB:CC:DD:EE:01".into(), 247, Some(-51), services)
    }

    #[test]
    fn inspect_view_names_known_attributes() {
        let properties = CharacteristicProperties {
            notify: true,
            ..CharacteristicProperties::default()
        };
        let measurement = CharacteristicInfo::new(
            MEASUREMENT,
            properties,
            vec![DescriptorInfo::new(CLIENT_CHARACTERISTIC_CONFIGURATION)],
        );
        let report = report(vec![ServiceInfo::new(HEART_RATE, true, vec![measurement])]);
        let painter = Painter::new(false);

        let rendered = InspectView::new(&report, &painter).to_string();

        assert!(rendered.contains("247"));
        assert!(rendered.contains("-51 dBm"));
        assert!(rendered.contains("(Heart Rate)"));
        assert!(rendered.contains("(Heart Rate Measurement)"));
        assert!(rendered.contains("notify"));
        assert!(rendered.contains("(Client Characteristic Configuration)"));
    }

    #[test]
    fn inspect_view_reports_missing_services() {
        let report = report(Vec::new());
        let painter = Painter::new(false);

        let rendered = InspectView::new(&report, &painter).to_string();

        assert!(rendered.contains("No services discovered."));
    }
}
