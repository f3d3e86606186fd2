use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_with::hex::Hex;
use serde_with::serde_as;
use uuid::Uuid;

use crate::protocol::DeviceIdentifier;

/// A peripheral as seen through discovery or identifier lookup.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct FoundDevice {
    device_id: DeviceIdentifier,
    name: Option<String>,
    uuids: Vec<Uuid>,
}

impl FoundDevice {
    pub(crate) fn new(device_id: DeviceIdentifier, name: Option<String>, uuids: Vec<Uuid>) -> Self {
        Self {
            device_id,
            name,
            uuids,
        }
    }

    /// A device known only by identifier.
    pub(crate) fn from_identifier(device_id: DeviceIdentifier) -> Self {
        Self::new(device_id, None, Vec::new())
    }

    #[must_use]
    pub fn device_id(&self) -> &DeviceIdentifier {
        &self.device_id
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns advertised service UUIDs.
    #[must_use]
    pub fn uuids(&self) -> &[Uuid] {
        &self.uuids
    }

    /// Returns whether the local name starts with a case-sensitive prefix.
    pub(crate) fn name_starts_with(&self, prefix: &str) -> bool {
        self.name.as_deref().is_some_and(|name| name.starts_with(prefix))
    }
}

/// One advertisement report.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ScanResult {
    device: FoundDevice,
    rssi: Option<i16>,
    tx_power: Option<i16>,
    #[serde_as(as = "BTreeMap<_, Hex>")]
    manufacturer_data: BTreeMap<u16, Vec<u8>>,
    #[serde_as(as = "BTreeMap<_, Hex>")]
    service_data: BTreeMap<Uuid, Vec<u8>>,
}

impl ScanResult {
    pub(crate) fn new(device: FoundDevice, rssi: Option<i16>) -> Self {
        Self {
            device,
            rssi,
            tx_power: None,
            manufacturer_data: BTreeMap::new(),
            service_data: BTreeMap::new(),
        }
    }

    pub(crate) fn with_tx_power(mut self, tx_power: Option<i16>) -> Self {
        self.tx_power = tx_power;
        self
    }

    pub(crate) fn with_manufacturer_data(mut self, data: BTreeMap<u16, Vec<u8>>) -> Self {
        self.manufacturer_data = data;
        self
    }

    pub(crate) fn with_service_data(mut self, data: BTreeMap<Uuid, Vec<u8>>) -> Self {
        self.service_data = data;
        self
    }

    #[must_use]
    pub fn device(&self) -> &FoundDevice {
        &self.device
    }

    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    #[must_use]
    pub fn tx_power(&self) -> Option<i16> {
        self.tx_power
    }

    #[must_use]
    pub fn manufacturer_data(&self) -> &BTreeMap<u16, Vec<u8>> {
        &self.manufacturer_data
    }

    #[must_use]
    pub fn service_data(&self) -> &BTreeMap<Uuid, Vec<u8>> {
        &self.service_data
    }

    #[must_use]
    pub fn service_uuids(&self) -> &[Uuid] {
        self.device.uuids()
    }

    /// Hash of the advertised content, ignoring signal strength.
    pub(crate) fn advertisement_fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.device.hash(&mut hasher);
        self.tx_power.hash(&mut hasher);
        self.manufacturer_data.hash(&mut hasher);
        self.service_data.hash(&mut hasher);
        hasher.finish()
    }
}

/// Discovery filter handed to the platform.
///
/// Each service UUID forms its own alternative, combined with the optional
/// exact-name requirement.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ScanFilter {
    services: Vec<Uuid>,
    name: Option<String>,
}

impl ScanFilter {
    pub(crate) fn new(services: Vec<Uuid>, name: Option<String>) -> Self {
        Self { services, name }
    }

    #[must_use]
    pub fn services(&self) -> &[Uuid] {
        &self.services
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns whether a result satisfies this filter.
    #[must_use]
    pub fn matches(&self, result: &ScanResult) -> bool {
        let name_matches = self
            .name
            .as_deref()
            .is_none_or(|name| result.device().name() == Some(name));
        let service_matches = self.services.is_empty()
            || self
                .services
                .iter()
                .any(|service| result.service_uuids().contains(service));
        name_matches && service_matches
    }
}

/// Characteristic property flags.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
}

impl CharacteristicProperties {
    /// Returns the names of set flags.
    #[must_use]
    pub fn labels(&self) -> Vec<&'static str> {
        [
            (self.broadcast, "broadcast"),
            (self.read, "read"),
            (self.write_without_response, "writeWithoutResponse"),
            (self.write, "write"),
            (self.notify, "notify"),
            (self.indicate, "indicate"),
            (self.authenticated_signed_writes, "authenticatedSignedWrites"),
            (self.extended_properties, "extendedProperties"),
        ]
        .into_iter()
        .filter_map(|(set, label)| set.then_some(label))
        .collect()
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DescriptorInfo {
    uuid: Uuid,
}

impl DescriptorInfo {
    pub(crate) fn new(uuid: Uuid) -> Self {
        Self { uuid }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

/// A characteristic description discovered on a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CharacteristicInfo {
    uuid: Uuid,
    properties: CharacteristicProperties,
    descriptors: Vec<DescriptorInfo>,
}

impl CharacteristicInfo {
    pub(crate) fn new(
        uuid: Uuid,
        properties: CharacteristicProperties,
        descriptors: Vec<DescriptorInfo>,
    ) -> Self {
        Self {
            uuid,
            properties,
            descriptors,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    #[must_use]
    pub fn descriptors(&self) -> &[DescriptorInfo] {
        &self.descriptors
    }
}

/// A GATT service with discovered characteristics.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ServiceInfo {
    uuid: Uuid,
    primary: bool,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    pub(crate) fn new(uuid: Uuid, primary: bool, characteristics: Vec<CharacteristicInfo>) -> Self {
        Self {
            uuid,
            primary,
            characteristics,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }

    pub(crate) fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicInfo> {
        self.characteristics
            .iter()
            .find(|characteristic| characteristic.uuid == uuid)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::protocol::parse_uuid;

    fn result(name: Option<&str>, services: &[&str]) -> ScanResult {
        let device_id = DeviceIdentifier::parse("AA:BB:CC:DD:EE:FF").expect("id should parse");
        let uuids = services
            .iter()
            .map(|raw| parse_uuid(raw).expect("uuid should parse"))
            .collect();
        ScanResult::new(FoundDevice::new(device_id, name.map(String::from), uuids), Some(-60))
    }

    fn filter(services: &[&str], name: Option<&str>) -> ScanFilter {
        let services = services
            .iter()
            .map(|raw| parse_uuid(raw).expect("uuid should parse"))
            .collect();
        ScanFilter::new(services, name.map(String::from))
    }

    #[rstest]
    #[case::empty_filter(filter(&[], None), result(None, &[]), true)]
    #[case::service_present(filter(&["180d"], None), result(None, &["180d"]), true)]
    #[case::service_absent(filter(&["180d"], None), result(None, &["180f"]), false)]
    #[case::any_service(filter(&["180f", "180d"], None), result(None, &["180d"]), true)]
    #[case::exact_name(filter(&[], Some("Pump-1")), result(Some("Pump-1"), &[]), true)]
    #[case::name_is_not_prefix(filter(&[], Some("Pump")), result(Some("Pump-1"), &[]), false)]
    #[case::name_and_service(filter(&["180d"], Some("HR")), result(Some("HR"), &["180f"]), false)]
    fn scan_filter_matches(
        #[case] filter: ScanFilter,
        #[case] result: ScanResult,
        #[case] expected: bool,
    ) {
        assert_eq!(expected, filter.matches(&result));
    }

    #[test]
    fn fingerprint_ignores_rssi() {
        let near = result(Some("HR"), &["180d"]);
        let far = ScanResult::new(near.device().clone(), Some(-90));
        assert_eq!(near.advertisement_fingerprint(), far.advertisement_fingerprint());

        let changed = near.clone().with_manufacturer_data(BTreeMap::from([(0x004c, vec![1])]));
        assert_ne!(near.advertisement_fingerprint(), changed.advertisement_fingerprint());
    }

    #[test]
    fn property_labels_follow_flag_order() {
        let properties = CharacteristicProperties {
            read: true,
            notify: true,
            write_without_response: true,
            ..CharacteristicProperties::default()
        };
        assert_eq!(vec!["read", "writeWithoutResponse", "notify"], properties.labels());
    }
}
