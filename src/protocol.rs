use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use serde_with::{DeserializeFromStr, SerializeDisplay};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use uuid::Uuid;

use crate::error::BleError;

/// Bluetooth SIG base UUID used to widen 16-bit and 32-bit short forms.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Client characteristic configuration descriptor.
pub(crate) const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_0080_5f9b_34fb);

/// A structurally valid peripheral identifier.
///
/// Link-layer addresses are canonicalised to upper-case colon form. Platforms
/// that hide addresses hand out UUIDs instead, which are kept in lower-case
/// hyphenated form.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct DeviceIdentifier(String);

impl DeviceIdentifier {
    /// Validates and canonicalises a textual device identifier.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::InvalidIdentifier`] when the value is neither a
    /// six-octet address nor a UUID.
    pub fn parse(value: &str) -> Result<Self, BleError> {
        let trimmed = value.trim();
        if is_link_layer_address(trimmed) {
            return Ok(Self(trimmed.to_ascii_uppercase()));
        }
        if let Ok(uuid) = Uuid::try_parse(trimmed) {
            return Ok(Self(uuid.hyphenated().to_string()));
        }
        Err(BleError::InvalidIdentifier {
            value: value.to_string(),
        })
    }

    /// Returns the canonical textual identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceIdentifier {
    type Err = BleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

fn is_link_layer_address(value: &str) -> bool {
    let octets: Vec<&str> = value.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Parses a textual attribute UUID, accepting 16-bit and 32-bit short forms.
pub(crate) fn parse_uuid(value: &str) -> Option<Uuid> {
    let trimmed = value.trim();
    if matches!(trimmed.len(), 4 | 8) {
        let short = u32::from_str_radix(trimmed, 16).ok()?;
        return Some(Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96)));
    }
    Uuid::try_parse(trimmed).ok()
}

/// A characteristic addressed through its owning service.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CharacteristicAddress {
    service: Uuid,
    characteristic: Uuid,
}

impl CharacteristicAddress {
    /// Creates an address from already-parsed UUIDs.
    #[must_use]
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }

    /// Parses textual service and characteristic UUIDs.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::InvalidArgument`] naming whichever UUID failed.
    pub fn parse(service: &str, characteristic: &str) -> Result<Self, BleError> {
        let service =
            parse_uuid(service).ok_or_else(|| BleError::invalid_argument("Invalid service UUID."))?;
        let characteristic = parse_uuid(characteristic)
            .ok_or_else(|| BleError::invalid_argument("Invalid characteristic UUID."))?;
        Ok(Self::new(service, characteristic))
    }

    #[must_use]
    pub fn service(&self) -> Uuid {
        self.service
    }

    #[must_use]
    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }
}

impl fmt::Display for CharacteristicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.service, self.characteristic)
    }
}

/// A descriptor addressed through its characteristic.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct DescriptorAddress {
    characteristic: CharacteristicAddress,
    descriptor: Uuid,
}

impl DescriptorAddress {
    #[must_use]
    pub fn new(characteristic: CharacteristicAddress, descriptor: Uuid) -> Self {
        Self {
            characteristic,
            descriptor,
        }
    }

    /// Parses textual service, characteristic and descriptor UUIDs.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::InvalidArgument`] naming whichever UUID failed.
    pub fn parse(service: &str, characteristic: &str, descriptor: &str) -> Result<Self, BleError> {
        let characteristic = CharacteristicAddress::parse(service, characteristic)?;
        let descriptor = parse_uuid(descriptor)
            .ok_or_else(|| BleError::invalid_argument("Invalid descriptor UUID."))?;
        Ok(Self::new(characteristic, descriptor))
    }

    #[must_use]
    pub fn characteristic(&self) -> CharacteristicAddress {
        self.characteristic
    }

    #[must_use]
    pub fn descriptor(&self) -> Uuid {
        self.descriptor
    }
}

/// Builds the notification log key for one characteristic of one device.
pub(crate) fn notification_key(
    device_id: &DeviceIdentifier,
    address: &CharacteristicAddress,
) -> String {
    format!(
        "notification|{device_id}|{}|{}",
        address.service(),
        address.characteristic()
    )
}

/// Encodes a characteristic value for transport across the host boundary.
#[must_use]
pub fn encode_value(value: &[u8]) -> String {
    hex::encode(value)
}

/// Decodes a transport value, ignoring whitespace between byte pairs.
///
/// # Errors
///
/// Returns [`BleError::InvalidArgument`] for odd-length or non-hex input.
pub fn decode_value(value: &str) -> Result<Vec<u8>, BleError> {
    let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(cleaned).map_err(|error| BleError::invalid_argument(format!("Invalid value: {error}")))
}

/// Characteristic write type.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
pub enum WriteMode {
    #[strum(to_string = "with_response")]
    WithResponse,
    #[strum(to_string = "without_response")]
    WithoutResponse,
}

/// Link-level connection priority hint.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
pub enum ConnectionPriority {
    #[strum(to_string = "balanced")]
    Balanced,
    #[strum(to_string = "high")]
    High,
    #[strum(to_string = "low_power")]
    LowPower,
}

impl TryFrom<i32> for ConnectionPriority {
    type Error = BleError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Balanced),
            1 => Ok(Self::High),
            2 => Ok(Self::LowPower),
            _ => Err(BleError::invalid_argument("Invalid connectionPriority")),
        }
    }
}

/// Well-known GATT attributes shown by name in terminal output.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub(crate) enum KnownAttribute {
    #[strum(to_string = "Generic Access")]
    GenericAccess,
    #[strum(to_string = "Device Information")]
    DeviceInformation,
    #[strum(to_string = "Battery")]
    Battery,
    #[strum(to_string = "Battery Level")]
    BatteryLevel,
    #[strum(to_string = "Heart Rate")]
    HeartRate,
    #[strum(to_string = "Heart Rate Measurement")]
    HeartRateMeasurement,
    #[strum(to_string = "Body Sensor Location")]
    BodySensorLocation,
    #[strum(to_string = "Client Characteristic Configuration")]
    ClientCharacteristicConfiguration,
    #[strum(to_string = "Nordic UART")]
    NordicUart,
    #[strum(to_string = "Nordic UART RX")]
    NordicUartRx,
    #[strum(to_string = "Nordic UART TX")]
    NordicUartTx,
}

static KNOWN_ATTRIBUTES_BY_UUID: LazyLock<HashMap<Uuid, KnownAttribute>> = LazyLock::new(|| {
    KnownAttribute::iter()
        .map(|attribute| (uuid_for(attribute), attribute))
        .collect()
});

/// Looks up a display name for a well-known attribute UUID.
pub(crate) fn known_attribute(uuid: &Uuid) -> Option<KnownAttribute> {
    KNOWN_ATTRIBUTES_BY_UUID.get(uuid).copied()
}

fn uuid_for(attribute: KnownAttribute) -> Uuid {
    let short = |value: u32| Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(value) << 96));
    match attribute {
        KnownAttribute::GenericAccess => short(0x1800),
        KnownAttribute::DeviceInformation => short(0x180a),
        KnownAttribute::Battery => short(0x180f),
        KnownAttribute::BatteryLevel => short(0x2a19),
        KnownAttribute::HeartRate => short(0x180d),
        KnownAttribute::HeartRateMeasurement => short(0x2a37),
        KnownAttribute::BodySensorLocation => short(0x2a38),
        KnownAttribute::ClientCharacteristicConfiguration => CLIENT_CHARACTERISTIC_CONFIGURATION,
        KnownAttribute::NordicUart => Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e),
        KnownAttribute::NordicUartRx => Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e),
        KnownAttribute::NordicUartTx => Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e),
    }
}
