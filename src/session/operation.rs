use strum_macros::Display;

use crate::hw::{LinkInfo, ServiceInfo};
use crate::protocol::{CharacteristicAddress, ConnectionPriority, DescriptorAddress, WriteMode};

/// The kind of a device operation, without its arguments.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Connect,
    CreateBond,
    Disconnect,
    DiscoverServices,
    ReadCharacteristic,
    WriteCharacteristic,
    ReadDescriptor,
    WriteDescriptor,
    SetNotificationState,
    ReadRssi,
    RequestConnectionPriority,
}

impl OperationKind {
    /// Connect and disconnect displace a pending operation of another kind.
    #[must_use]
    pub fn preempts(self) -> bool {
        matches!(self, Self::Connect | Self::Disconnect)
    }

    /// Whether the session must be connected before the operation is admitted.
    #[must_use]
    pub fn requires_connection(self) -> bool {
        !matches!(self, Self::Connect | Self::Disconnect | Self::CreateBond)
    }
}

/// A request against one device session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Operation {
    Connect,
    CreateBond,
    Disconnect,
    DiscoverServices,
    ReadCharacteristic(CharacteristicAddress),
    WriteCharacteristic {
        address: CharacteristicAddress,
        value: Vec<u8>,
        mode: WriteMode,
    },
    ReadDescriptor(DescriptorAddress),
    WriteDescriptor {
        address: DescriptorAddress,
        value: Vec<u8>,
    },
    SetNotificationState {
        address: CharacteristicAddress,
        enabled: bool,
    },
    ReadRssi,
    RequestConnectionPriority(ConnectionPriority),
}

impl Operation {
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Connect => OperationKind::Connect,
            Self::CreateBond => OperationKind::CreateBond,
            Self::Disconnect => OperationKind::Disconnect,
            Self::DiscoverServices => OperationKind::DiscoverServices,
            Self::ReadCharacteristic(_) => OperationKind::ReadCharacteristic,
            Self::WriteCharacteristic { .. } => OperationKind::WriteCharacteristic,
            Self::ReadDescriptor(_) => OperationKind::ReadDescriptor,
            Self::WriteDescriptor { .. } => OperationKind::WriteDescriptor,
            Self::SetNotificationState { .. } => OperationKind::SetNotificationState,
            Self::ReadRssi => OperationKind::ReadRssi,
            Self::RequestConnectionPriority(_) => OperationKind::RequestConnectionPriority,
        }
    }
}

/// Success payload delivered through `on_success`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum OperationValue {
    None,
    Bytes(Vec<u8>),
    Rssi(i16),
}

/// What the platform handed back for a completed operation.
#[derive(Debug)]
pub(crate) enum Completion {
    Done,
    Link(LinkInfo),
    Services(Vec<ServiceInfo>),
    Bytes(Vec<u8>),
    Rssi(i16),
}
