//! BLE GATT server types and traits for the LedRemote device
//!
//! Protocol constants (UUIDs, frame layout) are in ledremote_proto.
//! This module provides the device-side profile description and the trait a
//! BLE stack implements so the responder session can drive it.

use uuid::Uuid;

// Re-export protocol constants for convenience
pub use ledremote_proto::ble::{
    ADVERTISED_NAME, COMMAND_UUID, LinkConfig, LinkIdentity, RESPONSE_UUID, RadioState,
    SERVICE_UUID, properties,
};

/// Attribute permissions of a characteristic value
pub mod permissions {
    pub const READABLE: u8 = 0x01;
    pub const WRITEABLE: u8 = 0x02;
}

/// One characteristic of the profile being registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    /// Property bits from `properties`
    pub properties: u8,
    /// Permission bits from `permissions`
    pub permissions: u8,
}

/// The GATT service the device registers before advertising
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

impl ServiceDescriptor {
    /// Primary service with a writeable command characteristic and a
    /// readable, notifiable response characteristic
    pub fn led_remote(config: &LinkConfig) -> Self {
        Self {
            uuid: config.service,
            primary: true,
            characteristics: vec![
                CharacteristicDescriptor {
                    uuid: config.response_characteristic,
                    properties: properties::READ | properties::NOTIFY,
                    permissions: permissions::READABLE | permissions::WRITEABLE,
                },
                CharacteristicDescriptor {
                    uuid: config.command_characteristic,
                    properties: properties::WRITE,
                    permissions: permissions::WRITEABLE,
                },
            ],
        }
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicDescriptor> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Stack-assigned handle of a pending read or write request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// ATT status sent back for a read or write request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttStatus {
    Success,
    InvalidOffset,
    AttributeNotFound,
}

/// Trait for BLE GATT server implementations
///
/// Device-specific crates implement this trait using their BLE stack. Calls
/// are requests; anything the stack reports back later arrives as a separate
/// event on the responder session.
pub trait GattServer {
    /// Error type for BLE operations
    type Error: std::fmt::Display;

    /// Register the service and its characteristics
    fn register_profile(&mut self, service: &ServiceDescriptor) -> Result<(), Self::Error>;

    /// Start BLE advertising with the given device name and service ids
    fn start_advertising(&mut self, device_name: &str, services: &[Uuid]) -> Result<(), Self::Error>;

    /// Stop BLE advertising
    fn stop_advertising(&mut self) -> Result<(), Self::Error>;

    /// Set a characteristic value and notify it.
    ///
    /// `subscriber` of `None` means every subscribed peer.
    fn update_value(
        &mut self,
        characteristic: Uuid,
        value: &[u8],
        subscriber: Option<&LinkIdentity>,
    ) -> Result<(), Self::Error>;

    /// Answer a read or write request. `value` is empty for writes.
    fn respond(&mut self, request: RequestId, status: AttStatus, value: &[u8]);
}
