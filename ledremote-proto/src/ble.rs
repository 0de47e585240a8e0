//! BLE GATT identifiers and helpers shared by both ends of the link
//!
//! The service and both characteristics use 16-bit SIG-style ids expanded
//! onto the Bluetooth base UUID.

use uuid::Uuid;

/// Name the responder advertises and the controller looks for
pub const ADVERTISED_NAME: &str = "LedRemote";

/// 16-bit service id
pub const SERVICE_UUID16: u16 = 0x1815;

/// 16-bit command characteristic id (controller writes here)
pub const COMMAND_UUID16: u16 = 0x2A56;

/// 16-bit response characteristic id (responder reads/notifies here)
pub const RESPONSE_UUID16: u16 = 0x2A57;

/// Service UUID: 00001815-0000-1000-8000-00805f9b34fb
pub const SERVICE_UUID: Uuid = from_short(SERVICE_UUID16);

/// Command Characteristic UUID: 00002a56-0000-1000-8000-00805f9b34fb
pub const COMMAND_UUID: Uuid = from_short(COMMAND_UUID16);

/// Response Characteristic UUID: 00002a57-0000-1000-8000-00805f9b34fb
pub const RESPONSE_UUID: Uuid = from_short(RESPONSE_UUID16);

const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit id onto the Bluetooth base UUID
pub const fn from_short(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | ((short as u128) << 96))
}

/// Characteristic property bits, as carried in the GATT characteristic declaration
pub mod properties {
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
}

/// What a discovered characteristic lets us do with it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub readable: bool,
    pub writeable_with_response: bool,
    pub writeable_without_response: bool,
    pub notifiable: bool,
}

impl Capabilities {
    /// Either kind of write is accepted
    pub fn is_writeable(&self) -> bool {
        self.writeable_with_response || self.writeable_without_response
    }
}

/// Classify a characteristic from its property flags
///
/// Bits other than the four we care about (broadcast, indicate, signed
/// writes, extended properties) are ignored.
pub fn classify(flags: u8) -> Capabilities {
    Capabilities {
        readable: flags & properties::READ != 0,
        writeable_with_response: flags & properties::WRITE != 0,
        writeable_without_response: flags & properties::WRITE_WITHOUT_RESPONSE != 0,
        notifiable: flags & properties::NOTIFY != 0,
    }
}

/// Opaque name for one remote peer. Only used for display and for matching
/// events to the peer we are talking to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkIdentity(String);

impl LinkIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LinkIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Power/availability state reported by the local radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    pub fn is_powered_on(&self) -> bool {
        *self == RadioState::PoweredOn
    }
}

/// Identifiers both ends agree on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub advertised_name: String,
    pub service: Uuid,
    pub command_characteristic: Uuid,
    pub response_characteristic: Uuid,
}

impl LinkConfig {
    /// Default identifiers with a different advertised name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            advertised_name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            advertised_name: ADVERTISED_NAME.to_string(),
            service: SERVICE_UUID,
            command_characteristic: COMMAND_UUID,
            response_characteristic: RESPONSE_UUID,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ids_expand_onto_base_uuid() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "00001815-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            COMMAND_UUID.to_string(),
            "00002a56-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            RESPONSE_UUID.to_string(),
            "00002a57-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn classify_nothing() {
        let caps = classify(0);
        assert_eq!(caps, Capabilities::default());
        assert!(!caps.notifiable);
        assert!(!caps.is_writeable());
    }

    #[test]
    fn classify_notify_only() {
        let caps = classify(properties::NOTIFY);
        assert!(caps.notifiable);
        assert!(!caps.readable);
        assert!(!caps.writeable_with_response);
        assert!(!caps.writeable_without_response);
    }

    #[test]
    fn classify_response_characteristic() {
        // read | notify | indicate; indicate is ignored
        let caps = classify(properties::READ | properties::NOTIFY | 0x20);
        assert!(caps.readable);
        assert!(caps.notifiable);
        assert!(!caps.is_writeable());
    }

    #[test]
    fn either_write_kind_is_writeable() {
        assert!(classify(properties::WRITE).is_writeable());
        assert!(classify(properties::WRITE_WITHOUT_RESPONSE).is_writeable());
    }

    #[test]
    fn config_with_name_keeps_ids() {
        let config = LinkConfig::with_name("Bench");
        assert_eq!(config.advertised_name, "Bench");
        assert_eq!(config.service, SERVICE_UUID);
    }
}
