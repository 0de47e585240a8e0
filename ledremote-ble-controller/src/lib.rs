//! LedRemote BLE Controller
//!
//! The phone/desktop side of the LedRemote link. `ControllerSession` is the
//! event-driven state machine; `ble` (behind the default `btleplug` feature)
//! runs it against a real Bluetooth adapter.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ledremote_ble_controller::ble;
//! use ledremote_proto::ble::LinkConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Scan for devices
//!     let config = LinkConfig::default();
//!     for device in ble::scan(&config, Duration::from_secs(5)).await? {
//!         println!("{} ({})", device.name, device.address);
//!     }
//!
//!     // Switch the LED on and wait for the confirmation
//!     let on = ble::set_led(config, true, Duration::from_secs(10)).await?;
//!     println!("LED is {}", if on { "on" } else { "off" });
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "btleplug")]
pub mod ble;
pub mod session;
pub mod stack;

pub use session::*;
pub use stack::*;
