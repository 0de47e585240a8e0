//! LedRemote MCU Library
//!
//! The device side of the LedRemote link: the responder session plus the
//! traits a device implements to plug in its BLE stack and its LED.
//!
//! This crate provides:
//! - GATT profile description and the `GattServer` trait for BLE stacks
//! - The `Actuator` trait for whatever is being switched
//! - `ResponderSession`, the event-driven state machine tying them together
//!
//! # Example
//!
//! ```ignore
//! use ledremote_mcu::{LinkConfig, RadioState, ResponderSession};
//!
//! let mut session = ResponderSession::new(stack, |on| led.set(on), LinkConfig::default());
//! session.on_radio_state_changed(RadioState::PoweredOn)?;
//! // forward write requests, subscriptions and reads from the stack
//! while let Some(event) = session.poll_event() {
//!     println!("{:?}", event);
//! }
//! ```

pub mod actuator;
pub mod ble;
pub mod responder;

pub use actuator::*;
pub use ble::*;
pub use responder::*;
