//! Actuator abstraction
//!
//! The thing being switched: an LED, a camera torch, a relay.

/// Sink for LED state changes
///
/// Implementations own the hardware. Failures are theirs to handle; the
/// responder session treats every call as successful.
pub trait Actuator {
    fn set_state(&mut self, on: bool);
}

impl<F: FnMut(bool)> Actuator for F {
    fn set_state(&mut self, on: bool) {
        self(on)
    }
}
