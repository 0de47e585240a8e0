//! Responder link session
//!
//! Runs on the device. Brings up the GATT profile once the radio is powered,
//! advertises, turns incoming command writes into actuator calls and answers
//! each valid command with a confirmation frame on the response
//! characteristic.
//!
//! The session never blocks and never spawns anything. The host feeds it BLE
//! stack events one at a time and drains outcome events with
//! [`ResponderSession::poll_event`].

use std::collections::VecDeque;

use log::*;
use uuid::Uuid;

use ledremote_proto::{ResponseFrame, decode_command};

use crate::actuator::Actuator;
use crate::ble::{
    AttStatus, GattServer, LinkConfig, LinkIdentity, RadioState, RequestId, ServiceDescriptor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    /// Radio not powered yet, or the session was stopped
    Idle,
    /// Registering the GATT profile with the stack
    BuildingProfile,
    /// Advertising, nobody subscribed to responses
    Advertising,
    /// A peer is subscribed to the response characteristic
    Responding,
}

/// Outcome events for the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderEvent {
    StateChanged(RadioState),
    /// Advertising started, or failed with the given message
    StartedAdvertising(Option<String>),
    LedStateChanged(bool),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponderError {
    #[error("GATT profile rejected by the stack: {0}")]
    ProfileBuild(String),
    #[error("failed to start advertising: {0}")]
    Advertising(String),
    #[error("read offset {offset} is past the value length {len}")]
    InvalidOffset { offset: usize, len: usize },
    #[error("characteristic {0} is not served here")]
    UnknownCharacteristic(Uuid),
}

pub struct ResponderSession<S, A> {
    server: S,
    actuator: A,
    config: LinkConfig,
    profile: ServiceDescriptor,
    state: ResponderState,
    response_value: Vec<u8>,
    subscriber: Option<LinkIdentity>,
    events: VecDeque<ResponderEvent>,
}

impl<S: GattServer, A: Actuator> ResponderSession<S, A> {
    pub fn new(server: S, actuator: A, config: LinkConfig) -> Self {
        let profile = ServiceDescriptor::led_remote(&config);
        Self {
            server,
            actuator,
            config,
            profile,
            state: ResponderState::Idle,
            response_value: Vec::new(),
            subscriber: None,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    /// Current value of the response characteristic
    pub fn response_value(&self) -> &[u8] {
        &self.response_value
    }

    pub fn subscriber(&self) -> Option<&LinkIdentity> {
        self.subscriber.as_ref()
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut S {
        &mut self.server
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Next outcome event, if any (non-blocking)
    pub fn poll_event(&mut self) -> Option<ResponderEvent> {
        self.events.pop_front()
    }

    /// Radio power state changed
    pub fn on_radio_state_changed(&mut self, radio: RadioState) -> Result<(), ResponderError> {
        debug!("radio state: {:?}", radio);
        self.events.push_back(ResponderEvent::StateChanged(radio));

        if radio.is_powered_on() {
            return self.on_radio_powered_on();
        }
        if self.state != ResponderState::Idle {
            warn!("radio went {:?}, responder back to idle", radio);
            self.state = ResponderState::Idle;
            self.subscriber = None;
        }
        Ok(())
    }

    /// Build the GATT profile and start advertising.
    ///
    /// Only acts from `Idle`. A rejected profile leaves the session `Idle`.
    pub fn on_radio_powered_on(&mut self) -> Result<(), ResponderError> {
        if self.state != ResponderState::Idle {
            debug!("radio powered on while {:?}, nothing to do", self.state);
            return Ok(());
        }

        self.state = ResponderState::BuildingProfile;
        if let Err(e) = self.server.register_profile(&self.profile) {
            error!("GATT profile rejected: {}", e);
            self.state = ResponderState::Idle;
            return Err(ResponderError::ProfileBuild(e.to_string()));
        }

        match self
            .server
            .start_advertising(&self.config.advertised_name, &[self.config.service])
        {
            Ok(()) => {
                info!("advertising as '{}'", self.config.advertised_name);
                self.state = ResponderState::Advertising;
                self.events.push_back(ResponderEvent::StartedAdvertising(None));
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                error!("failed to start advertising: {}", message);
                self.state = ResponderState::Idle;
                self.events
                    .push_back(ResponderEvent::StartedAdvertising(Some(message.clone())));
                Err(ResponderError::Advertising(message))
            }
        }
    }

    /// Serve a read of the response characteristic starting at `offset`.
    ///
    /// The peer always gets an answer; bad offsets and unknown
    /// characteristics are answered with an error status and returned so the
    /// host can log them.
    pub fn on_read_request(
        &mut self,
        request: RequestId,
        characteristic: Uuid,
        offset: usize,
    ) -> Result<(), ResponderError> {
        if characteristic != self.config.response_characteristic {
            self.server.respond(request, AttStatus::AttributeNotFound, &[]);
            return Err(ResponderError::UnknownCharacteristic(characteristic));
        }

        let len = self.response_value.len();
        if offset > len {
            self.server.respond(request, AttStatus::InvalidOffset, &[]);
            return Err(ResponderError::InvalidOffset { offset, len });
        }

        self.server
            .respond(request, AttStatus::Success, &self.response_value[offset..]);
        Ok(())
    }

    /// Handle a write from a peer.
    ///
    /// The write is acknowledged at the transport level no matter what it
    /// contains. Only a valid command on the command characteristic moves
    /// the actuator and produces a response frame.
    pub fn on_write_request(&mut self, request: RequestId, characteristic: Uuid, value: &[u8]) {
        self.server.respond(request, AttStatus::Success, &[]);

        if characteristic != self.config.command_characteristic {
            debug!("ignoring write to {}", characteristic);
            return;
        }

        let command = match decode_command(value) {
            Ok(command) => command,
            Err(e) => {
                warn!("dropping command {:02x?}: {}", value, e);
                return;
            }
        };

        info!("turning LED {}", if command.led_on { "on" } else { "off" });
        self.actuator.set_state(command.led_on);

        let frame = ResponseFrame::confirmation(command.led_on).to_bytes();
        self.response_value = frame.to_vec();
        // every subscribed peer hears the confirmation, not only the writer
        if let Err(e) =
            self.server
                .update_value(self.config.response_characteristic, &frame, None)
        {
            warn!("failed to notify response: {}", e);
        }

        self.events
            .push_back(ResponderEvent::LedStateChanged(command.led_on));
    }

    /// A peer subscribed to responses. The most recent subscriber is the
    /// one tracked; notifications still go to every subscribed peer.
    pub fn on_subscribe(&mut self, peer: &LinkIdentity) {
        info!("{} subscribed to responses", peer);
        self.subscriber = Some(peer.clone());
        if self.state == ResponderState::Advertising {
            self.state = ResponderState::Responding;
        }
    }

    pub fn on_unsubscribe(&mut self, peer: &LinkIdentity) {
        if self.subscriber.as_ref() != Some(peer) {
            debug!("{} unsubscribed but is not the tracked subscriber", peer);
            return;
        }
        info!("{} unsubscribed from responses", peer);
        self.subscriber = None;
        if self.state == ResponderState::Responding {
            self.state = ResponderState::Advertising;
        }
    }

    /// Stop advertising. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.state == ResponderState::Idle {
            return;
        }
        if let Err(e) = self.server.stop_advertising() {
            warn!("failed to stop advertising: {}", e);
        }
        self.state = ResponderState::Idle;
        self.subscriber = None;
    }
}
