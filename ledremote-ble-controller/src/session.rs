//! Controller link session
//!
//! Walks a remote LED through scan → connect → service discovery →
//! characteristic discovery → notification subscribe, then turns `turn_on` /
//! `turn_off` calls into command writes and response frames into outcome
//! events.
//!
//! The session is a plain state machine: it never blocks and never spawns
//! anything. Requests go out through a [`CentralStack`], stack events come in
//! through the `on_*` methods, and outcome events are drained with
//! [`ControllerSession::poll_event`].

use std::collections::VecDeque;

use log::*;
use uuid::Uuid;

use ledremote_proto::ble::{Capabilities, LinkConfig, LinkIdentity, RadioState, classify};
use ledremote_proto::{ResponseFrame, decode_response, encode_command};

use crate::stack::{CentralStack, DiscoveredCharacteristic, WriteType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Ready,
    /// A command was written and its response has not arrived yet
    Sending,
    Disconnected,
}

/// A characteristic the session has bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundCharacteristic {
    pub uuid: Uuid,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundCharacteristics {
    pub command: BoundCharacteristic,
    pub response: BoundCharacteristic,
}

/// Outcome events for the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Both characteristics are bound, commands can be sent
    Connected(BoundCharacteristics),
    /// The remote confirmed the LED is now in this state
    Confirmed { led_on: bool },
    /// The remote answered with an error frame
    ErrorReceived(String),
    /// The link to the selected peer went away
    Disconnected,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("not ready to send commands (session is {0:?})")]
    NotReady(ControllerState),
    #[error("service {0} not found on the peer")]
    ServiceNotFound(Uuid),
}

const ERROR_RESPONSE_MESSAGE: &str = "remote LED reported an error";

pub struct ControllerSession<S> {
    stack: S,
    config: LinkConfig,
    state: ControllerState,
    peer: Option<LinkIdentity>,
    command: Option<BoundCharacteristic>,
    response: Option<BoundCharacteristic>,
    events: VecDeque<ControllerEvent>,
}

impl<S: CentralStack> ControllerSession<S> {
    pub fn new(stack: S, config: LinkConfig) -> Self {
        Self {
            stack,
            config,
            state: ControllerState::Idle,
            peer: None,
            command: None,
            response: None,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// The peer being connected or connected to
    pub fn peer(&self) -> Option<&LinkIdentity> {
        self.peer.as_ref()
    }

    /// Both characteristics, once bound
    pub fn bound(&self) -> Option<BoundCharacteristics> {
        Some(BoundCharacteristics {
            command: self.command?,
            response: self.response?,
        })
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    /// Next outcome event, if any (non-blocking)
    pub fn poll_event(&mut self) -> Option<ControllerEvent> {
        self.events.pop_front()
    }

    /// Start scanning for the service.
    ///
    /// Works from `Idle` and `Disconnected`. Does nothing while already
    /// scanning or while a connection is being set up or in use.
    pub fn start_discovery(&mut self) {
        match self.state {
            ControllerState::Idle | ControllerState::Disconnected => {
                self.clear_link();
                self.state = ControllerState::Scanning;
                info!("scanning for service {}", self.config.service);
                self.stack.scan_for_service(self.config.service);
            }
            ControllerState::Scanning => debug!("already scanning"),
            other => debug!("not starting discovery while {:?}", other),
        }
    }

    /// Radio power state changed. Power-on rescans unless a scan or link is
    /// already in progress.
    pub fn on_radio_state_changed(&mut self, radio: RadioState) {
        if radio.is_powered_on() {
            if matches!(
                self.state,
                ControllerState::Idle | ControllerState::Disconnected
            ) {
                self.start_discovery();
            }
            return;
        }
        warn!("bluetooth unavailable: {:?}", radio);
        if !matches!(
            self.state,
            ControllerState::Idle | ControllerState::Disconnected
        ) {
            self.on_disconnected();
        }
    }

    /// A peer showed up in the scan. The first one with the right name wins.
    pub fn on_peer_discovered(&mut self, peer: &LinkIdentity, advertised_name: Option<&str>) {
        if self.state != ControllerState::Scanning {
            return;
        }
        if advertised_name != Some(self.config.advertised_name.as_str()) {
            debug!("ignoring {} ({:?})", peer, advertised_name);
            return;
        }

        info!("found '{}' at {}, connecting", self.config.advertised_name, peer);
        self.peer = Some(peer.clone());
        self.state = ControllerState::Connecting;
        self.stack.connect(peer);
    }

    pub fn on_connected(&mut self, peer: &LinkIdentity) {
        if self.state != ControllerState::Connecting || self.peer.as_ref() != Some(peer) {
            debug!("ignoring connection of {} while {:?}", peer, self.state);
            return;
        }

        info!("connected to {}", peer);
        self.state = ControllerState::DiscoveringServices;
        self.stack.discover_services(peer, &[self.config.service]);
    }

    /// Service discovery finished.
    ///
    /// A missing service is reported but leaves the session where it is; the
    /// caller decides whether to retry or disconnect.
    pub fn on_services_discovered(&mut self, services: &[Uuid]) -> Result<(), SessionError> {
        if self.state != ControllerState::DiscoveringServices {
            debug!("ignoring services while {:?}", self.state);
            return Ok(());
        }
        if !services.contains(&self.config.service) {
            warn!("service {} not found", self.config.service);
            return Err(SessionError::ServiceNotFound(self.config.service));
        }

        self.state = ControllerState::DiscoveringCharacteristics;
        self.stack.discover_characteristics(
            self.config.service,
            &[
                self.config.command_characteristic,
                self.config.response_characteristic,
            ],
        );
        Ok(())
    }

    /// Bind whatever known characteristics were found. Binding accumulates,
    /// the session becomes `Ready` once both are known.
    pub fn on_characteristics_discovered(&mut self, characteristics: &[DiscoveredCharacteristic]) {
        if self.state != ControllerState::DiscoveringCharacteristics {
            debug!("ignoring characteristics while {:?}", self.state);
            return;
        }

        for characteristic in characteristics {
            if characteristic.service != self.config.service {
                continue;
            }
            let bound = BoundCharacteristic {
                uuid: characteristic.uuid,
                capabilities: classify(characteristic.properties),
            };

            if bound.uuid == self.config.command_characteristic {
                self.command = Some(bound);
            } else if bound.uuid == self.config.response_characteristic {
                debug!(" -> {}: 0x{:02x}", bound.uuid, characteristic.properties);
                self.response = Some(bound);
                if bound.capabilities.notifiable {
                    self.stack.set_notify_value(bound.uuid, true);
                }
            }
        }

        match self.bound() {
            Some(bound) => {
                info!("bound command and response characteristics");
                self.state = ControllerState::Ready;
                self.events.push_back(ControllerEvent::Connected(bound));
            }
            None => debug!(
                "still waiting for characteristics (command: {}, response: {})",
                self.command.is_some(),
                self.response.is_some()
            ),
        }
    }

    pub fn turn_on(&mut self) -> Result<(), SessionError> {
        self.send(true)
    }

    pub fn turn_off(&mut self) -> Result<(), SessionError> {
        self.send(false)
    }

    /// Write a command frame.
    ///
    /// Allowed while `Ready` or while an earlier command is still
    /// outstanding; later writes are not queued behind earlier ones.
    pub fn send(&mut self, led_on: bool) -> Result<(), SessionError> {
        let command = match (self.state, self.command) {
            (ControllerState::Ready | ControllerState::Sending, Some(command)) => command,
            _ => return Err(SessionError::NotReady(self.state)),
        };

        let frame = encode_command(led_on);
        let write_type = if command.capabilities.writeable_without_response {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        debug!("writing {:02x?} ({:?})", frame, write_type);
        self.stack.write_value(command.uuid, &frame, write_type);
        self.state = ControllerState::Sending;
        Ok(())
    }

    pub fn on_notification_value(&mut self, value: &[u8]) {
        self.on_response(value);
    }

    pub fn on_write_response_value(&mut self, value: &[u8]) {
        self.on_response(value);
    }

    fn on_response(&mut self, value: &[u8]) {
        if !matches!(self.state, ControllerState::Ready | ControllerState::Sending) {
            debug!("dropping response {:02x?} while {:?}", value, self.state);
            return;
        }

        match decode_response(value) {
            Ok(ResponseFrame::Confirmation { led_on }) => {
                info!("remote LED is {}", if led_on { "on" } else { "off" });
                self.state = ControllerState::Ready;
                self.events.push_back(ControllerEvent::Confirmed { led_on });
            }
            Ok(ResponseFrame::Error) => {
                warn!("{}", ERROR_RESPONSE_MESSAGE);
                self.state = ControllerState::Ready;
                self.events
                    .push_back(ControllerEvent::ErrorReceived(ERROR_RESPONSE_MESSAGE.to_string()));
            }
            Err(e) => warn!("dropping response {:02x?}: {}", value, e),
        }
    }

    /// The link went away. Outstanding commands are abandoned; call
    /// `start_discovery` again to reconnect.
    pub fn on_disconnected(&mut self) {
        if self.state == ControllerState::Sending {
            warn!("disconnected with a command outstanding");
        }
        let had_peer = self.peer.is_some();
        self.clear_link();
        self.state = ControllerState::Disconnected;
        if had_peer {
            info!("disconnected");
            self.events.push_back(ControllerEvent::Disconnected);
        }
    }

    fn clear_link(&mut self) {
        self.peer = None;
        self.command = None;
        self.response = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{CentralRequest, RequestQueue};
    use ledremote_proto::ble::{COMMAND_UUID, RESPONSE_UUID, SERVICE_UUID, properties};

    fn session() -> ControllerSession<RequestQueue> {
        ControllerSession::new(RequestQueue::new(), LinkConfig::default())
    }

    fn requests(s: &mut ControllerSession<RequestQueue>) -> Vec<CentralRequest> {
        s.stack_mut().drain().collect()
    }

    fn characteristics(command_props: u8) -> Vec<DiscoveredCharacteristic> {
        vec![
            DiscoveredCharacteristic {
                uuid: COMMAND_UUID,
                service: SERVICE_UUID,
                properties: command_props,
            },
            DiscoveredCharacteristic {
                uuid: RESPONSE_UUID,
                service: SERVICE_UUID,
                properties: properties::READ | properties::NOTIFY,
            },
        ]
    }

    fn ready(command_props: u8) -> ControllerSession<RequestQueue> {
        let mut s = session();
        let peer = LinkIdentity::new("peer-1");
        s.start_discovery();
        s.on_peer_discovered(&peer, Some("LedRemote"));
        s.on_connected(&peer);
        s.on_services_discovered(&[SERVICE_UUID]).unwrap();
        s.on_characteristics_discovered(&characteristics(command_props));
        s.stack_mut().drain().for_each(drop);
        while s.poll_event().is_some() {}
        s
    }

    #[test]
    fn full_discovery_sequence() {
        let mut s = session();
        let peer = LinkIdentity::new("peer-1");

        s.start_discovery();
        assert_eq!(s.state(), ControllerState::Scanning);
        assert_eq!(requests(&mut s), vec![CentralRequest::ScanForService(SERVICE_UUID)]);

        s.on_peer_discovered(&peer, Some("LedRemote"));
        assert_eq!(s.state(), ControllerState::Connecting);
        assert_eq!(requests(&mut s), vec![CentralRequest::Connect(peer.clone())]);

        s.on_connected(&peer);
        assert_eq!(s.state(), ControllerState::DiscoveringServices);
        assert_eq!(
            requests(&mut s),
            vec![CentralRequest::DiscoverServices {
                peer: peer.clone(),
                services: vec![SERVICE_UUID],
            }]
        );

        s.on_services_discovered(&[SERVICE_UUID]).unwrap();
        assert_eq!(s.state(), ControllerState::DiscoveringCharacteristics);
        assert_eq!(
            requests(&mut s),
            vec![CentralRequest::DiscoverCharacteristics {
                service: SERVICE_UUID,
                characteristics: vec![COMMAND_UUID, RESPONSE_UUID],
            }]
        );

        s.on_characteristics_discovered(&characteristics(properties::WRITE));
        assert_eq!(s.state(), ControllerState::Ready);
        assert_eq!(
            requests(&mut s),
            vec![CentralRequest::SetNotifyValue {
                characteristic: RESPONSE_UUID,
                enabled: true,
            }]
        );

        match s.poll_event() {
            Some(ControllerEvent::Connected(bound)) => {
                assert_eq!(bound.command.uuid, COMMAND_UUID);
                assert_eq!(bound.response.uuid, RESPONSE_UUID);
                assert!(bound.response.capabilities.notifiable);
            }
            other => panic!("expected Connected, got {:?}", other),
        }
        assert_eq!(s.poll_event(), None);
        assert_eq!(s.peer(), Some(&peer));
    }

    #[test]
    fn start_discovery_twice_scans_once() {
        let mut s = session();
        s.start_discovery();
        s.start_discovery();
        assert_eq!(s.stack().len(), 1);
    }

    #[test]
    fn radio_power_on_starts_scanning() {
        let mut s = session();
        s.on_radio_state_changed(RadioState::PoweredOff);
        assert_eq!(s.state(), ControllerState::Idle);
        s.on_radio_state_changed(RadioState::PoweredOn);
        assert_eq!(s.state(), ControllerState::Scanning);
    }

    #[test]
    fn other_device_is_not_connected() {
        let mut s = session();
        s.start_discovery();
        s.stack_mut().drain().for_each(drop);

        s.on_peer_discovered(&LinkIdentity::new("peer-2"), Some("OtherDevice"));
        s.on_peer_discovered(&LinkIdentity::new("peer-3"), None);
        assert_eq!(s.state(), ControllerState::Scanning);
        assert!(s.stack().is_empty());
    }

    #[test]
    fn first_matching_peer_wins() {
        let mut s = session();
        s.start_discovery();
        s.on_peer_discovered(&LinkIdentity::new("first"), Some("LedRemote"));
        s.on_peer_discovered(&LinkIdentity::new("second"), Some("LedRemote"));
        assert_eq!(s.peer(), Some(&LinkIdentity::new("first")));

        // connection of the other peer is not ours
        s.on_connected(&LinkIdentity::new("second"));
        assert_eq!(s.state(), ControllerState::Connecting);
    }

    #[test]
    fn missing_service_is_reported() {
        let mut s = session();
        let peer = LinkIdentity::new("peer-1");
        s.start_discovery();
        s.on_peer_discovered(&peer, Some("LedRemote"));
        s.on_connected(&peer);

        let other = ledremote_proto::ble::from_short(0x180f);
        assert_eq!(
            s.on_services_discovered(&[other]),
            Err(SessionError::ServiceNotFound(SERVICE_UUID))
        );
        assert_eq!(s.state(), ControllerState::DiscoveringServices);

        // retry with the right answer still works
        s.on_services_discovered(&[other, SERVICE_UUID]).unwrap();
        assert_eq!(s.state(), ControllerState::DiscoveringCharacteristics);
    }

    #[test]
    fn characteristics_bind_across_batches() {
        let mut s = session();
        let peer = LinkIdentity::new("peer-1");
        s.start_discovery();
        s.on_peer_discovered(&peer, Some("LedRemote"));
        s.on_connected(&peer);
        s.on_services_discovered(&[SERVICE_UUID]).unwrap();

        let all = characteristics(properties::WRITE);
        s.on_characteristics_discovered(&all[..1]);
        assert_eq!(s.state(), ControllerState::DiscoveringCharacteristics);
        assert_eq!(s.poll_event(), None);

        s.on_characteristics_discovered(&all[1..]);
        assert_eq!(s.state(), ControllerState::Ready);
        assert!(matches!(s.poll_event(), Some(ControllerEvent::Connected(_))));
    }

    #[test]
    fn response_without_notify_is_not_subscribed() {
        let mut s = session();
        let peer = LinkIdentity::new("peer-1");
        s.start_discovery();
        s.on_peer_discovered(&peer, Some("LedRemote"));
        s.on_connected(&peer);
        s.on_services_discovered(&[SERVICE_UUID]).unwrap();
        s.stack_mut().drain().for_each(drop);

        let mut chars = characteristics(properties::WRITE);
        chars[1].properties = properties::READ;
        s.on_characteristics_discovered(&chars);

        assert_eq!(s.state(), ControllerState::Ready);
        assert!(s.stack().is_empty());
    }

    #[test]
    fn turn_on_before_ready_fails() {
        let mut s = session();
        assert_eq!(s.turn_on(), Err(SessionError::NotReady(ControllerState::Idle)));

        s.start_discovery();
        s.stack_mut().drain().for_each(drop);
        assert_eq!(
            s.turn_off(),
            Err(SessionError::NotReady(ControllerState::Scanning))
        );
        assert!(s.stack().is_empty());
    }

    #[test]
    fn write_type_follows_command_capabilities() {
        let mut s = ready(properties::WRITE);
        s.turn_on().unwrap();
        assert_eq!(
            requests(&mut s),
            vec![CentralRequest::WriteValue {
                characteristic: COMMAND_UUID,
                value: vec![0x01, 0x01],
                write_type: WriteType::WithResponse,
            }]
        );

        let mut s = ready(properties::WRITE | properties::WRITE_WITHOUT_RESPONSE);
        s.turn_off().unwrap();
        assert_eq!(
            requests(&mut s),
            vec![CentralRequest::WriteValue {
                characteristic: COMMAND_UUID,
                value: vec![0x02, 0x01],
                write_type: WriteType::WithoutResponse,
            }]
        );
    }

    #[test]
    fn confirmation_is_reported_once() {
        let mut s = ready(properties::WRITE);
        s.turn_on().unwrap();
        assert_eq!(s.state(), ControllerState::Sending);

        s.on_notification_value(&[0x01, 0x01]);
        assert_eq!(s.state(), ControllerState::Ready);
        assert_eq!(s.poll_event(), Some(ControllerEvent::Confirmed { led_on: true }));
        assert_eq!(s.poll_event(), None);
    }

    #[test]
    fn error_frame_is_not_a_confirmation() {
        let mut s = ready(properties::WRITE);
        s.turn_on().unwrap();
        s.on_write_response_value(&[0x00, 0x00]);
        assert!(matches!(s.poll_event(), Some(ControllerEvent::ErrorReceived(_))));
        assert_eq!(s.poll_event(), None);
        assert_eq!(s.state(), ControllerState::Ready);
    }

    #[test]
    fn unknown_frames_are_dropped() {
        let mut s = ready(properties::WRITE);
        s.turn_off().unwrap();
        s.on_notification_value(&[0x01, 0x07]);
        s.on_notification_value(&[0x09, 0x01]);
        s.on_notification_value(&[0x01]);
        assert_eq!(s.poll_event(), None);
        assert_eq!(s.state(), ControllerState::Sending);
    }

    #[test]
    fn pipelined_sends_are_allowed() {
        let mut s = ready(properties::WRITE);
        s.turn_on().unwrap();
        s.turn_off().unwrap();
        assert_eq!(s.stack().len(), 2);
    }

    #[test]
    fn disconnect_abandons_outstanding_send() {
        let mut s = ready(properties::WRITE);
        s.turn_on().unwrap();
        s.on_disconnected();

        assert_eq!(s.state(), ControllerState::Disconnected);
        assert_eq!(s.poll_event(), Some(ControllerEvent::Disconnected));
        assert!(s.bound().is_none());
        assert!(s.peer().is_none());

        // late confirmation is ignored
        s.on_notification_value(&[0x01, 0x01]);
        assert_eq!(s.poll_event(), None);
        assert!(matches!(s.turn_on(), Err(SessionError::NotReady(_))));

        s.stack_mut().drain().for_each(drop);
        s.start_discovery();
        assert_eq!(s.state(), ControllerState::Scanning);
        assert_eq!(requests(&mut s), vec![CentralRequest::ScanForService(SERVICE_UUID)]);
    }

    #[test]
    fn radio_loss_while_ready_disconnects() {
        let mut s = ready(properties::WRITE);
        s.on_radio_state_changed(RadioState::PoweredOff);
        assert_eq!(s.state(), ControllerState::Disconnected);
        assert_eq!(s.poll_event(), Some(ControllerEvent::Disconnected));
    }

    #[test]
    fn power_cycle_while_scanning_rescans() {
        let mut s = session();
        s.on_radio_state_changed(RadioState::PoweredOn);
        assert_eq!(s.state(), ControllerState::Scanning);

        s.on_radio_state_changed(RadioState::PoweredOff);
        assert_eq!(s.state(), ControllerState::Disconnected);
        // no peer was picked yet, so nothing to report
        assert_eq!(s.poll_event(), None);
        s.stack_mut().drain().for_each(drop);

        s.on_radio_state_changed(RadioState::PoweredOn);
        assert_eq!(s.state(), ControllerState::Scanning);
        assert_eq!(requests(&mut s), vec![CentralRequest::ScanForService(SERVICE_UUID)]);
    }

    #[test]
    fn power_cycle_while_ready_reconnects() {
        let mut s = ready(properties::WRITE);
        s.on_radio_state_changed(RadioState::PoweredOff);
        assert_eq!(s.poll_event(), Some(ControllerEvent::Disconnected));

        s.on_radio_state_changed(RadioState::PoweredOn);
        assert_eq!(s.state(), ControllerState::Scanning);
        assert_eq!(requests(&mut s), vec![CentralRequest::ScanForService(SERVICE_UUID)]);
    }

    #[test]
    fn start_discovery_ignored_while_linked() {
        let peer = LinkIdentity::new("peer-1");

        let mut s = session();
        s.start_discovery();
        s.on_peer_discovered(&peer, Some("LedRemote"));
        s.stack_mut().drain().for_each(drop);
        s.start_discovery();
        assert_eq!(s.state(), ControllerState::Connecting);
        assert!(s.stack().is_empty());

        let mut s = ready(properties::WRITE);
        s.start_discovery();
        assert_eq!(s.state(), ControllerState::Ready);
        assert!(s.stack().is_empty());
        assert_eq!(s.peer(), Some(&peer));

        s.turn_on().unwrap();
        s.stack_mut().drain().for_each(drop);
        s.start_discovery();
        assert_eq!(s.state(), ControllerState::Sending);
        assert!(s.stack().is_empty());
        assert!(s.bound().is_some());

        // powering on again does not restart anything either
        s.on_radio_state_changed(RadioState::PoweredOn);
        assert_eq!(s.state(), ControllerState::Sending);
        assert!(s.stack().is_empty());
    }
}
