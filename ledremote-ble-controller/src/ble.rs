//! BLE client for LedRemote devices
//!
//! Runs a [`ControllerSession`] against a real adapter using btleplug: the
//! session queues requests, the [`Driver`] carries them out and feeds adapter
//! events, discovery results and notifications back in.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::pin::Pin;
use std::time::Duration;

use btleplug::api::{
    Central as _, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use log::*;
use uuid::Uuid;

use ledremote_proto::ble::{LinkConfig, LinkIdentity, RadioState};

use crate::session::{ControllerEvent, ControllerSession, ControllerState, SessionError};
use crate::stack::{CentralRequest, DiscoveredCharacteristic, RequestQueue, WriteType};

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;
type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// A device seen during a scan
#[derive(Debug, Clone)]
pub struct LedRemoteDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub is_led_remote: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("bluetooth error: {0}")]
    Btleplug(#[from] btleplug::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("timed out waiting for the remote LED")]
    Timeout,
    #[error("{0}")]
    Remote(String),
    #[error("disconnected from the remote LED")]
    Disconnected,
    #[error("adapter event stream closed")]
    EventStreamClosed,
    #[error("peer {0} is not known to the adapter")]
    UnknownPeer(LinkIdentity),
    #[error("characteristic {0} was not discovered")]
    UnknownCharacteristic(Uuid),
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, DriverError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(DriverError::NoAdapter)
}

/// Scan for BLE devices
///
/// Returns everything seen. Devices advertising the configured name or
/// service have `is_led_remote = true`.
pub async fn scan(config: &LinkConfig, duration: Duration) -> Result<Vec<LedRemoteDevice>, DriverError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let is_led_remote = props.local_name.as_deref() == Some(config.advertised_name.as_str())
                || props.services.contains(&config.service);
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let address = peripheral.address().to_string();

            devices.push(LedRemoteDevice { name, address, rssi: props.rssi, is_led_remote });
        }
    }

    adapter.stop_scan().await?;
    Ok(devices)
}

/// Find the remote LED, switch it, and wait for the confirmation
///
/// Returns the LED state the remote confirmed.
pub async fn set_led(config: LinkConfig, led_on: bool, timeout: Duration) -> Result<bool, DriverError> {
    let mut driver = Driver::new(config).await?;

    let result = tokio::time::timeout(timeout, driver.command(led_on))
        .await
        .unwrap_or(Err(DriverError::Timeout));

    if let Err(e) = driver.disconnect().await {
        debug!("disconnect failed: {}", e);
    }
    result
}

fn radio_state(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

/// Peers seen during the current scan, keyed by the adapter's own id.
///
/// Bluetooth addresses are not usable as keys: some platforms report the
/// same zero address for every peer.
struct Candidates<I, P> {
    seen: HashMap<I, P>,
}

impl<I: Debug + Eq + Hash, P> Candidates<I, P> {
    fn new() -> Self {
        Self { seen: HashMap::new() }
    }

    fn identity(id: &I) -> LinkIdentity {
        LinkIdentity::new(format!("{:?}", id))
    }

    fn insert(&mut self, id: I, peer: P) -> LinkIdentity {
        let identity = Self::identity(&id);
        self.seen.insert(id, peer);
        identity
    }

    fn get(&self, identity: &LinkIdentity) -> Option<&P> {
        self.seen
            .iter()
            .find(|(id, _)| Self::identity(id) == *identity)
            .map(|(_, peer)| peer)
    }

    fn clear(&mut self) {
        self.seen.clear();
    }

    fn len(&self) -> usize {
        self.seen.len()
    }
}

/// Drives a controller session with a btleplug adapter
pub struct Driver {
    adapter: Adapter,
    events: EventStream,
    notifications: Option<NotificationStream>,
    candidates: Candidates<PeripheralId, Peripheral>,
    peripheral: Option<Peripheral>,
    characteristics: Vec<Characteristic>,
    session: ControllerSession<RequestQueue>,
}

impl Driver {
    /// Use the first adapter on the system
    pub async fn new(config: LinkConfig) -> Result<Self, DriverError> {
        let adapter = get_adapter().await?;
        Self::with_adapter(adapter, config).await
    }

    pub async fn with_adapter(adapter: Adapter, config: LinkConfig) -> Result<Self, DriverError> {
        let events = adapter.events().await?;
        Ok(Self {
            adapter,
            events,
            notifications: None,
            candidates: Candidates::new(),
            peripheral: None,
            characteristics: Vec::new(),
            session: ControllerSession::new(RequestQueue::new(), config),
        })
    }

    pub fn session(&self) -> &ControllerSession<RequestQueue> {
        &self.session
    }

    pub async fn start_discovery(&mut self) -> Result<(), DriverError> {
        self.session.start_discovery();
        self.flush().await
    }

    /// Write a command. The outcome arrives through `next_event`.
    pub async fn send(&mut self, led_on: bool) -> Result<(), DriverError> {
        self.session.send(led_on)?;
        self.flush().await
    }

    /// Discover, connect, send one command and wait for its answer
    pub async fn command(&mut self, led_on: bool) -> Result<bool, DriverError> {
        self.start_discovery().await?;
        loop {
            match self.next_event().await? {
                ControllerEvent::Connected(_) => self.send(led_on).await?,
                ControllerEvent::Confirmed { led_on } => return Ok(led_on),
                ControllerEvent::ErrorReceived(message) => return Err(DriverError::Remote(message)),
                ControllerEvent::Disconnected => return Err(DriverError::Disconnected),
            }
        }
    }

    /// Wait for the next outcome event, pumping adapter events meanwhile
    pub async fn next_event(&mut self) -> Result<ControllerEvent, DriverError> {
        loop {
            self.flush().await?;
            if let Some(event) = self.session.poll_event() {
                return Ok(event);
            }
            self.wait_for_input().await?;
        }
    }

    pub async fn disconnect(&mut self) -> Result<(), DriverError> {
        if self.session.state() == ControllerState::Scanning {
            self.adapter.stop_scan().await?;
        }
        self.notifications = None;
        self.characteristics.clear();
        self.candidates.clear();
        if let Some(peripheral) = self.peripheral.take() {
            peripheral.disconnect().await?;
            self.session.on_disconnected();
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), DriverError> {
        while let Some(request) = self.session.stack_mut().pop() {
            self.execute(request).await?;
        }
        Ok(())
    }

    async fn execute(&mut self, request: CentralRequest) -> Result<(), DriverError> {
        debug!("executing {:?}", request);
        match request {
            CentralRequest::ScanForService(service) => {
                self.candidates.clear();
                let filter = ScanFilter { services: vec![service] };
                self.adapter.start_scan(filter).await?;
            }
            CentralRequest::Connect(peer) => {
                let peripheral = self
                    .candidates
                    .get(&peer)
                    .cloned()
                    .ok_or_else(|| DriverError::UnknownPeer(peer.clone()))?;

                if let Err(e) = self.adapter.stop_scan().await {
                    debug!("stop_scan failed: {}", e);
                }
                match peripheral.connect().await {
                    Ok(()) => {
                        self.peripheral = Some(peripheral);
                        self.session.on_connected(&peer);
                    }
                    Err(e) => {
                        warn!("failed to connect to {}: {}", peer, e);
                        self.session.on_disconnected();
                    }
                }
            }
            CentralRequest::DiscoverServices { services, .. } => {
                let peripheral = self.connected()?;
                peripheral.discover_services().await?;
                let found: Vec<Uuid> = peripheral
                    .services()
                    .into_iter()
                    .map(|s| s.uuid)
                    .filter(|uuid| services.contains(uuid))
                    .collect();
                self.session.on_services_discovered(&found)?;
            }
            CentralRequest::DiscoverCharacteristics { service, characteristics } => {
                // btleplug already found the characteristics during service discovery
                let peripheral = self.connected()?;
                self.characteristics = peripheral
                    .characteristics()
                    .into_iter()
                    .filter(|c| c.service_uuid == service && characteristics.contains(&c.uuid))
                    .collect();

                let discovered: Vec<DiscoveredCharacteristic> = self
                    .characteristics
                    .iter()
                    .map(|c| DiscoveredCharacteristic {
                        uuid: c.uuid,
                        service: c.service_uuid,
                        properties: c.properties.bits(),
                    })
                    .collect();
                self.session.on_characteristics_discovered(&discovered);
            }
            CentralRequest::WriteValue { characteristic, value, write_type } => {
                let peripheral = self.connected()?;
                let target = self.characteristic(characteristic)?;
                let write_type = match write_type {
                    WriteType::WithResponse => btleplug::api::WriteType::WithResponse,
                    WriteType::WithoutResponse => btleplug::api::WriteType::WithoutResponse,
                };
                peripheral.write(&target, &value, write_type).await?;
            }
            CentralRequest::SetNotifyValue { characteristic, enabled } => {
                let peripheral = self.connected()?;
                let target = self.characteristic(characteristic)?;
                if enabled {
                    // take the stream first so the first notification is not missed
                    self.notifications = Some(peripheral.notifications().await?);
                    peripheral.subscribe(&target).await?;
                } else {
                    peripheral.unsubscribe(&target).await?;
                    self.notifications = None;
                }
            }
        }
        Ok(())
    }

    async fn wait_for_input(&mut self) -> Result<(), DriverError> {
        let response = self.session.config().response_characteristic;
        tokio::select! {
            event = self.events.next() => {
                let event = event.ok_or(DriverError::EventStreamClosed)?;
                self.on_central_event(event).await?;
            }
            Some(notification) = next_notification(&mut self.notifications) => {
                if notification.uuid == response {
                    self.session.on_notification_value(&notification.value);
                } else {
                    debug!("ignoring notification from {}", notification.uuid);
                }
            }
        }
        Ok(())
    }

    async fn on_central_event(&mut self, event: CentralEvent) -> Result<(), DriverError> {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if self.session.state() != ControllerState::Scanning {
                    return Ok(());
                }
                let peripheral = self.adapter.peripheral(&id).await?;
                let name = peripheral.properties().await?.and_then(|p| p.local_name);
                let address = peripheral.address();

                let peer = self.candidates.insert(id, peripheral);
                debug!("seen {:?} at {} ({} candidates)", name, address, self.candidates.len());
                self.session.on_peer_discovered(&peer, name.as_deref());
            }
            CentralEvent::DeviceDisconnected(id) => {
                if self.peripheral.as_ref().is_some_and(|p| p.id() == id) {
                    self.drop_link();
                    self.session.on_disconnected();
                }
            }
            CentralEvent::StateUpdate(state) => {
                let radio = radio_state(state);
                if !radio.is_powered_on() {
                    self.drop_link();
                }
                self.session.on_radio_state_changed(radio);
            }
            _ => {}
        }
        Ok(())
    }

    fn drop_link(&mut self) {
        self.peripheral = None;
        self.notifications = None;
        self.characteristics.clear();
    }

    fn connected(&self) -> Result<Peripheral, DriverError> {
        self.peripheral.clone().ok_or(DriverError::Disconnected)
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, DriverError> {
        self.characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or(DriverError::UnknownCharacteristic(uuid))
    }
}

async fn next_notification(stream: &mut Option<NotificationStream>) -> Option<ValueNotification> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
