//! What the controller session asks of the BLE central stack
//!
//! Every call is a request. Completions come back later as separate session
//! events, so nothing here returns a result.

use std::collections::VecDeque;

use uuid::Uuid;

use ledremote_proto::ble::LinkIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// A characteristic as reported by characteristic discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub service: Uuid,
    /// Raw GATT property bits
    pub properties: u8,
}

/// Trait for BLE central implementations
pub trait CentralStack {
    /// Scan for peers advertising `service`
    fn scan_for_service(&mut self, service: Uuid);

    fn connect(&mut self, peer: &LinkIdentity);

    fn discover_services(&mut self, peer: &LinkIdentity, services: &[Uuid]);

    fn discover_characteristics(&mut self, service: Uuid, characteristics: &[Uuid]);

    fn write_value(&mut self, characteristic: Uuid, value: &[u8], write_type: WriteType);

    fn set_notify_value(&mut self, characteristic: Uuid, enabled: bool);
}

/// One queued request, see [`RequestQueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralRequest {
    ScanForService(Uuid),
    Connect(LinkIdentity),
    DiscoverServices {
        peer: LinkIdentity,
        services: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    WriteValue {
        characteristic: Uuid,
        value: Vec<u8>,
        write_type: WriteType,
    },
    SetNotifyValue {
        characteristic: Uuid,
        enabled: bool,
    },
}

/// A `CentralStack` that just records requests in order.
///
/// Async drivers pop requests off the queue and carry them out against a
/// real adapter.
#[derive(Debug, Default)]
pub struct RequestQueue {
    requests: VecDeque<CentralRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&mut self) -> Option<CentralRequest> {
        self.requests.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = CentralRequest> + '_ {
        self.requests.drain(..)
    }
}

impl CentralStack for RequestQueue {
    fn scan_for_service(&mut self, service: Uuid) {
        self.requests.push_back(CentralRequest::ScanForService(service));
    }

    fn connect(&mut self, peer: &LinkIdentity) {
        self.requests.push_back(CentralRequest::Connect(peer.clone()));
    }

    fn discover_services(&mut self, peer: &LinkIdentity, services: &[Uuid]) {
        self.requests.push_back(CentralRequest::DiscoverServices {
            peer: peer.clone(),
            services: services.to_vec(),
        });
    }

    fn discover_characteristics(&mut self, service: Uuid, characteristics: &[Uuid]) {
        self.requests.push_back(CentralRequest::DiscoverCharacteristics {
            service,
            characteristics: characteristics.to_vec(),
        });
    }

    fn write_value(&mut self, characteristic: Uuid, value: &[u8], write_type: WriteType) {
        self.requests.push_back(CentralRequest::WriteValue {
            characteristic,
            value: value.to_vec(),
            write_type,
        });
    }

    fn set_notify_value(&mut self, characteristic: Uuid, enabled: bool) {
        self.requests.push_back(CentralRequest::SetNotifyValue {
            characteristic,
            enabled,
        });
    }
}
