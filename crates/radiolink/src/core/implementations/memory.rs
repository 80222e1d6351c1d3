//! In-memory radio for testing and simulation
//!
//! A [`MemoryRadio`] is a shared medium; each [`MemoryRadioAdapter`] is one
//! device on it. Connections are `tokio::io::duplex` pipes, capability answers
//! are delivered asynchronously on a spawned task, and every adapter keeps
//! counters so tests can assert on transport activity.

use crate::core::connection::RawConnection;
use crate::core::traits::{ListeningEndpoint, RadioTransport, TransportEvent};
use crate::error::{LinkError, LinkResult};
use crate::types::{PeerAddress, ServiceId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Pipe capacity for in-memory connections
const PIPE_CAPACITY: usize = 64 * 1024;

/// Transport activity counters for one adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterStats {
    /// Outbound connections opened successfully
    pub connections_opened: u64,
    /// Inbound connections delivered to a listening endpoint
    pub connections_received: u64,
    /// Capability queries issued
    pub capability_queries: u64,
    /// Calls to `cancel_discovery`
    pub discovery_cancellations: u64,
}

#[derive(Default)]
struct DeviceState {
    available: bool,
    paired: BTreeSet<PeerAddress>,
    listeners: HashMap<Uuid, mpsc::UnboundedSender<RawConnection>>,
    advertised_override: Option<Vec<Uuid>>,
    subscribers: Vec<mpsc::UnboundedSender<TransportEvent>>,
    stats: AdapterStats,
}

impl DeviceState {
    fn advertised(&self) -> Vec<Uuid> {
        if !self.available {
            return Vec::new();
        }
        match &self.advertised_override {
            Some(uuids) => uuids.clone(),
            None => self.listeners.keys().copied().collect(),
        }
    }
}

#[derive(Default)]
struct Medium {
    devices: HashMap<PeerAddress, DeviceState>,
}

impl Medium {
    fn device(&self, address: &PeerAddress) -> LinkResult<&DeviceState> {
        self.devices
            .get(address)
            .ok_or_else(|| LinkError::transport(format!("unknown device {address}")))
    }

    fn device_mut(&mut self, address: &PeerAddress) -> LinkResult<&mut DeviceState> {
        self.devices
            .get_mut(address)
            .ok_or_else(|| LinkError::transport(format!("unknown device {address}")))
    }
}

/// Shared in-memory radio medium
#[derive(Clone, Default)]
pub struct MemoryRadio {
    medium: Arc<Mutex<Medium>>,
}

impl MemoryRadio {
    /// Create an empty medium
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device to the medium and return its adapter
    pub fn adapter(&self, address: impl Into<PeerAddress>) -> MemoryRadioAdapter {
        let address = address.into();
        self.medium
            .lock()
            .devices
            .entry(address.clone())
            .or_insert_with(|| DeviceState {
                available: true,
                ..Default::default()
            });
        MemoryRadioAdapter {
            address,
            medium: self.medium.clone(),
        }
    }

    /// Pair two devices with each other
    pub fn pair(&self, a: &PeerAddress, b: &PeerAddress) {
        let mut medium = self.medium.lock();
        if let Some(device) = medium.devices.get_mut(a) {
            device.paired.insert(b.clone());
        }
        if let Some(device) = medium.devices.get_mut(b) {
            device.paired.insert(a.clone());
        }
    }
}

/// One device on a [`MemoryRadio`]
#[derive(Clone)]
pub struct MemoryRadioAdapter {
    address: PeerAddress,
    medium: Arc<Mutex<Medium>>,
}

impl MemoryRadioAdapter {
    /// This device's transport address
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Switch the adapter on or off
    pub fn set_available(&self, available: bool) {
        if let Some(device) = self.medium.lock().devices.get_mut(&self.address) {
            device.available = available;
        }
    }

    /// Report these identifiers in capability answers instead of the services
    /// actually being listened on
    pub fn advertise_as(&self, capabilities: Vec<Uuid>) {
        if let Some(device) = self.medium.lock().devices.get_mut(&self.address) {
            device.advertised_override = Some(capabilities);
        }
    }

    /// Snapshot of this adapter's counters
    pub fn stats(&self) -> AdapterStats {
        self.medium
            .lock()
            .devices
            .get(&self.address)
            .map(|device| device.stats)
            .unwrap_or_default()
    }

    /// Deliver an event to this adapter's subscribers, as the radio stack
    /// would after a capability query
    pub fn inject_event(&self, event: TransportEvent) {
        let mut medium = self.medium.lock();
        if let Some(device) = medium.devices.get_mut(&self.address) {
            device
                .subscribers
                .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        }
    }
}

#[async_trait]
impl RadioTransport for MemoryRadioAdapter {
    fn is_available(&self) -> bool {
        self.medium
            .lock()
            .devices
            .get(&self.address)
            .is_some_and(|device| device.available)
    }

    async fn listen(
        &self,
        service_name: &str,
        service: ServiceId,
    ) -> LinkResult<Arc<dyn ListeningEndpoint>> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        {
            let mut medium = self.medium.lock();
            let device = medium.device_mut(&self.address)?;
            if !device.available {
                return Err(LinkError::transport("adapter is switched off"));
            }
            if device.listeners.contains_key(&service.uuid()) {
                return Err(LinkError::transport(format!(
                    "already listening on {service}"
                )));
            }
            device.listeners.insert(service.uuid(), queue_tx);
        }

        tracing::debug!(
            address = %self.address,
            service = %service,
            service_name,
            "memory radio listening"
        );
        let (closed, closed_rx) = watch::channel(false);
        Ok(Arc::new(MemoryEndpoint {
            address: self.address.clone(),
            service,
            medium: self.medium.clone(),
            queue: tokio::sync::Mutex::new(queue_rx),
            closed,
            closed_rx,
        }))
    }

    async fn connect(&self, peer: &PeerAddress, service: ServiceId) -> LinkResult<RawConnection> {
        let mut medium = self.medium.lock();
        if !medium.device(&self.address)?.available {
            return Err(LinkError::transport("adapter is switched off"));
        }

        let target = medium.device_mut(peer)?;
        if !target.available {
            return Err(LinkError::transport(format!("{peer} is out of range")));
        }
        let queue = target
            .listeners
            .get(&service.uuid())
            .ok_or_else(|| LinkError::transport(format!("{peer} is not listening on {service}")))?;

        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        queue
            .send(RawConnection::new(self.address.clone(), remote))
            .map_err(|_| LinkError::transport(format!("{peer} stopped listening")))?;
        target.stats.connections_received += 1;

        medium.device_mut(&self.address)?.stats.connections_opened += 1;
        Ok(RawConnection::new(peer.clone(), local))
    }

    async fn paired_peers(&self) -> LinkResult<Vec<PeerAddress>> {
        let medium = self.medium.lock();
        let device = medium.device(&self.address)?;
        Ok(device.paired.iter().cloned().collect())
    }

    async fn fetch_capabilities(&self, peer: &PeerAddress) -> LinkResult<()> {
        let (capabilities, subscribers) = {
            let mut medium = self.medium.lock();
            let capabilities = medium
                .devices
                .get(peer)
                .map(DeviceState::advertised)
                .unwrap_or_default();
            let device = medium.device_mut(&self.address)?;
            device.stats.capability_queries += 1;
            device.subscribers.retain(|s| !s.is_closed());
            (capabilities, device.subscribers.clone())
        };

        let event = TransportEvent::PeerAdvertisedCapability {
            peer: peer.clone(),
            capabilities,
        };
        tokio::spawn(async move {
            for subscriber in subscribers {
                let _ = subscriber.send(event.clone());
            }
        });
        Ok(())
    }

    fn cancel_discovery(&self) {
        if let Some(device) = self.medium.lock().devices.get_mut(&self.address) {
            device.stats.discovery_cancellations += 1;
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(device) = self.medium.lock().devices.get_mut(&self.address) {
            device.subscribers.push(tx);
        }
        rx
    }
}

struct MemoryEndpoint {
    address: PeerAddress,
    service: ServiceId,
    medium: Arc<Mutex<Medium>>,
    queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<RawConnection>>,
    closed: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

#[async_trait]
impl ListeningEndpoint for MemoryEndpoint {
    async fn accept(&self) -> LinkResult<Option<RawConnection>> {
        let mut closed = self.closed_rx.clone();
        if *closed.borrow() {
            return Ok(None);
        }

        let mut queue = self.queue.lock().await;
        tokio::select! {
            _ = closed.changed() => Ok(None),
            connection = queue.recv() => Ok(connection),
        }
    }

    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        if let Some(device) = self.medium.lock().devices.get_mut(&self.address) {
            device.listeners.remove(&self.service.uuid());
        }
        tracing::debug!(address = %self.address, service = %self.service, "memory radio endpoint closed");
    }
}
