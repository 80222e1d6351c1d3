//! Collaborator boundaries
//!
//! Everything the link provider needs from the outside world: the radio
//! transport, certificate verification, and the upper layer that consumes
//! links. Implementations live outside this crate, except for the in-memory
//! radio in [`implementations::memory`](super::implementations::memory).

use super::connection::RawConnection;
use crate::error::LinkResult;
use crate::link::Link;
use crate::types::{Certificate, Packet, PeerAddress, ServiceId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Asynchronous notification from the radio transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A capability query completed: `peer` currently advertises these
    /// service identifiers
    PeerAdvertisedCapability {
        /// Peer the query was about
        peer: PeerAddress,
        /// Advertised service identifiers, in whatever byte order the stack
        /// reports them
        capabilities: Vec<Uuid>,
    },
}

/// An open listening endpoint
#[async_trait]
pub trait ListeningEndpoint: Send + Sync {
    /// Wait for the next inbound connection. Returns `Ok(None)` once the
    /// endpoint has been closed.
    async fn accept(&self) -> LinkResult<Option<RawConnection>>;

    /// Close the endpoint, unblocking any pending [`accept`](Self::accept)
    fn close(&self);
}

/// Raw radio transport interface
#[async_trait]
pub trait RadioTransport: Send + Sync + 'static {
    /// Whether an adapter is present and switched on
    fn is_available(&self) -> bool;

    /// Open a listening endpoint advertising `service`
    async fn listen(
        &self,
        service_name: &str,
        service: ServiceId,
    ) -> LinkResult<Arc<dyn ListeningEndpoint>>;

    /// Open an outbound connection to `peer`'s `service`
    async fn connect(&self, peer: &PeerAddress, service: ServiceId) -> LinkResult<RawConnection>;

    /// Peers already paired at the transport level
    async fn paired_peers(&self) -> LinkResult<Vec<PeerAddress>>;

    /// Ask whether `peer` currently advertises our service. The answer arrives
    /// later as a [`TransportEvent::PeerAdvertisedCapability`].
    async fn fetch_capabilities(&self, peer: &PeerAddress) -> LinkResult<()>;

    /// Stop any passive scan in progress
    fn cancel_discovery(&self);

    /// Register for transport events. Dropping the receiver deregisters.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;
}

/// Certificate parsing and validation
pub trait IdentityVerifier: Send + Sync + 'static {
    /// Parse and validate DER certificate bytes received from a peer
    fn parse_certificate(&self, der: &[u8]) -> LinkResult<Certificate>;
}

/// Upper layer consuming established links
///
/// Called from inside the registrar's critical section; implementations must
/// return quickly and must not call back into the registrar.
pub trait LinkObserver: Send + Sync + 'static {
    /// A link became the current link for its device
    fn on_link_established(&self, link: &Arc<Link>);

    /// A link was torn down
    fn on_link_lost(&self, link: &Arc<Link>);

    /// A packet arrived on a live link. The peer's identity packet is always
    /// the first packet delivered.
    fn on_packet_received(&self, _link: &Arc<Link>, _packet: Packet) {}
}
