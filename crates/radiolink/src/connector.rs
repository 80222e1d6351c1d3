//! Outbound side: connect, reserve, handshake, admit

use crate::core::RadioTransport;
use crate::error::{LinkError, LinkResult};
use crate::handshake::{run_handshake, HandshakeContext, HandshakeOutcome, HandshakeRole};
use crate::link::Link;
use crate::registrar::LinkRegistrar;
use crate::registry::SocketRegistry;
use crate::types::{PeerAddress, ServiceId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Opens outbound connections to single peers
pub struct Connector {
    transport: Arc<dyn RadioTransport>,
    sockets: Arc<SocketRegistry>,
    registrar: Arc<LinkRegistrar>,
    handshake: HandshakeContext,
    service: ServiceId,
}

impl Connector {
    /// Create a connector
    pub fn new(
        transport: Arc<dyn RadioTransport>,
        sockets: Arc<SocketRegistry>,
        registrar: Arc<LinkRegistrar>,
        handshake: HandshakeContext,
        service: ServiceId,
    ) -> Self {
        Self {
            transport,
            sockets,
            registrar,
            handshake,
            service,
        }
    }

    /// Attempt a link to `peer`, logging the outcome. No retry.
    pub async fn run(self: Arc<Self>, peer: PeerAddress) {
        match self.connect(&peer).await {
            Ok(Some(link)) => {
                debug!(peer = %peer, link_id = link.id(), "outbound link admitted");
            }
            Ok(None) => {}
            Err(e) if e.is_benign() => {
                debug!(peer = %peer, error = %e, "outbound attempt abandoned");
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, kind = ?e.kind(), "outbound attempt failed");
            }
        }
    }

    /// Attempt a link to `peer`.
    ///
    /// Returns `Ok(None)` when the handshake declined to proceed (our own
    /// device, or a link for that device already exists).
    pub async fn connect(&self, peer: &PeerAddress) -> LinkResult<Option<Arc<Link>>> {
        self.transport.cancel_discovery();
        let connection = self.transport.connect(peer, self.service).await?;

        let Some(reservation) = self.sockets.try_reserve(peer) else {
            connection.close().await;
            return Err(LinkError::reservation_conflict(peer));
        };

        match run_handshake(connection, HandshakeRole::Connector, &self.handshake).await? {
            HandshakeOutcome::Established(handshake) => {
                let link = Link::from_handshake(handshake, Some(reservation));
                if let Err(e) = self.registrar.admit(Arc::clone(&link)) {
                    link.close();
                    return Err(e);
                }
                Ok(Some(link))
            }
            HandshakeOutcome::Declined {
                device_id, reason, ..
            } => {
                debug!(peer = %peer, device_id = %device_id, ?reason, "outbound handshake declined");
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}
