//! Discovery of paired peers advertising our service
//!
//! A pass enumerates paired peers, asks every peer without a raw connection
//! what it currently advertises, and then listens for the answers during a
//! bounded window. Each matching answer starts at most one connector per
//! address. Once the window closes nothing more happens until the next pass.

use crate::connector::Connector;
use crate::core::{RadioTransport, TransportEvent};
use crate::registry::{AttemptRegistry, SocketRegistry};
use crate::types::ServiceId;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Finds peers worth connecting to and hands them to the [`Connector`]
pub struct Discoverer {
    transport: Arc<dyn RadioTransport>,
    sockets: Arc<SocketRegistry>,
    attempts: Arc<AttemptRegistry>,
    connector: Arc<Connector>,
    service: ServiceId,
    window: Duration,
    stopped: watch::Sender<bool>,
}

impl Discoverer {
    /// Create a discoverer listening `window` long per pass
    pub fn new(
        transport: Arc<dyn RadioTransport>,
        sockets: Arc<SocketRegistry>,
        attempts: Arc<AttemptRegistry>,
        connector: Arc<Connector>,
        service: ServiceId,
        window: Duration,
    ) -> Self {
        Self {
            transport,
            sockets,
            attempts,
            connector,
            service,
            window,
            stopped: watch::Sender::new(false),
        }
    }

    /// Run one discovery pass. Does nothing once [`stop`](Self::stop) has
    /// been called.
    pub async fn run(self: Arc<Self>) {
        let mut stopped = self.stopped.subscribe();
        if *stopped.borrow() {
            return;
        }

        // register before querying so no answer can slip past
        let mut events = self.transport.subscribe();
        self.query_paired_peers().await;

        let window = tokio::time::sleep(self.window);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                _ = stopped.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        debug!(service = %self.service, "discovery window closed");
    }

    /// End the current window and refuse further passes
    pub fn stop(&self) {
        self.stopped.send_replace(true);
    }

    async fn query_paired_peers(&self) {
        let peers = match self.transport.paired_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(error = %e, "could not enumerate paired peers");
                return;
            }
        };

        let candidates: Vec<_> = peers
            .into_iter()
            .filter(|peer| {
                let connected = self.sockets.is_reserved(peer);
                if connected {
                    trace!(peer = %peer, "skipping peer with an open connection");
                }
                !connected
            })
            .collect();
        info!(candidates = candidates.len(), "querying paired peers");

        let queries = candidates
            .iter()
            .map(|peer| self.transport.fetch_capabilities(peer));
        for (peer, result) in candidates.iter().zip(join_all(queries).await) {
            if let Err(e) = result {
                warn!(peer = %peer, error = %e, "capability query failed");
            }
        }
    }

    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerAdvertisedCapability { peer, capabilities } => {
                if !capabilities.iter().any(|uuid| self.service.matches(uuid)) {
                    trace!(peer = %peer, "peer does not advertise our service");
                    return;
                }
                if *self.stopped.borrow() {
                    return;
                }
                if self.sockets.is_reserved(&peer) {
                    trace!(peer = %peer, "peer already has a raw connection");
                    return;
                }
                let task = Arc::clone(&self.connector).run(peer.clone());
                if self.attempts.start_if_absent(peer.clone(), task) {
                    debug!(peer = %peer, "starting outbound attempt");
                }
            }
        }
    }
}

impl std::fmt::Debug for Discoverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discoverer")
            .field("service", &self.service)
            .field("window", &self.window)
            .field("stopped", &*self.stopped.borrow())
            .finish_non_exhaustive()
    }
}
