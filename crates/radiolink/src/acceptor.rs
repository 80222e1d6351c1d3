//! Inbound side: listen, reserve, handshake, admit
//!
//! Each accepted connection is handled on its own task so a peer that never
//! finishes its handshake cannot hold up the accept loop.

use crate::core::{ListeningEndpoint, RadioTransport, RawConnection};
use crate::handshake::{run_handshake, HandshakeContext, HandshakeOutcome, HandshakeRole};
use crate::link::Link;
use crate::registrar::LinkRegistrar;
use crate::registry::SocketRegistry;
use crate::types::ServiceId;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// First pause after a failed accept; doubles on each consecutive failure
const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(5);

/// Longest pause between accept attempts
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_millis(200);

/// Consecutive accept failures after which the endpoint is given up
pub const MAX_CONSECUTIVE_ACCEPT_FAILURES: u32 = 8;

/// Lifecycle of an [`Acceptor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorState {
    /// Created, not yet listening
    Idle,
    /// Endpoint open, accepting connections
    Listening,
    /// Stopped, or listening failed; terminal
    Stopped,
}

/// Accepts inbound raw connections and turns them into links
pub struct Acceptor {
    transport: Arc<dyn RadioTransport>,
    sockets: Arc<SocketRegistry>,
    registrar: Arc<LinkRegistrar>,
    handshake: HandshakeContext,
    service_name: String,
    service: ServiceId,
    state: Mutex<AcceptorState>,
    endpoint: Mutex<Option<Arc<dyn ListeningEndpoint>>>,
}

impl Acceptor {
    /// Create an idle acceptor
    pub fn new(
        transport: Arc<dyn RadioTransport>,
        sockets: Arc<SocketRegistry>,
        registrar: Arc<LinkRegistrar>,
        handshake: HandshakeContext,
        service_name: impl Into<String>,
        service: ServiceId,
    ) -> Self {
        Self {
            transport,
            sockets,
            registrar,
            handshake,
            service_name: service_name.into(),
            service,
            state: Mutex::new(AcceptorState::Idle),
            endpoint: Mutex::new(None),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> AcceptorState {
        *self.state.lock()
    }

    /// Open the endpoint and accept until [`stop`](Self::stop) is called.
    ///
    /// Returns immediately if the acceptor is not idle. A failed accept is
    /// retried after a growing pause; after
    /// [`MAX_CONSECUTIVE_ACCEPT_FAILURES`] in a row the acceptor stops.
    pub async fn run(self: Arc<Self>) {
        if self.state() != AcceptorState::Idle {
            return;
        }

        let endpoint = match self
            .transport
            .listen(&self.service_name, self.service)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(service = %self.service, error = %e, "failed to open listening endpoint");
                *self.state.lock() = AcceptorState::Stopped;
                return;
            }
        };

        {
            let mut state = self.state.lock();
            if *state == AcceptorState::Stopped {
                // stopped while the endpoint was being opened
                endpoint.close();
                return;
            }
            *state = AcceptorState::Listening;
            *self.endpoint.lock() = Some(Arc::clone(&endpoint));
        }
        info!(service = %self.service, name = %self.service_name, "accepting inbound connections");

        let mut failures = 0u32;
        let mut backoff = ACCEPT_BACKOFF_INITIAL;
        loop {
            match endpoint.accept().await {
                Ok(Some(connection)) => {
                    failures = 0;
                    backoff = ACCEPT_BACKOFF_INITIAL;
                    let acceptor = Arc::clone(&self);
                    tokio::spawn(async move { acceptor.handle(connection).await });
                }
                Ok(None) => break,
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_ACCEPT_FAILURES {
                        error!(service = %self.service, error = %e, failures, "giving up on listening endpoint");
                        self.stop();
                        break;
                    }
                    warn!(service = %self.service, error = %e, failures, "accept failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                    if self.state() == AcceptorState::Stopped {
                        break;
                    }
                }
            }
        }
        info!(service = %self.service, "acceptor stopped");
    }

    /// Close the endpoint. In-flight handshakes are left to finish.
    pub fn stop(&self) {
        *self.state.lock() = AcceptorState::Stopped;
        if let Some(endpoint) = self.endpoint.lock().take() {
            endpoint.close();
        }
    }

    async fn handle(&self, connection: RawConnection) {
        let peer = connection.peer().clone();
        let Some(reservation) = self.sockets.try_reserve(&peer) else {
            debug!(peer = %peer, "peer already has a raw connection, dropping inbound");
            connection.close().await;
            return;
        };

        match run_handshake(connection, HandshakeRole::Acceptor, &self.handshake).await {
            Ok(HandshakeOutcome::Established(handshake)) => {
                let link = Link::from_handshake(handshake, Some(reservation));
                if self.registrar.admit(Arc::clone(&link)).is_err() {
                    link.close();
                }
            }
            Ok(HandshakeOutcome::Declined {
                device_id, reason, ..
            }) => {
                debug!(peer = %peer, device_id = %device_id, ?reason, "inbound handshake declined");
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, kind = ?e.kind(), "inbound handshake failed");
            }
        }
    }
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("service", &self.service)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
