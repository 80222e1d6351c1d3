//! Link provider lifecycle
//!
//! [`RadioLinkProvider`] owns the registries and the registrar for its whole
//! lifetime, and a fresh acceptor/discoverer pair for every `start()`.
//! Established links survive `stop()`; only listening and discovery end.
//!
//! # Blocking Lock Usage
//!
//! The running components sit behind a `parking_lot::Mutex` that is only held
//! to swap them in or out, never across `.await`.

use crate::acceptor::{Acceptor, AcceptorState};
use crate::config::LinkProviderConfig;
use crate::connector::Connector;
use crate::core::{IdentityVerifier, LinkObserver, RadioTransport, SplitMultiplexer, StreamMultiplexer};
use crate::discovery::Discoverer;
use crate::error::LinkResult;
use crate::handshake::HandshakeContext;
use crate::registrar::LinkRegistrar;
use crate::registry::{AttemptRegistry, SocketRegistry};
use crate::types::LocalIdentity;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Name the provider registers under
pub const PROVIDER_NAME: &str = "RadioLinkProvider";

/// Preference among link providers; higher wins
pub const PROVIDER_PRIORITY: i32 = 10;

struct Running {
    acceptor: Arc<Acceptor>,
    discoverer: Arc<Discoverer>,
}

/// Short-range radio link provider
pub struct RadioLinkProvider {
    config: LinkProviderConfig,
    transport: Arc<dyn RadioTransport>,
    sockets: Arc<SocketRegistry>,
    attempts: Arc<AttemptRegistry>,
    registrar: Arc<LinkRegistrar>,
    handshake: HandshakeContext,
    running: Mutex<Option<Running>>,
}

impl RadioLinkProvider {
    /// Create a stopped provider. Fails if `config` does not validate.
    pub fn new(
        transport: Arc<dyn RadioTransport>,
        local: LocalIdentity,
        verifier: Arc<dyn IdentityVerifier>,
        observer: Arc<dyn LinkObserver>,
        config: LinkProviderConfig,
    ) -> LinkResult<Self> {
        config.validate()?;
        let registrar = Arc::new(LinkRegistrar::new(observer));
        let handshake = HandshakeContext {
            local: Arc::new(local),
            verifier,
            multiplexer: Arc::new(SplitMultiplexer),
            links: registrar.clone(),
            settle_delay: config.settle_delay(),
            timeout: config.handshake_timeout(),
        };
        Ok(Self {
            config,
            transport,
            sockets: Arc::new(SocketRegistry::new()),
            attempts: Arc::new(AttemptRegistry::new()),
            registrar,
            handshake,
            running: Mutex::new(None),
        })
    }

    /// Replace the stream multiplexer used for new connections
    pub fn with_multiplexer(mut self, multiplexer: Arc<dyn StreamMultiplexer>) -> Self {
        self.handshake.multiplexer = multiplexer;
        self
    }

    /// Start listening and run one discovery pass.
    ///
    /// Does nothing if already running, disabled in the configuration, or the
    /// transport has no usable adapter. Must be called from within a Tokio
    /// runtime.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("link provider already running");
            return;
        }
        if !self.config.enabled {
            info!("link provider disabled, not starting");
            return;
        }
        if !self.transport.is_available() {
            info!("no usable radio adapter, not starting");
            return;
        }

        let connector = Arc::new(Connector::new(
            self.transport.clone(),
            self.sockets.clone(),
            self.registrar.clone(),
            self.handshake.clone(),
            self.config.service_id,
        ));
        let acceptor = Arc::new(Acceptor::new(
            self.transport.clone(),
            self.sockets.clone(),
            self.registrar.clone(),
            self.handshake.clone(),
            self.config.service_name.clone(),
            self.config.service_id,
        ));
        let discoverer = Arc::new(Discoverer::new(
            self.transport.clone(),
            self.sockets.clone(),
            self.attempts.clone(),
            connector,
            self.config.service_id,
            self.config.discovery_window(),
        ));

        tokio::spawn(acceptor.clone().run());
        tokio::spawn(discoverer.clone().run());
        info!(service = %self.config.service_id, "link provider started");
        *running = Some(Running {
            acceptor,
            discoverer,
        });
    }

    /// Stop listening and discovery. Established links stay up.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.acceptor.stop();
        running.discoverer.stop();
        info!("link provider stopped");
    }

    /// Restart after the network environment changed
    pub fn on_network_changed(&self) {
        self.stop();
        self.start();
    }

    /// Run another discovery pass without touching the acceptor
    pub fn rediscover(&self) {
        if let Some(running) = self.running.lock().as_ref() {
            tokio::spawn(running.discoverer.clone().run());
        }
    }

    /// Whether `start()` took effect and `stop()` has not been called since
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// State of the current acceptor, if running
    pub fn acceptor_state(&self) -> Option<AcceptorState> {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.acceptor.state())
    }

    /// Provider name
    pub fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    /// Provider priority
    pub fn priority(&self) -> i32 {
        PROVIDER_PRIORITY
    }

    /// Active configuration
    pub fn config(&self) -> &LinkProviderConfig {
        &self.config
    }

    /// Registrar holding the live links
    pub fn registrar(&self) -> &Arc<LinkRegistrar> {
        &self.registrar
    }

    /// Peer addresses with an open raw connection
    pub fn sockets(&self) -> &Arc<SocketRegistry> {
        &self.sockets
    }

    /// Outbound connection attempts
    pub fn attempts(&self) -> &Arc<AttemptRegistry> {
        &self.attempts
    }
}

impl Drop for RadioLinkProvider {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RadioLinkProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioLinkProvider")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("registrar", &self.registrar)
            .finish_non_exhaustive()
    }
}
