//! Established links
//!
//! A [`Link`] is created from a successful [`Handshake`] and owns everything
//! that came with it: the buffered input stream, the output stream, and the
//! socket reservation for the peer address. Outgoing packets go through a
//! writer task so `send_packet` can be called from anywhere; incoming packets
//! are read by a reader task that the registrar starts on admission.

use crate::core::{BoxedReader, BoxedWriter, MultiplexedChannel};
use crate::error::{LinkError, LinkResult};
use crate::handshake::Handshake;
use crate::registrar::LinkRegistrar;
use crate::registry::SocketReservation;
use crate::types::{Packet, PeerAddress, PeerIdentity, PACKET_TERMINATOR};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

struct Outgoing {
    frame: Vec<u8>,
    flushed: oneshot::Sender<LinkResult<()>>,
}

/// An authenticated, packet-framed channel to one peer device
pub struct Link {
    id: u64,
    peer: PeerAddress,
    identity: PeerIdentity,
    identity_packet: Packet,
    outbound: mpsc::UnboundedSender<Outgoing>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    input: Mutex<Option<BufReader<BoxedReader>>>,
    reservation: Mutex<Option<SocketReservation>>,
}

impl Link {
    /// Wrap a completed handshake. The link takes over the socket reservation
    /// and releases it when closed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_handshake(handshake: Handshake, reservation: Option<SocketReservation>) -> Arc<Self> {
        let Handshake {
            identity,
            payload,
            channel,
        } = handshake;
        let peer = channel.peer().clone();
        let MultiplexedChannel { input, output, .. } = channel;

        let id = NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed);
        let (outbound, queue) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(write_loop(id, peer.clone(), output, queue, shutdown_rx));

        Arc::new(Self {
            id,
            peer,
            identity,
            identity_packet: payload,
            outbound,
            shutdown,
            closed: AtomicBool::new(false),
            input: Mutex::new(Some(input)),
            reservation: Mutex::new(reservation),
        })
    }

    /// Process-unique instance identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Transport address of the peer
    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    /// Authenticated identity of the peer
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Device id of the peer
    pub fn device_id(&self) -> &str {
        &self.identity.device_id
    }

    /// The identity packet the peer sent during the handshake
    pub fn identity_packet(&self) -> &Packet {
        &self.identity_packet
    }

    /// Whether the link has been torn down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one packet; resolves once it has been written and flushed
    pub async fn send_packet(&self, packet: &Packet) -> LinkResult<()> {
        if self.is_closed() {
            return Err(LinkError::transport(format!("link {} is closed", self.id)));
        }
        let frame = packet.to_frame()?;
        let (flushed, confirmation) = oneshot::channel();
        self.outbound
            .send(Outgoing { frame, flushed })
            .map_err(|_| LinkError::transport(format!("link {} is closed", self.id)))?;
        confirmation.await.map_err(|_| {
            LinkError::transport(format!("link {} closed before the packet was flushed", self.id))
        })?
    }

    /// Tear the link down. Returns `true` for the single call that actually
    /// closed it.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shutdown.send_replace(true);
        drop(self.input.lock().take());
        if let Some(reservation) = self.reservation.lock().take() {
            reservation.release();
        }
        debug!(link_id = self.id, peer = %self.peer, "link closed");
        true
    }

    /// Deliver the peer's identity packet, then start reading packets on a
    /// background task. When input ends the link is handed back to the
    /// registrar for teardown.
    pub(crate) fn start_listening(self: &Arc<Self>, registrar: Arc<LinkRegistrar>) {
        let Some(input) = self.input.lock().take() else {
            return;
        };
        registrar.deliver(self, self.identity_packet.clone());

        let mut shutdown = self.shutdown.subscribe();
        let link = Arc::clone(self);
        tokio::spawn(async move {
            if !*shutdown.borrow() {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = read_loop(&link, input, &registrar) => {}
                }
            }
            registrar.disconnect(&link);
        });
    }
}

async fn read_loop(link: &Arc<Link>, mut input: BufReader<BoxedReader>, registrar: &LinkRegistrar) {
    loop {
        let mut frame = Vec::new();
        match input.read_until(PACKET_TERMINATOR, &mut frame).await {
            Ok(0) => {
                debug!(link_id = link.id, peer = %link.peer, "peer closed the link");
                return;
            }
            Ok(_) if frame.last() != Some(&PACKET_TERMINATOR) => {
                debug!(link_id = link.id, peer = %link.peer, "link ended mid-packet");
                return;
            }
            Ok(_) => match Packet::from_frame(&frame) {
                Ok(packet) => registrar.deliver(link, packet),
                Err(e) => {
                    warn!(link_id = link.id, peer = %link.peer, error = %e, "dropping link after malformed packet");
                    return;
                }
            },
            Err(e) => {
                debug!(link_id = link.id, peer = %link.peer, error = %e, "link read failed");
                return;
            }
        }
    }
}

async fn write_loop(
    link_id: u64,
    peer: PeerAddress,
    mut output: BoxedWriter,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = queue.recv() => {
                let Some(Outgoing { frame, flushed }) = next else {
                    break;
                };
                let result = write_frame(&mut output, &frame).await;
                let failed = result.is_err();
                let _ = flushed.send(result);
                if failed {
                    break;
                }
                trace!(link_id, peer = %peer, bytes = frame.len(), "packet sent");
            }
        }
    }
    if let Err(e) = output.shutdown().await {
        trace!(link_id, peer = %peer, error = %e, "output shutdown failed");
    }
}

async fn write_frame(output: &mut BoxedWriter, frame: &[u8]) -> LinkResult<()> {
    output.write_all(frame).await?;
    output.flush().await?;
    Ok(())
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("device_id", &self.identity.device_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
