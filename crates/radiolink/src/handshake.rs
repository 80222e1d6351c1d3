//! Identity handshake
//!
//! Both sides exchange one newline-terminated identity packet. The exchange is
//! role-asymmetric:
//!
//! 1. Acceptor: settle, send our identity unprompted, then read the peer's.
//! 2. Connector: settle, read the peer's identity first, decide whether to
//!    proceed (self-connection guard, existing link), verify, then send ours
//!    and wait for it to be flushed.
//!
//! The side that accepted the connection has no idea who is calling, so it
//! introduces itself first. The side that dialled already picked its target
//! and only reveals itself after confirming who answered.

use crate::core::{IdentityVerifier, MultiplexedChannel, RawConnection, StreamMultiplexer};
use crate::error::{LinkError, LinkResult};
use crate::types::{
    decode_certificate_field, identity_device_id, LocalIdentity, Packet, PeerAddress,
    PeerIdentity, PACKET_TERMINATOR, PACKET_TYPE_IDENTITY,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Which side of the raw connection we are on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeRole {
    /// We accepted an inbound connection
    Acceptor,
    /// We initiated the connection
    Connector,
}

impl fmt::Display for HandshakeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acceptor => f.write_str("acceptor"),
            Self::Connector => f.write_str("connector"),
        }
    }
}

/// Read-only view of established links, consulted by the connector role
pub trait LinkDirectory: Send + Sync {
    /// Whether a link for `device_id` is currently registered
    fn is_linked(&self, device_id: &str) -> bool;
}

/// Everything a handshake needs besides the connection itself
#[derive(Clone)]
pub struct HandshakeContext {
    /// Our own identity
    pub local: Arc<LocalIdentity>,
    /// Certificate verification
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Raw connection to stream pair
    pub multiplexer: Arc<dyn StreamMultiplexer>,
    /// Established links
    pub links: Arc<dyn LinkDirectory>,
    /// Pause before the first framed I/O
    pub settle_delay: Duration,
    /// Deadline for the whole exchange, settle delay included
    pub timeout: Option<Duration>,
}

/// Why a connector walked away from an otherwise healthy handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    /// The peer announced our own device id
    SelfConnection,
    /// A link for the peer's device id is already registered
    AlreadyLinked,
}

/// A verified peer together with the streams to keep talking to it
#[derive(Debug)]
pub struct Handshake {
    /// Authenticated peer identity
    pub identity: PeerIdentity,
    /// The identity packet exactly as the peer sent it
    pub payload: Packet,
    /// Streams positioned right after the peer's identity packet
    pub channel: MultiplexedChannel,
}

/// Result of a handshake that did not fail
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// Peer authenticated; ready for admission
    Established(Handshake),
    /// Connector chose not to proceed; the connection has been closed
    Declined {
        /// Transport address of the peer
        peer: PeerAddress,
        /// Device id the peer announced
        device_id: String,
        /// Reason for declining
        reason: DeclineReason,
    },
}

enum Exchange {
    Verified(PeerIdentity, Packet),
    Declined(String, DeclineReason),
}

/// Run the identity handshake on `connection`.
///
/// On any error the connection is closed before returning; registry cleanup
/// is the caller's job.
pub async fn run_handshake(
    connection: RawConnection,
    role: HandshakeRole,
    ctx: &HandshakeContext,
) -> LinkResult<HandshakeOutcome> {
    let peer = connection.peer().clone();
    let exchange = exchange(connection, role, ctx);
    match ctx.timeout {
        Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
            LinkError::transport(format!(
                "{role} handshake with {peer} timed out after {}ms",
                limit.as_millis()
            ))
        })?,
        None => exchange.await,
    }
}

async fn exchange(
    connection: RawConnection,
    role: HandshakeRole,
    ctx: &HandshakeContext,
) -> LinkResult<HandshakeOutcome> {
    if !ctx.settle_delay.is_zero() {
        tokio::time::sleep(ctx.settle_delay).await;
    }

    let mut channel = ctx.multiplexer.multiplex(connection)?;
    let result = match role {
        HandshakeRole::Acceptor => accept_side(&mut channel, ctx).await,
        HandshakeRole::Connector => connect_side(&mut channel, ctx).await,
    };

    match result {
        Ok(Exchange::Verified(identity, payload)) => {
            debug!(
                peer = %channel.peer(),
                %role,
                device_id = %identity.device_id,
                fingerprint = %identity.certificate.fingerprint(),
                "handshake complete"
            );
            Ok(HandshakeOutcome::Established(Handshake {
                identity,
                payload,
                channel,
            }))
        }
        Ok(Exchange::Declined(device_id, reason)) => {
            let peer = channel.peer().clone();
            channel.close().await;
            Ok(HandshakeOutcome::Declined {
                peer,
                device_id,
                reason,
            })
        }
        Err(e) => {
            channel.close().await;
            Err(e)
        }
    }
}

async fn accept_side(
    channel: &mut MultiplexedChannel,
    ctx: &HandshakeContext,
) -> LinkResult<Exchange> {
    send_identity(&mut channel.output, &ctx.local).await?;
    trace!(peer = %channel.peer(), "sent identity packet");

    let payload = read_payload(channel).await?;
    let identity = authenticate(&payload, ctx.verifier.as_ref())?;
    Ok(Exchange::Verified(identity, payload))
}

async fn connect_side(
    channel: &mut MultiplexedChannel,
    ctx: &HandshakeContext,
) -> LinkResult<Exchange> {
    let payload = read_payload(channel).await?;
    ensure_identity_kind(&payload)?;

    let device_id = identity_device_id(&payload)?;
    if device_id == ctx.local.device_id {
        return Ok(Exchange::Declined(
            device_id.to_owned(),
            DeclineReason::SelfConnection,
        ));
    }
    if ctx.links.is_linked(device_id) {
        return Ok(Exchange::Declined(
            device_id.to_owned(),
            DeclineReason::AlreadyLinked,
        ));
    }

    let identity = authenticate(&payload, ctx.verifier.as_ref())?;

    // write_all + flush: success means the peer can read all of it
    send_identity(&mut channel.output, &ctx.local).await?;
    trace!(peer = %channel.peer(), "sent identity packet");
    Ok(Exchange::Verified(identity, payload))
}

async fn send_identity<W>(output: &mut W, local: &LocalIdentity) -> LinkResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = local.to_identity_packet().to_frame()?;
    output.write_all(&frame).await?;
    output.flush().await?;
    Ok(())
}

/// Read one packet, however long it is. Running out of input before the
/// terminator is a transport failure, not a malformed payload.
async fn read_payload(channel: &mut MultiplexedChannel) -> LinkResult<Packet> {
    let mut frame = Vec::new();
    channel.input.read_until(PACKET_TERMINATOR, &mut frame).await?;
    if frame.last() != Some(&PACKET_TERMINATOR) {
        return Err(LinkError::transport(format!(
            "connection to {} closed after {} bytes of identity payload",
            channel.peer(),
            frame.len()
        )));
    }
    Packet::from_frame(&frame)
}

fn ensure_identity_kind(payload: &Packet) -> LinkResult<()> {
    if payload.is_type(PACKET_TYPE_IDENTITY) {
        Ok(())
    } else {
        Err(LinkError::protocol(format!(
            "expected an identity packet, got {}",
            payload.packet_type
        )))
    }
}

fn authenticate(payload: &Packet, verifier: &dyn IdentityVerifier) -> LinkResult<PeerIdentity> {
    ensure_identity_kind(payload)?;
    let der = decode_certificate_field(payload)?;
    let certificate = verifier.parse_certificate(&der).map_err(|e| match e {
        LinkError::Authentication { .. } => e,
        other => LinkError::authentication(other.to_string()),
    })?;
    PeerIdentity::from_identity_packet(payload, certificate)
}
