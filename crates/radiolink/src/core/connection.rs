//! Raw connections and stream multiplexing

use crate::error::LinkResult;
use crate::types::PeerAddress;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// A duplex byte stream handed out by the radio transport
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RawStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed read side of a multiplexed channel
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write side of a multiplexed channel
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A duplex byte channel to one peer, owned by exactly one task
pub struct RawConnection {
    peer: PeerAddress,
    stream: Box<dyn RawStream>,
}

impl RawConnection {
    /// Wrap a transport stream
    pub fn new(peer: PeerAddress, stream: impl RawStream) -> Self {
        Self {
            peer,
            stream: Box::new(stream),
        }
    }

    /// Transport address of the remote end
    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    /// Split into address and stream
    pub fn into_parts(self) -> (PeerAddress, Box<dyn RawStream>) {
        (self.peer, self.stream)
    }

    /// Shut the stream down and drop it
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!(peer = %self.peer, error = %e, "shutdown on close failed");
        }
    }
}

impl fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawConnection")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// The default input/output stream pair layered over a raw connection
///
/// Dropping both halves closes the underlying connection.
pub struct MultiplexedChannel {
    peer: PeerAddress,
    /// Buffered input. Bytes read past a packet boundary stay here.
    pub input: BufReader<BoxedReader>,
    /// Output stream
    pub output: BoxedWriter,
}

impl MultiplexedChannel {
    /// Assemble a channel from its streams
    pub fn new(peer: PeerAddress, input: BoxedReader, output: BoxedWriter) -> Self {
        Self {
            peer,
            input: BufReader::new(input),
            output,
        }
    }

    /// Transport address of the remote end
    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    /// Shut the output down and drop both halves
    pub async fn close(mut self) {
        if let Err(e) = self.output.shutdown().await {
            tracing::trace!(peer = %self.peer, error = %e, "shutdown on close failed");
        }
    }
}

impl fmt::Debug for MultiplexedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexedChannel")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Turns one raw connection into independent input/output streams
pub trait StreamMultiplexer: Send + Sync + 'static {
    /// Take ownership of `connection` and expose its default streams
    fn multiplex(&self, connection: RawConnection) -> LinkResult<MultiplexedChannel>;
}

/// Multiplexer exposing the raw stream's two directions as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitMultiplexer;

impl StreamMultiplexer for SplitMultiplexer {
    fn multiplex(&self, connection: RawConnection) -> LinkResult<MultiplexedChannel> {
        let (peer, stream) = connection.into_parts();
        let (reader, writer) = tokio::io::split(stream);
        Ok(MultiplexedChannel::new(
            peer,
            Box::new(reader),
            Box::new(writer),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt};

    #[tokio::test]
    async fn test_split_multiplexer_is_transparent() {
        let (local, mut remote) = tokio::io::duplex(64);
        let connection = RawConnection::new(PeerAddress::from("peer"), local);
        let mut channel = SplitMultiplexer.multiplex(connection).unwrap();
        assert_eq!(channel.peer().as_str(), "peer");

        remote.write_all(b"hello\n").await.unwrap();
        let mut line = String::new();
        channel.input.read_line(&mut line).await.unwrap();
        assert_eq!(line, "hello\n");

        channel.output.write_all(b"world").await.unwrap();
        channel.output.flush().await.unwrap();
        let mut buf = [0u8; 5];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn test_close_signals_eof() {
        let (local, mut remote) = tokio::io::duplex(64);
        let channel = SplitMultiplexer
            .multiplex(RawConnection::new(PeerAddress::from("peer"), local))
            .unwrap();
        channel.close().await;

        let mut buf = Vec::new();
        assert_eq!(remote.read_to_end(&mut buf).await.unwrap(), 0);
    }
}
