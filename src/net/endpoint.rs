use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tracing::{debug, trace};

use super::{
    error::{DecodeError, Error},
    hex::HexDisplayExt,
    wire::{WireMessage, MAX_FRAME_LEN},
    PeerId,
};

/// Deadline for connecting, writing or reading a single message.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause before retrying after the listening socket itself failed to accept,
/// e.g. when the process is out of file descriptors.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// The listening half of a peer: a bound socket that yields one decoded
/// message per inbound connection.
///
/// Binding happens when the peer is constructed, long before it starts, so
/// that every port in the network is open before anyone dials. Dropping the
/// endpoint (or calling [`Endpoint::release`]) closes the socket.
pub struct Endpoint {
    id: PeerId,
    listener: TcpListener,
    local_addr: SocketAddr,
    io_timeout: Duration,
}

impl Endpoint {
    pub async fn bind(id: PeerId, addr: SocketAddr) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        debug!(peer = %id, %local_addr, "listening");
        Ok(Self {
            id,
            listener,
            local_addr,
            io_timeout: DEFAULT_IO_TIMEOUT,
        })
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts the next connection and reads the single message it carries.
    ///
    /// The connection is always closed before this returns, whether or not
    /// the message decoded. Cancel safe up to the point a connection has been
    /// accepted; a message being read when the future is dropped is lost.
    pub async fn accept(&self) -> Result<(WireMessage, SocketAddr), Error> {
        let (stream, remote) =
            self.listener.accept().await.map_err(Error::Accept)?;
        let msg = timeout(self.io_timeout, read_message(stream))
            .await
            .map_err(|_| Error::TimedOut(remote))??;
        Ok((msg, remote))
    }

    /// Closes the listening socket.
    pub fn release(self) {
        debug!(peer = %self.id, local_addr = %self.local_addr, "listener released");
    }
}

async fn read_message(stream: TcpStream) -> Result<WireMessage, Error> {
    let mut buf = Vec::with_capacity(64);
    stream
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_to_end(&mut buf)
        .await?;
    if buf.len() > MAX_FRAME_LEN {
        return Err(DecodeError::Oversized(MAX_FRAME_LEN).into());
    }
    WireMessage::decode(&buf).map_err(|e| {
        trace!(bytes = %buf.hex(), "undecodable frame");
        e.into()
    })
}

/// The sending half: opens a short-lived connection per message.
#[derive(Clone, Copy, Debug)]
pub struct Dialer {
    io_timeout: Duration,
}

impl Dialer {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }

    /// Connects to `addr`, writes `msg` and closes the connection. Nothing is
    /// read back; delivery is one-way.
    pub async fn send(
        &self,
        addr: SocketAddr,
        msg: &WireMessage,
    ) -> Result<(), Error> {
        let buf = msg.encode()?;
        timeout(self.io_timeout, async {
            let mut stream = TcpStream::connect(addr).await?;
            stream.write_all(&buf).await?;
            stream.shutdown().await?;
            Ok::<_, Error>(())
        })
        .await
        .map_err(|_| Error::TimedOut(addr))?
    }
}

impl Default for Dialer {
    fn default() -> Self {
        Self::new(DEFAULT_IO_TIMEOUT)
    }
}
