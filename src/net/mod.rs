use std::{fmt, net::SocketAddr};

pub mod endpoint;
pub mod error;
pub mod hex;
pub mod wire;

pub use endpoint::{Dialer, Endpoint};
pub use error::{DecodeError, Error};
pub use wire::WireMessage;

/// Payload a worker sends to its router once every instruction has gone out.
pub const DONE: &str = "done";

/// Payload the router broadcasts once every registered peer reported done.
pub const CLOSE: &str = "close";

/// Identifies a peer inside one simulated network. Travels on the wire as a
/// big-endian `i32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub i32);

impl PeerId {
    /// Id the bootstrap gives the router unless configured otherwise.
    pub const ROUTER: PeerId = PeerId(0);
}

impl From<i32> for PeerId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl From<PeerId> for i32 {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a peer can be reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contact {
    pub id: PeerId,
    pub addr: SocketAddr,
}

impl Contact {
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}
