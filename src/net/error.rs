use std::{io, net::SocketAddr};

use thiserror::Error;
use tokio::task::JoinError;

use super::{wire::MAX_PAYLOAD_LEN, PeerId};

/// Everything that can go wrong while moving a message between peers.
///
/// None of these are fatal: the loop that hit one logs it, abandons the
/// connection or task at hand and carries on.
#[derive(Debug, Error)]
pub enum Error {
    /// Connect refused, connection reset, or any other socket failure.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),
    /// The listening socket could not hand out a connection at all.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
    #[error("timed out talking to {0}")]
    TimedOut(SocketAddr),
    /// The bytes on a connection were not a well-formed message.
    #[error("could not decode message: {0}")]
    Decode(#[from] DecodeError),
    /// The router has no address for the target.
    #[error("no route to peer {0}")]
    Routing(PeerId),
    #[error("payload is {0} bytes, at most {max} fit in a frame", max = MAX_PAYLOAD_LEN)]
    PayloadTooLong(usize),
    #[error("peer {0} is already registered")]
    DuplicatePeer(PeerId),
    #[error("peer task failed: {0}")]
    Join(#[from] JoinError),
}

impl Error {
    /// Whether the listener failed rather than one inbound connection.
    /// Accept loops back off on these instead of retrying straight away.
    pub fn is_listener_failure(&self) -> bool {
        matches!(self, Error::Accept(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame ended inside the {field} field")]
    Truncated { field: &'static str },
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("{0} unexpected bytes after the timestamp")]
    TrailingBytes(usize),
    #[error("connection carried more than {0} bytes")]
    Oversized(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_accept_errors_are_listener_failures() {
        let emfile = io::Error::from_raw_os_error(24);
        assert!(Error::Accept(emfile).is_listener_failure());

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(!Error::from(reset).is_listener_failure());
        assert!(!Error::from(DecodeError::InvalidUtf8).is_listener_failure());
        assert!(!Error::TimedOut("127.0.0.1:1".parse().unwrap()).is_listener_failure());
    }
}
