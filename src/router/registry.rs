use std::net::SocketAddr;

use hashbrown::HashMap;

use crate::net::{Error, PeerId};

/// Which address each peer listens on.
///
/// Filled in by the bootstrap before anything starts and handed to the
/// router by value, after which it is only ever read.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    peers: HashMap<PeerId, SocketAddr>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: PeerId, addr: SocketAddr) -> Result<(), Error> {
        if self.peers.contains_key(&id) {
            return Err(Error::DuplicatePeer(id));
        }
        self.peers.insert(id, addr);
        Ok(())
    }

    pub fn address(&self, id: PeerId) -> Option<SocketAddr> {
        self.peers.get(&id).copied()
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Registered peers in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (PeerId, SocketAddr)> + '_ {
        self.peers.iter().map(|(id, addr)| (*id, *addr))
    }
}
