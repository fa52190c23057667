use std::{
    fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{net::PeerId, peer::PeerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("port offset {offset} leaves no room for peer {peer}")]
    PortOverflow { offset: u16, peer: PeerId },
    #[error("a random topology needs at least one node")]
    TooFewNodes,
}

/// Everything the bootstrap needs to lay out and run a network.
///
/// Every key is optional in the file; missing keys take the defaults below.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Address every endpoint binds to.
    pub host: IpAddr,
    /// The router listens here and worker `i` on `port_offset + i`. Zero
    /// lets the OS pick every port.
    pub port_offset: u16,
    pub router_id: i32,
    pub nodes: u16,
    pub messages_per_node: u32,
    /// Random delays are drawn from `0..max_delay_ms`.
    pub max_delay_ms: u64,
    pub io_timeout_ms: u64,
    pub drain_timeout_ms: u64,
    pub seed: Option<u64>,
    /// When non-empty, one worker per script replaces the random topology.
    pub scripts: Vec<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port_offset: 7777,
            router_id: PeerId::ROUTER.0,
            nodes: 10,
            messages_per_node: 10,
            max_delay_ms: 3000,
            io_timeout_ms: 5_000,
            drain_timeout_ms: 30_000,
            seed: None,
            scripts: Vec::new(),
        }
    }
}

impl SimulationConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_owned(),
            source: e,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scripts.is_empty() {
            if self.nodes == 0 {
                return Err(ConfigError::TooFewNodes);
            }
            self.worker_addr(PeerId(i32::from(self.nodes)))?;
        }
        Ok(())
    }

    pub fn router_id(&self) -> PeerId {
        PeerId(self.router_id)
    }

    pub fn router_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port_offset)
    }

    /// The statically assigned address of worker `id`.
    pub fn worker_addr(&self, id: PeerId) -> Result<SocketAddr, ConfigError> {
        if self.port_offset == 0 {
            return Ok(SocketAddr::new(self.host, 0));
        }
        let overflow = || ConfigError::PortOverflow {
            offset: self.port_offset,
            peer: id,
        };
        let step = u16::try_from(id.0).map_err(|_| overflow())?;
        let port = self.port_offset.checked_add(step).ok_or_else(overflow)?;
        Ok(SocketAddr::new(self.host, port))
    }

    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            io_timeout: Duration::from_millis(self.io_timeout_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }
}
