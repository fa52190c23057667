#![allow(dead_code)]

use std::{net::SocketAddr, time::Duration};

use lamport_relay::{
    net::{Contact, Endpoint, PeerId},
    peer::{Instruction, PeerConfig, Worker, WorkerHandle},
    router::{Registry, Router, RouterHandle},
};
use tokio::{io::AsyncReadExt, net::TcpListener};
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Reads the one frame a raw listener is sent and decodes it.
pub async fn accept_raw(listener: &TcpListener) -> lamport_relay::WireMessage {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    lamport_relay::WireMessage::decode(&buf).unwrap()
}

/// A router plus one worker per entry, all on ephemeral ports.
pub struct Network {
    pub router: RouterHandle,
    pub workers: Vec<WorkerHandle>,
    pub addrs: Vec<SocketAddr>,
}

pub async fn start_network(workers: Vec<(PeerId, Vec<Instruction>)>) -> Network {
    let router_endpoint = Endpoint::bind(PeerId::ROUTER, loopback()).await.unwrap();
    let contact = Contact::new(PeerId::ROUTER, router_endpoint.local_addr());
    let mut registry = Registry::new();
    let mut bound = Vec::new();
    let mut addrs = Vec::new();
    for (id, instructions) in workers {
        let endpoint = Endpoint::bind(id, loopback()).await.unwrap();
        registry.register(id, endpoint.local_addr()).unwrap();
        addrs.push(endpoint.local_addr());
        bound.push(Worker::new(endpoint, contact, instructions, PeerConfig::default()));
    }
    let router = Router::new(router_endpoint, registry, PeerConfig::default())
        .unwrap()
        .start();
    let workers = bound.into_iter().map(Worker::start).collect();
    Network {
        router,
        workers,
        addrs,
    }
}
