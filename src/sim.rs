//! Lays out a network, brings it up in the right order and runs it to the
//! end.

use std::collections::BTreeMap;

use futures::future::try_join_all;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use thiserror::Error;
use tracing::info;

use crate::{
    config::{ConfigError, SimulationConfig},
    net::{self, Contact, Endpoint, PeerId, CLOSE},
    peer::{Instruction, Worker, WorkerHandle, WorkerReport},
    router::{Registry, Router, RouterReport},
    script::{self, ScriptError},
};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Net(#[from] net::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Who is in the network and what each worker will send.
#[derive(Clone, Debug, PartialEq)]
pub struct Topology {
    router: PeerId,
    workers: BTreeMap<PeerId, Vec<Instruction>>,
}

impl Topology {
    pub fn new(router: PeerId) -> Self {
        Self {
            router,
            workers: BTreeMap::new(),
        }
    }

    pub fn add_worker(
        &mut self,
        id: PeerId,
        instructions: Vec<Instruction>,
    ) -> Result<(), net::Error> {
        if id == self.router || self.workers.contains_key(&id) {
            return Err(net::Error::DuplicatePeer(id));
        }
        self.workers.insert(id, instructions);
        Ok(())
    }

    /// Workers `1..=nodes`, each sending `messages_per_node` greetings to
    /// randomly chosen other workers after random delays. A lone worker
    /// greets the router instead.
    pub fn random<R: Rng>(config: &SimulationConfig, rng: &mut R) -> Self {
        let router = config.router_id();
        let ids: Vec<PeerId> = (1..=i32::from(config.nodes))
            .map(PeerId)
            .filter(|id| *id != router)
            .collect();

        let mut topology = Self::new(router);
        for &id in &ids {
            let others: Vec<PeerId> =
                ids.iter().copied().filter(|other| *other != id).collect();
            let instructions = (0..config.messages_per_node)
                .map(|_| {
                    let delay_ms = if config.max_delay_ms == 0 {
                        0
                    } else {
                        rng.gen_range(0..config.max_delay_ms)
                    };
                    let target =
                        others.choose(&mut *rng).copied().unwrap_or(router);
                    Instruction::new(delay_ms, id, target, format!("Hello from {}", id.0))
                })
                .collect();
            topology.workers.insert(id, instructions);
        }
        topology
    }

    /// One worker per script, identified by the script's file name.
    pub fn from_scripts(config: &SimulationConfig) -> Result<Self, SimulationError> {
        let mut topology = Self::new(config.router_id());
        for path in &config.scripts {
            let id = script::peer_id_from_path(path)?;
            let instructions = script::load(path, id)?;
            topology.add_worker(id, instructions)?;
        }
        Ok(topology)
    }

    pub fn router(&self) -> PeerId {
        self.router
    }

    pub fn workers(&self) -> impl Iterator<Item = (PeerId, &[Instruction])> {
        self.workers.iter().map(|(id, list)| (*id, list.as_slice()))
    }
}

#[derive(Clone, Debug)]
pub struct SimulationReport {
    pub router: RouterReport,
    /// Ordered by peer id.
    pub workers: Vec<WorkerReport>,
}

impl SimulationReport {
    /// Messages that reached a worker, not counting close tokens.
    pub fn delivered(&self) -> usize {
        self.workers
            .iter()
            .flat_map(|w| &w.received)
            .filter(|m| m.payload != CLOSE)
            .count()
    }
}

pub struct Simulation {
    config: SimulationConfig,
    topology: Topology,
}

impl Simulation {
    pub fn new(config: SimulationConfig, topology: Topology) -> Self {
        Self { config, topology }
    }

    /// Builds the topology the config asks for: its scripts if it lists any,
    /// a random one otherwise.
    pub fn from_config(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        let topology = if config.scripts.is_empty() {
            let mut rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            Topology::random(&config, &mut rng)
        } else {
            Topology::from_scripts(&config)?
        };
        Ok(Self::new(config, topology))
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Binds every endpoint, then starts the router, then the workers, and
    /// waits for all of them to terminate.
    pub async fn run(self) -> Result<SimulationReport, SimulationError> {
        let Simulation { config, topology } = self;
        let peer_config = config.peer_config();

        // Every port is open before any peer starts dialing.
        let router_endpoint =
            Endpoint::bind(topology.router, config.router_addr()).await?;
        let router_contact =
            Contact::new(router_endpoint.id(), router_endpoint.local_addr());
        let mut registry = Registry::new();
        let mut workers = Vec::with_capacity(topology.workers.len());
        for (id, instructions) in topology.workers {
            let endpoint = Endpoint::bind(id, config.worker_addr(id)?).await?;
            registry.register(id, endpoint.local_addr())?;
            workers.push(Worker::new(endpoint, router_contact, instructions, peer_config));
        }
        info!(
            router = %router_contact.addr,
            workers = workers.len(),
            "network bound"
        );

        let router = Router::new(router_endpoint, registry, peer_config)?.start();
        let workers: Vec<WorkerHandle> =
            workers.into_iter().map(Worker::start).collect();

        let router = router.join().await?;
        let workers = try_join_all(workers.into_iter().map(WorkerHandle::join)).await?;
        Ok(SimulationReport { router, workers })
    }
}
