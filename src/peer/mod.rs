//! Workers: peers that play an instruction list out through the router and
//! listen for whatever the router relays back to them.

use std::time::Duration;

use tokio::{select, sync::watch, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::net::{
    endpoint::{ACCEPT_BACKOFF, DEFAULT_IO_TIMEOUT},
    Contact, Dialer, Endpoint, Error, PeerId,
    WireMessage,
};

pub mod clock;
pub mod dispatch;
pub mod instruction;

pub use clock::LogicalClock;
pub use dispatch::{DispatchStats, SerialDispatcher};
pub use instruction::Instruction;

/// Upper bound on how long a closing peer waits for queued sends.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeouts shared by workers and the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerConfig {
    pub io_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            io_timeout: DEFAULT_IO_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// Constructed and bound, not yet started.
    Init,
    /// Sending and listening concurrently.
    Running,
    /// No longer accepting; waiting for queued sends to finish.
    Closing,
    /// Listener released.
    Terminated,
}

/// What a worker saw over its lifetime.
#[derive(Clone, Debug)]
pub struct WorkerReport {
    pub id: PeerId,
    pub clock: f64,
    /// Every message delivered to this worker, in arrival order.
    pub received: Vec<WireMessage>,
    /// `None` if the dispatcher had to be abandoned.
    pub sends: Option<DispatchStats>,
}

pub struct Worker {
    endpoint: Endpoint,
    router: Contact,
    instructions: Vec<Instruction>,
    clock: LogicalClock,
    config: PeerConfig,
}

impl Worker {
    pub fn new(
        endpoint: Endpoint,
        router: Contact,
        instructions: Vec<Instruction>,
        config: PeerConfig,
    ) -> Self {
        Self {
            endpoint: endpoint.with_io_timeout(config.io_timeout),
            router,
            instructions,
            clock: LogicalClock::new(),
            config,
        }
    }

    pub fn id(&self) -> PeerId {
        self.endpoint.id()
    }

    /// Starts sending and listening. The worker keeps running until the
    /// router tells it to close or [`WorkerHandle::shutdown`] is called.
    pub fn start(self) -> WorkerHandle {
        let id = self.id();
        let (state_tx, state_rx) = watch::channel(PeerState::Init);
        let shutdown = CancellationToken::new();
        let span = info_span!("worker", %id);
        let task =
            tokio::spawn(self.run(state_tx, shutdown.clone()).instrument(span));
        WorkerHandle {
            id,
            state: state_rx,
            shutdown,
            task,
        }
    }

    async fn run(
        self,
        state: watch::Sender<PeerState>,
        shutdown: CancellationToken,
    ) -> WorkerReport {
        let Worker {
            endpoint,
            router,
            instructions,
            clock,
            config,
        } = self;
        let id = endpoint.id();
        let dialer = Dialer::new(config.io_timeout);
        let dispatcher = SerialDispatcher::new(id);

        state.send_replace(PeerState::Running);
        info!(instructions = instructions.len(), "started");
        for instruction in instructions {
            let clock = clock.clone();
            dispatcher.submit(transmit(id, router, instruction, clock, dialer));
        }
        dispatcher.submit(transmit(
            id,
            router,
            Instruction::done(id, router.id),
            clock.clone(),
            dialer,
        ));

        let received = listen(&endpoint, router.id, &clock, &shutdown).await;

        state.send_replace(PeerState::Closing);
        let sends = dispatcher.close(config.drain_timeout).await;
        endpoint.release();
        state.send_replace(PeerState::Terminated);

        let clock = clock.now().await;
        info!(clock, received = received.len(), "terminated");
        WorkerReport {
            id,
            clock,
            received,
            sends,
        }
    }
}

/// Sleeps out the instruction's delay, stamps it and hands it to the router.
async fn transmit(
    source: PeerId,
    router: Contact,
    instruction: Instruction,
    clock: LogicalClock,
    dialer: Dialer,
) -> Result<(), Error> {
    let delay = instruction.delay();
    let now = clock.now().await;
    debug!(?delay, clock = now, "waiting before send");
    sleep(delay).await;

    let timestamp = clock.stamp(delay).await;
    let msg = WireMessage::new(
        source,
        instruction.target,
        instruction.payload,
        timestamp,
    );
    info!(to = %msg.target, payload = %msg.payload, timestamp, "sending");
    dialer.send(router.addr, &msg).await
}

/// The accept loop. Handles one connection at a time until the router's
/// close token arrives or `shutdown` fires, and returns everything
/// delivered. A close payload from anyone but the router is ordinary data.
async fn listen(
    endpoint: &Endpoint,
    router: PeerId,
    clock: &LogicalClock,
    shutdown: &CancellationToken,
) -> Vec<WireMessage> {
    let mut received = Vec::new();
    loop {
        let accepted = select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("shutdown requested");
                break;
            }
            accepted = endpoint.accept() => accepted,
        };
        let (msg, remote) = match accepted {
            Ok(accepted) => accepted,
            Err(e) if e.is_listener_failure() => {
                warn!(error = %e, "accept failed, backing off");
                sleep(ACCEPT_BACKOFF).await;
                continue;
            }
            Err(e) => {
                warn!(error = %e, "dropping inbound connection");
                continue;
            }
        };

        if msg.target != endpoint.id() {
            warn!(
                source = %msg.source,
                to = %msg.target,
                %remote,
                "discarding message addressed to another peer"
            );
            continue;
        }

        let now = clock.observe(msg.timestamp).await;
        info!(
            source = %msg.source,
            payload = %msg.payload,
            timestamp = msg.timestamp,
            clock = now,
            "received"
        );
        let close = msg.is_close() && msg.source == router;
        received.push(msg);
        if close {
            info!("close received, shutting down");
            shutdown.cancel();
            break;
        }
    }
    received
}

/// Control surface for a started worker.
pub struct WorkerHandle {
    id: PeerId,
    state: watch::Receiver<PeerState>,
    shutdown: CancellationToken,
    task: JoinHandle<WorkerReport>,
}

impl WorkerHandle {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn state(&self) -> PeerState {
        *self.state.borrow()
    }

    /// Resolves once the worker is in `target`, returning `false` if the
    /// worker ended without ever being seen there.
    pub async fn wait_for_state(&self, target: PeerState) -> bool {
        let mut state = self.state.clone();
        let reached = state.wait_for(|s| *s == target).await.is_ok();
        reached
    }

    /// Stops the worker as if it had received a close token, minus the clock
    /// update.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn join(self) -> Result<WorkerReport, Error> {
        Ok(self.task.await?)
    }
}
