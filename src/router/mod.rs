//! The router relays every message that isn't addressed to it and decides
//! when the whole network is finished.
//!
//! Workers never talk to each other directly. Each one sends everything to
//! the router, which looks the target up in its [`Registry`] and opens a
//! fresh connection to deliver an unmodified copy. Forwards run as their
//! own tasks so a slow target never stalls the accept loop; the accept loop
//! itself handles one inbound connection at a time and never reorders.
//!
//! Every worker ends its instruction list with a done token. Once as many
//! done tokens have arrived as there are registered peers, the router lets
//! in-flight forwards land, sends a close token to every peer and stops.

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{
    select,
    sync::{watch, Mutex},
    task::{JoinHandle, JoinSet},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, info, info_span, warn, Instrument};

use crate::{
    net::{
        endpoint::ACCEPT_BACKOFF, Dialer, Endpoint, Error, PeerId, WireMessage,
        CLOSE,
    },
    peer::{LogicalClock, PeerConfig},
};

pub mod registry;

pub use registry::Registry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouterState {
    /// Forwarding while fewer than all peers have reported done.
    Running,
    /// Waiting for forwards to land, then broadcasting close.
    Draining,
    /// Listener released.
    Terminated,
}

/// Totals for one router run.
#[derive(Clone, Debug, PartialEq)]
pub struct RouterReport {
    pub id: PeerId,
    pub done: usize,
    pub forwarded: usize,
    pub unroutable: usize,
    pub failed_forwards: usize,
    /// Peers the close token reached.
    pub closed: usize,
    pub clock: f64,
}

pub struct Router {
    endpoint: Endpoint,
    registry: Arc<Registry>,
    done: Arc<Mutex<usize>>,
    clock: LogicalClock,
    dialer: Dialer,
    config: PeerConfig,
}

impl Router {
    /// Takes ownership of a fully populated registry. The router's own id may
    /// not appear in it.
    pub fn new(
        endpoint: Endpoint,
        registry: Registry,
        config: PeerConfig,
    ) -> Result<Self, Error> {
        if registry.contains(endpoint.id()) {
            return Err(Error::DuplicatePeer(endpoint.id()));
        }
        Ok(Self {
            endpoint: endpoint.with_io_timeout(config.io_timeout),
            registry: Arc::new(registry),
            done: Arc::new(Mutex::new(0)),
            clock: LogicalClock::new(),
            dialer: Dialer::new(config.io_timeout),
            config,
        })
    }

    pub fn id(&self) -> PeerId {
        self.endpoint.id()
    }

    pub fn start(self) -> RouterHandle {
        let id = self.id();
        let (state_tx, state_rx) = watch::channel(RouterState::Running);
        let shutdown = CancellationToken::new();
        let done = self.done.clone();
        let span = info_span!("router", %id);
        let task =
            tokio::spawn(self.run(state_tx, shutdown.clone()).instrument(span));
        RouterHandle {
            id,
            state: state_rx,
            done,
            shutdown,
            task,
        }
    }

    async fn run(
        self,
        state: watch::Sender<RouterState>,
        shutdown: CancellationToken,
    ) -> RouterReport {
        let mut report = RouterReport {
            id: self.id(),
            done: 0,
            forwarded: 0,
            unroutable: 0,
            failed_forwards: 0,
            closed: 0,
            clock: 0.0,
        };
        let mut forwards = JoinSet::new();
        info!(peers = self.registry.len(), "started");

        let mut finished = self.all_done().await;
        while !finished {
            let accepted = select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("shutdown requested");
                    break;
                }
                accepted = self.endpoint.accept() => accepted,
            };
            while let Some(joined) = forwards.try_join_next() {
                tally(&mut report, joined);
            }
            let msg = match accepted {
                Ok((msg, _)) => msg,
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

            if msg.target == self.id() {
                self.deliver(msg).await;
                finished = self.all_done().await;
            } else {
                self.forward(msg, &mut forwards, &mut report);
            }
        }

        state.send_replace(RouterState::Draining);
        let drained = timeout(self.config.drain_timeout, async {
            while let Some(joined) = forwards.join_next().await {
                tally(&mut report, joined);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                in_flight = forwards.len(),
                "forwards did not land in time, abandoning them"
            );
            forwards.abort_all();
        }

        if finished {
            report.closed = self.broadcast_close().await;
        }
        report.done = *self.done.lock().await;
        report.clock = self.clock.now().await;

        let Router { endpoint, .. } = self;
        endpoint.release();
        state.send_replace(RouterState::Terminated);
        info!(
            done = report.done,
            forwarded = report.forwarded,
            unroutable = report.unroutable,
            closed = report.closed,
            "terminated"
        );
        report
    }

    /// Termination condition, read under the same lock the count is bumped
    /// under.
    async fn all_done(&self) -> bool {
        *self.done.lock().await >= self.registry.len()
    }

    /// Handles a message addressed to the router itself.
    async fn deliver(&self, msg: WireMessage) {
        let now = self.clock.observe(msg.timestamp).await;
        if msg.is_done() {
            let mut done = self.done.lock().await;
            *done += 1;
            info!(
                source = %msg.source,
                done = *done,
                expected = self.registry.len(),
                clock = now,
                "peer reported done"
            );
        } else {
            info!(
                source = %msg.source,
                payload = %msg.payload,
                clock = now,
                "received"
            );
        }
    }

    /// Relays `msg` to its target on a task of its own. Unknown targets are
    /// logged and dropped without opening a connection.
    fn forward(
        &self,
        msg: WireMessage,
        forwards: &mut JoinSet<Result<(), Error>>,
        report: &mut RouterReport,
    ) {
        let Some(addr) = self.registry.address(msg.target) else {
            warn!(
                source = %msg.source,
                error = %Error::Routing(msg.target),
                "dropping message"
            );
            report.unroutable += 1;
            return;
        };
        let dialer = self.dialer;
        let span = debug_span!("forward", from = %msg.source, to = %msg.target);
        forwards.spawn(
            async move {
                debug!(%addr, payload = %msg.payload, "forwarding");
                dialer.send(addr, &msg).await
            }
            .instrument(span),
        );
    }

    /// Tells every registered peer to close, each over its own connection.
    /// Returns how many of them were reached.
    async fn broadcast_close(&self) -> usize {
        let timestamp = self.clock.stamp(Duration::ZERO).await;
        let id = self.id();
        let sends = self.registry.iter().map(|(peer, addr)| {
            let dialer = self.dialer;
            async move {
                let msg = WireMessage::new(id, peer, CLOSE, timestamp);
                match dialer.send(addr, &msg).await {
                    Ok(()) => {
                        debug!(%peer, "close sent");
                        true
                    }
                    Err(e) => {
                        warn!(%peer, error = %e, "could not deliver close");
                        false
                    }
                }
            }
        });
        let reached = join_all(sends).await.into_iter().filter(|ok| *ok).count();
        info!(reached, peers = self.registry.len(), "close broadcast");
        reached
    }
}

fn tally(
    report: &mut RouterReport,
    joined: Result<Result<(), Error>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(())) => report.forwarded += 1,
        Ok(Err(e)) => {
            warn!(error = %e, "forward failed");
            report.failed_forwards += 1;
        }
        Err(e) => {
            error!(error = %e, "forward task failed");
            report.failed_forwards += 1;
        }
    }
}

/// Control surface for a started router.
pub struct RouterHandle {
    id: PeerId,
    state: watch::Receiver<RouterState>,
    done: Arc<Mutex<usize>>,
    shutdown: CancellationToken,
    task: JoinHandle<RouterReport>,
}

impl RouterHandle {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn state(&self) -> RouterState {
        *self.state.borrow()
    }

    /// Resolves once the router is in `target`, returning `false` if it
    /// ended without ever being seen there.
    pub async fn wait_for_state(&self, target: RouterState) -> bool {
        let mut state = self.state.clone();
        let reached = state.wait_for(|s| *s == target).await.is_ok();
        reached
    }

    pub async fn done_count(&self) -> usize {
        *self.done.lock().await
    }

    /// Stops the router without broadcasting close.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn join(self) -> Result<RouterReport, Error> {
        Ok(self.task.await?)
    }
}
