use std::{future::Future, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, debug_span, error, warn, Instrument};

use crate::net::{Error, PeerId};

pub type Task = BoxFuture<'static, Result<(), Error>>;

/// Totals reported once a dispatcher has drained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub completed: usize,
    pub failed: usize,
}

/// Runs a peer's outbound sends one at a time, in submission order.
///
/// `submit` never blocks: tasks go onto an unbounded queue that a single
/// drain task works through. Each task is spawned onto the runtime and
/// awaited before the next is dequeued, so a long artificial delay in one
/// send holds back every later send from the same peer and nothing else.
/// A task that errors or panics is logged and the queue moves on.
/// Abandoning the drain task also aborts the send it was running.
pub struct SerialDispatcher {
    tx: mpsc::UnboundedSender<Task>,
    drain: JoinHandle<DispatchStats>,
}

impl SerialDispatcher {
    pub fn new(peer: PeerId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let span = debug_span!("dispatch", %peer);
        let drain = tokio::spawn(Self::drain(rx).instrument(span));
        Self { tx, drain }
    }

    /// Queues `task` behind everything submitted before it. Returns `false`
    /// if the dispatcher is no longer running.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.tx.send(Box::pin(task)).is_ok()
    }

    /// Stops taking new tasks and waits up to `limit` for the queued ones to
    /// finish. After that the send in flight is aborted and whatever is
    /// still queued is abandoned.
    pub async fn close(self, limit: Duration) -> Option<DispatchStats> {
        let Self { tx, mut drain } = self;
        drop(tx);
        match timeout(limit, &mut drain).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                error!(error = %e, "dispatcher drain task failed");
                None
            }
            Err(_) => {
                warn!(?limit, "dispatcher did not drain in time, abandoning queued sends");
                drain.abort();
                None
            }
        }
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<Task>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        while let Some(task) = rx.recv().await {
            let running =
                AbortOnDropHandle::new(tokio::spawn(task.in_current_span()));
            match running.await {
                Ok(Ok(())) => stats.completed += 1,
                Ok(Err(e)) => {
                    warn!(error = %e, "send failed, moving on");
                    stats.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "send task panicked, moving on");
                    stats.failed += 1;
                }
            }
        }
        debug!(?stats, "dispatcher drained");
        stats
    }
}
