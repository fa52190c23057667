use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;

/// A peer's Lamport-style logical clock, measured in seconds.
///
/// Cloning yields another handle to the same clock: the dispatcher stamps
/// outgoing messages through one handle while the accept loop folds in
/// received timestamps through another. Every read-modify-write happens
/// under the lock, so the value never goes backwards.
#[derive(Clone, Debug, Default)]
pub struct LogicalClock(Arc<Mutex<f64>>);

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn now(&self) -> f64 {
        *self.0.lock().await
    }

    /// Applies the receive rule for a message stamped `received` and returns
    /// the new local time.
    pub async fn observe(&self, received: f64) -> f64 {
        let mut clock = self.0.lock().await;
        *clock = on_receive(*clock, received);
        *clock
    }

    /// Returns the timestamp for a message that has just waited out `delay`,
    /// then advances the clock by that delay.
    pub async fn stamp(&self, delay: Duration) -> f64 {
        let mut clock = self.0.lock().await;
        let stamp = *clock;
        *clock = on_send(stamp, delay);
        stamp
    }
}

/// `max(local, received) + 1`, with ties going to the local side.
///
/// A NaN timestamp never compares greater, so it falls through to the local
/// branch and cannot poison the clock.
pub fn on_receive(local: f64, received: f64) -> f64 {
    if received > local {
        received + 1.0
    } else {
        local + 1.0
    }
}

/// Advances by the delay in fractional seconds, the same quantity the
/// dispatcher slept for. No truncation to whole seconds.
pub fn on_send(local: f64, delay: Duration) -> f64 {
    local + delay.as_secs_f64()
}
