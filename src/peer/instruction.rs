use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::net::{PeerId, DONE};

/// One authored send: wait `delay_ms` after the previous send from the same
/// peer, then send `payload` towards `target` by way of the router.
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
pub struct Instruction {
    #[builder(default)]
    pub delay_ms: u64,
    pub source: PeerId,
    pub target: PeerId,
    #[builder(setter(into))]
    pub payload: String,
}

impl Instruction {
    pub fn new(
        delay_ms: u64,
        source: PeerId,
        target: PeerId,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            delay_ms,
            source,
            target,
            payload: payload.into(),
        }
    }

    /// The synthetic last instruction of every worker.
    pub fn done(source: PeerId, router: PeerId) -> Self {
        Self::new(0, source, router, DONE)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}
