//! A fetcher for the current phase and its deadline.

use std::task::Poll;

use futures::{future, task::Context};
use tower::Service;

use crate::state_machine::{
    events::{EventListener, EventSubscriber},
    phases::PhaseName,
};

/// A request for the current phase.
#[derive(Default, Clone, Eq, PartialEq, Debug)]
pub struct PhaseRequest;

/// The current phase of the coordinator, as served to participants.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct RoundPhase {
    /// The round the phase belongs to.
    pub round_id: u64,
    /// The name of the phase.
    pub phase: PhaseName,
    /// The wall-clock time (unix seconds) at which the phase times out, or
    /// `None` for phases without a deadline.
    pub deadline_at: Option<u64>,
}

/// A service that serves the current phase and its deadline.
#[derive(Clone)]
pub struct PhaseService {
    phase: EventListener<PhaseName>,
    deadline: EventListener<Option<u64>>,
}

impl PhaseService {
    /// Creates a new phase fetcher.
    pub fn new(events: &EventSubscriber) -> Self {
        Self {
            phase: events.phase_listener(),
            deadline: events.deadline_listener(),
        }
    }
}

impl Service<PhaseRequest> for PhaseService {
    type Response = RoundPhase;
    type Error = std::convert::Infallible;
    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: PhaseRequest) -> Self::Future {
        let phase = self.phase.get_latest();
        future::ready(Ok(RoundPhase {
            round_id: phase.round_id,
            phase: phase.event,
            deadline_at: self.deadline.get_latest().event,
        }))
    }
}
