//! A fetcher for the round parameters.

use std::task::Poll;

use futures::{future, task::Context};
use tower::Service;

use crate::state_machine::events::{EventListener, EventSubscriber};
use petnet_core::common::RoundParameters;

/// A request for the current round parameters.
#[derive(Default, Clone, Eq, PartialEq, Debug)]
pub struct RoundParamsRequest;

/// A service that serves the round parameters of the current round.
#[derive(Clone)]
pub struct RoundParamsService(EventListener<RoundParameters>);

impl RoundParamsService {
    /// Creates a new round parameters fetcher.
    pub fn new(events: &EventSubscriber) -> Self {
        Self(events.params_listener())
    }
}

impl Service<RoundParamsRequest> for RoundParamsService {
    type Response = RoundParameters;
    type Error = std::convert::Infallible;
    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: RoundParamsRequest) -> Self::Future {
        future::ready(Ok(self.0.get_latest().event))
    }
}
