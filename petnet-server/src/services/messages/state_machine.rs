//! The service that hands validated messages over to the state machine.

use std::task::Poll;

use futures::task::Context;
use tower::Service;
use tracing::Span;

use crate::{
    services::messages::BoxedServiceFuture,
    state_machine::requests::{RequestError, RequestSender},
};
use petnet_core::message::Message;

/// A service that dispatches a validated [`Message`] to the state machine and
/// waits for its response.
#[derive(Debug, Clone)]
pub struct StateMachineService {
    handle: RequestSender,
}

impl StateMachineService {
    /// Creates a new service with the given request sender half.
    pub fn new(handle: RequestSender) -> Self {
        Self { handle }
    }
}

impl Service<Message> for StateMachineService {
    type Response = ();
    type Error = RequestError;
    type Future = BoxedServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let handle = self.handle.clone();
        let span = Span::current();
        Box::pin(async move { handle.request(message.into(), span).await })
    }
}
