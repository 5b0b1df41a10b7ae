//! A fetcher for the latest global model.

use std::{sync::Arc, task::Poll};

use futures::{future, task::Context};
use tower::Service;

use crate::state_machine::events::{EventListener, EventSubscriber, ModelUpdate};
use petnet_core::mask::Model;

/// A request for the latest global model.
#[derive(Default, Clone, Eq, PartialEq, Debug)]
pub struct ModelRequest;

/// A service that serves the latest committed global model, or `None` if no
/// round has completed yet.
#[derive(Clone)]
pub struct ModelService(EventListener<ModelUpdate>);

impl ModelService {
    /// Creates a new model fetcher.
    pub fn new(events: &EventSubscriber) -> Self {
        Self(events.model_listener())
    }
}

impl Service<ModelRequest> for ModelService {
    type Response = Option<Arc<Model>>;
    type Error = std::convert::Infallible;
    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ModelRequest) -> Self::Future {
        future::ready(Ok(match self.0.get_latest().event {
            ModelUpdate::Invalidate => None,
            ModelUpdate::New(model) => Some(model),
        }))
    }
}
