//! A fetcher for the sum dictionary.

use std::{sync::Arc, task::Poll};

use futures::{future, task::Context};
use tower::Service;

use crate::state_machine::events::{DictionaryUpdate, EventListener, EventSubscriber};
use petnet_core::SumDict;

/// A request for the sum dictionary.
#[derive(Default, Clone, Eq, PartialEq, Debug)]
pub struct SumDictRequest;

/// A service that serves the sum dictionary of the current round, or `None`
/// while the sum phase is still collecting it.
#[derive(Clone)]
pub struct SumDictService(EventListener<DictionaryUpdate<SumDict>>);

impl SumDictService {
    /// Creates a new sum dictionary fetcher.
    pub fn new(events: &EventSubscriber) -> Self {
        Self(events.sum_dict_listener())
    }
}

impl Service<SumDictRequest> for SumDictService {
    type Response = Option<Arc<SumDict>>;
    type Error = std::convert::Infallible;
    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: SumDictRequest) -> Self::Future {
        future::ready(Ok(match self.0.get_latest().event {
            DictionaryUpdate::Invalidate => None,
            DictionaryUpdate::New(dict) => Some(dict),
        }))
    }
}
