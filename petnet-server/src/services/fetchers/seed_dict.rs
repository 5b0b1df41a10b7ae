//! A fetcher for the seed dictionary.

use std::{sync::Arc, task::Poll};

use futures::{future, task::Context};
use tower::Service;

use crate::state_machine::events::{DictionaryUpdate, EventListener, EventSubscriber};
use petnet_core::SeedDict;

/// A request for the seed dictionary.
#[derive(Default, Clone, Eq, PartialEq, Debug)]
pub struct SeedDictRequest;

/// A service that serves the seed dictionary of the current round, or `None`
/// while the update phase is still collecting it. The transport slices out
/// the entry addressed to the requesting sum participant.
#[derive(Clone)]
pub struct SeedDictService(EventListener<DictionaryUpdate<SeedDict>>);

impl SeedDictService {
    /// Creates a new seed dictionary fetcher.
    pub fn new(events: &EventSubscriber) -> Self {
        Self(events.seed_dict_listener())
    }
}

impl Service<SeedDictRequest> for SeedDictService {
    type Response = Option<Arc<SeedDict>>;
    type Error = std::convert::Infallible;
    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: SeedDictRequest) -> Self::Future {
        future::ready(Ok(match self.0.get_latest().event {
            DictionaryUpdate::Invalidate => None,
            DictionaryUpdate::New(dict) => Some(dict),
        }))
    }
}
