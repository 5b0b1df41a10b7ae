//! The update phase: aggregating masked models and building the seed dictionary.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    state_machine::{
        coordinator::PhaseParameters,
        events::DictionaryUpdate,
        phases::{
            Handler,
            Phase,
            PhaseCounters,
            PhaseError,
            PhaseName,
            PhaseState,
            Shared,
            Sum2,
        },
        requests::{RequestError, StateMachineRequest, UpdateRequest},
        StateMachine,
    },
    storage::{CoordinatorStorage, Storage, StorageError},
};
use petnet_core::{
    mask::{Aggregation, MaskObject},
    LocalSeedDict,
    SeedDict,
    UpdateParticipantPublicKey,
};

/// Errors which can occur during the update phase.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("seed dictionary does not exist")]
    NoSeedDict,
    #[error("fetching the seed dictionary failed: {0}")]
    FetchSeedDict(StorageError),
}

/// The update phase.
#[derive(Debug)]
pub struct Update {
    /// The message counters of this phase.
    counters: PhaseCounters,
    /// The running aggregate of the masked models.
    aggregation: Aggregation,
    /// The seed dictionary, fetched at the end of the phase.
    seed_dict: Option<Arc<SeedDict>>,
}

#[cfg(test)]
impl<T> PhaseState<Update, T> {
    pub(crate) fn aggregation(&self) -> &Aggregation {
        &self.private.aggregation
    }
}

#[async_trait]
impl<T> Handler for PhaseState<Update, T>
where
    T: Storage,
{
    /// Handles a [`StateMachineRequest::Update`] request; any other request is rejected.
    async fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError> {
        match req {
            StateMachineRequest::Update(UpdateRequest {
                participant_pk,
                local_seed_dict,
                masked_model,
            }) => {
                self.update_seed_dict_and_aggregate_mask(
                    &participant_pk,
                    &local_seed_dict,
                    masked_model,
                )
                .await
            }
            _ => Err(RequestError::MessageRejected),
        }
    }

    fn phase_parameters(&self) -> PhaseParameters {
        self.shared.state.update
    }

    fn counters(&self) -> PhaseCounters {
        self.private.counters
    }

    fn counters_mut(&mut self) -> &mut PhaseCounters {
        &mut self.private.counters
    }
}

#[async_trait]
impl<T> Phase<T> for PhaseState<Update, T>
where
    T: Storage,
{
    const NAME: PhaseName = PhaseName::Update;

    async fn process(&mut self) -> Result<(), PhaseError> {
        self.process_requests().await?;
        self.fetch_seed_dict().await?;
        Ok(())
    }

    fn broadcast(&mut self) {
        // safe unwrap: the seed dict has been fetched in `process`
        let seed_dict = self.private.seed_dict.take().unwrap();
        info!("broadcasting the seed dictionary");
        self.shared
            .events
            .broadcast_seed_dict(DictionaryUpdate::New(seed_dict));
    }

    async fn next(self) -> Option<StateMachine<T>> {
        Some(PhaseState::<Sum2, _>::new(self.shared, self.private.aggregation).into())
    }
}

impl<T> PhaseState<Update, T>
where
    T: Storage,
{
    /// Creates a new update phase.
    pub fn new(shared: Shared<T>) -> Self {
        let aggregation = Aggregation::new(
            shared.state.round_params.mask_config,
            shared.state.round_params.model_length,
        );
        Self {
            private: Update {
                counters: PhaseCounters::default(),
                aggregation,
                seed_dict: None,
            },
            shared,
        }
    }

    /// Creates an update phase that resumes after a restart, with the
    /// aggregate persisted so far.
    pub(in crate::state_machine) fn restore(shared: Shared<T>, aggregation: Aggregation) -> Self {
        let mut state = Self::new(shared);
        state.private.counters.accepted = aggregation.nb_models() as u64;
        state.private.aggregation = aggregation;
        state
    }

    /// Updates the seed dictionary and aggregates the masked model.
    async fn update_seed_dict_and_aggregate_mask(
        &mut self,
        pk: &UpdateParticipantPublicKey,
        local_seed_dict: &LocalSeedDict,
        masked_model: MaskObject,
    ) -> Result<(), RequestError> {
        // Check that the masked model can be aggregated before the seed dict
        // is touched: the seeds of an unusable model must not end up in the
        // dictionary.
        debug!("checking whether the masked model can be aggregated");
        self.private
            .aggregation
            .validate_aggregation(&masked_model)
            .map_err(|err| {
                warn!("masked model aggregation error: {}", err);
                RequestError::AggregationFailed
            })?;

        info!("updating the global seed dictionary");
        self.shared
            .store
            .add_local_seed_dict(pk, local_seed_dict)
            .await?
            .into_inner()?;

        info!("aggregating the masked model and scalar");
        let mut aggregation = self.private.aggregation.clone();
        aggregation.aggregate(masked_model);

        // The aggregate is committed to memory only once it has been
        // persisted, so a restart never resurrects a contribution that the
        // store does not know about.
        self.shared
            .store
            .set_masked_aggregate(&aggregation)
            .await?;
        self.private.aggregation = aggregation;
        Ok(())
    }

    /// Fetches the seed dictionary which is sent out to the sum participants.
    async fn fetch_seed_dict(&mut self) -> Result<(), UpdateError> {
        info!("fetching the global seed dictionary");
        let seed_dict = self
            .shared
            .store
            .seed_dict()
            .await
            .map_err(UpdateError::FetchSeedDict)?
            .ok_or(UpdateError::NoSeedDict)?;
        self.private.seed_dict = Some(Arc::new(seed_dict));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state_machine::tests::{builder::StateMachineBuilder, utils},
        storage::{memory::MemoryStore, LocalSeedDictAddError},
    };
    use petnet_core::mask::{FromPrimitives, Model};

    #[tokio::test]
    async fn test_update_to_sum2() {
        let mut store = MemoryStore::new();
        let mut state = utils::coordinator_state();
        state.update.count.min = 1;
        state.update.time.min = 0;

        // one registered sum participant
        let summer = utils::generate_summer();
        utils::register_summer(&mut store, &summer).await;

        let (state_machine, request_tx, events) = StateMachineBuilder::new(store.clone(), state)
            .in_update_phase()
            .build();
        assert!(state_machine.is_update());

        let updater = utils::generate_updater();
        let model = Model::from_primitives(vec![1_f32; 4].into_iter()).unwrap();
        let (update_request, masked_model) =
            utils::update_request(&updater, &model, &[summer.clone()]);

        let request_fut = utils::send_update_request(&request_tx, update_request);
        let (response, state_machine) = tokio::join!(request_fut, state_machine.next());

        assert!(response.is_ok());
        assert!(state_machine.unwrap().is_sum2());

        // the aggregate of a single model is that model, and it was persisted
        let aggregation = store.masked_aggregate().await.unwrap().unwrap();
        assert_eq!(aggregation.nb_models(), 1);
        assert_eq!(MaskObject::from(aggregation), masked_model);

        // the seed dict was broadcasted with one entry per sum participant
        match events.seed_dict_listener().get_latest().event {
            DictionaryUpdate::New(seed_dict) => {
                let shares = seed_dict.get(&summer.keys.public).unwrap();
                assert_eq!(shares.len(), 1);
                assert!(shares.contains_key(&updater.keys.public));
            }
            DictionaryUpdate::Invalidate => panic!("expected a seed dict broadcast"),
        }
    }

    #[tokio::test]
    async fn test_update_with_wrong_seed_dict_shape_is_rejected() {
        let mut store = MemoryStore::new();
        let mut state = utils::coordinator_state();
        state.update.count.min = 1;
        state.update.time.min = 1;

        let summer = utils::generate_summer();
        utils::register_summer(&mut store, &summer).await;

        let (state_machine, request_tx, _events) = StateMachineBuilder::new(store.clone(), state)
            .in_update_phase()
            .build();

        let updater = utils::generate_updater();
        let model = Model::from_primitives(vec![1_f32; 4].into_iter()).unwrap();

        // a seed dict with an entry for an unknown sum participant
        let stranger = utils::generate_summer();
        let (bad_request, _) = utils::update_request(&updater, &model, &[stranger]);

        // a valid update afterwards, to let the phase progress
        let other_updater = utils::generate_updater();
        let (good_request, _) = utils::update_request(&other_updater, &model, &[summer.clone()]);

        let requests = async {
            let bad = utils::send_update_request(&request_tx, bad_request).await;
            let good = utils::send_update_request(&request_tx, good_request).await;
            (bad, good)
        };
        let ((bad, good), state_machine) = tokio::join!(requests, state_machine.next());

        assert!(matches!(
            bad,
            Err(RequestError::LocalSeedDictAdd(
                LocalSeedDictAddError::UnknownSumParticipant
            ))
        ));
        assert!(good.is_ok());
        assert!(state_machine.unwrap().is_sum2());

        // the rejected update did not touch the seed dict or the aggregate
        let seed_dict = store.seed_dict().await.unwrap().unwrap();
        let shares = seed_dict.get(&summer.keys.public).unwrap();
        assert_eq!(shares.len(), 1);
        assert!(!shares.contains_key(&updater.keys.public));
        assert_eq!(store.masked_aggregate().await.unwrap().unwrap().nb_models(), 1);
    }
}
