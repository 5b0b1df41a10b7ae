//! The unmask phase: producing and committing the global model.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::{
    state_machine::{
        events::ModelUpdate,
        phases::{Idle, Phase, PhaseError, PhaseName, PhaseState, Shared},
        StateMachine,
    },
    storage::{CoordinatorStorage, ModelStorage, Storage, StorageError},
};
use petnet_core::mask::{Aggregation, MaskObject, Model, UnmaskingError};

/// Errors which can occur during the unmask phase.
#[derive(Debug, Error)]
pub enum UnmaskError {
    #[error("no mask was submitted")]
    NoMask,
    #[error("fetching the best masks failed: {0}")]
    FetchBestMasks(StorageError),
    #[error("unmasking the aggregated masked model failed: {0}")]
    Unmasking(#[from] UnmaskingError),
    #[error("saving the global model failed: {0}")]
    SaveGlobalModel(StorageError),
    #[error("serializing a mask for comparison failed: {0}")]
    MaskSerialization(bincode::Error),
}

/// The unmask phase.
#[derive(Debug)]
pub struct Unmask {
    /// The aggregate of the masked models; consumed by the unmasking.
    aggregation: Option<Aggregation>,
    /// The unmasked global model, kept for the broadcast.
    global_model: Option<Arc<Model>>,
}

#[async_trait]
impl<T> Phase<T> for PhaseState<Unmask, T>
where
    T: Storage,
{
    const NAME: PhaseName = PhaseName::Unmask;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let global_model = self.end_round().await?;

        info!("committing the global model");
        let round_id = self.shared.state.round_id;
        let round_seed = &self.shared.state.round_params.seed;
        let id = self
            .shared
            .store
            .set_global_model(round_id, round_seed, &global_model)
            .await
            .map_err(UnmaskError::SaveGlobalModel)?;
        self.shared
            .store
            .set_latest_global_model_id(&id)
            .await
            .map_err(UnmaskError::SaveGlobalModel)?;

        self.private.global_model = Some(Arc::new(global_model));
        Ok(())
    }

    fn broadcast(&mut self) {
        // safe unwrap: the global model has been computed in `process`
        let global_model = self.private.global_model.take().unwrap();
        info!("broadcasting the new global model");
        self.shared
            .events
            .broadcast_model(ModelUpdate::New(global_model));
    }

    async fn next(self) -> Option<StateMachine<T>> {
        info!("going back to the idle phase");
        Some(PhaseState::<Idle, _>::new(self.shared).into())
    }
}

impl<T> PhaseState<Unmask, T>
where
    T: Storage,
{
    /// Creates a new unmask phase.
    pub fn new(shared: Shared<T>, aggregation: Aggregation) -> Self {
        Self {
            private: Unmask {
                aggregation: Some(aggregation),
                global_model: None,
            },
            shared,
        }
    }

    /// Unmasks the aggregated masked model with the submitted masks.
    async fn end_round(&mut self) -> Result<Model, UnmaskError> {
        let best_masks = self
            .shared
            .store
            .best_masks()
            .await
            .map_err(UnmaskError::FetchBestMasks)?
            .ok_or(UnmaskError::NoMask)?;
        let mask = select_mask(best_masks)?;

        // safe unwrap: the aggregation is only taken once, here
        let aggregation = self.private.aggregation.take().unwrap();
        aggregation
            .validate_unmasking(&mask)
            .map_err(UnmaskError::from)?;
        Ok(aggregation.unmask(mask))
    }
}

/// Selects the mask to unmask with: the one with the highest score.
///
/// Honest sum participants reconstruct the same mask independently, so any
/// divergence signals an anomalous participant and the plurality wins. An
/// exact tie is broken deterministically in favor of the mask with the
/// smallest serialized representation.
///
/// The winner is re-derived from the scores of the whole candidate set, so
/// the selection does not depend on the order in which the store returns the
/// masks. The store contract only has to guarantee that every mask tied for
/// the highest score is part of the set (see
/// [`CoordinatorStorage::best_masks`]).
fn select_mask(scored_masks: Vec<(MaskObject, u64)>) -> Result<MaskObject, UnmaskError> {
    let mut winner: Option<(Vec<u8>, MaskObject, u64)> = None;
    for (mask, score) in scored_masks {
        let bytes = bincode::serialize(&mask).map_err(UnmaskError::MaskSerialization)?;
        let wins = match &winner {
            None => true,
            Some((winner_bytes, _, winner_score)) => {
                score > *winner_score || (score == *winner_score && bytes < *winner_bytes)
            }
        };
        if wins {
            winner = Some((bytes, mask, score));
        }
    }
    winner
        .map(|(_, mask, _)| mask)
        .ok_or(UnmaskError::NoMask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state_machine::tests::{builder::StateMachineBuilder, utils},
        storage::memory::MemoryStore,
    };
    use petnet_core::{
        crypto::ByteObject,
        mask::{FromPrimitives, IntoPrimitives, Masker, MaskSeed, Model, Scalar},
    };

    fn masked_model_and_mask(weights: Vec<f32>) -> (Aggregation, MaskObject) {
        let model = Model::from_primitives(weights.iter().cloned()).unwrap();
        let config = utils::mask_config();
        let (seed, masked_model) = Masker::new(config.into()).mask(Scalar::unit(), &model);
        let mask = seed.derive_mask(weights.len(), config.into());
        (Aggregation::from(masked_model), mask)
    }

    #[tokio::test]
    async fn test_unmask_commits_the_global_model() {
        let mut store = MemoryStore::new();
        let state = utils::coordinator_state();

        let summer = utils::generate_summer();
        utils::register_summer(&mut store, &summer).await;

        let (aggregation, mask) = masked_model_and_mask(vec![0.5_f32; 4]);
        store
            .incr_mask_score(&summer.keys.public, &mask)
            .await
            .unwrap()
            .into_inner()
            .unwrap();

        let (state_machine, _request_tx, events) = StateMachineBuilder::new(store.clone(), state)
            .in_unmask_phase(aggregation)
            .build();
        assert!(state_machine.is_unmask());

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_idle());

        // the unmasked model was broadcasted and committed
        let broadcasted = match events.model_listener().get_latest().event {
            ModelUpdate::New(model) => model,
            ModelUpdate::Invalidate => panic!("expected a model broadcast"),
        };
        let weights: Vec<f32> = (*broadcasted).clone().into_primitives_unchecked().collect();
        assert!(weights.iter().all(|w| (w - 0.5).abs() < 1e-9));

        let id = store.latest_global_model_id().await.unwrap().unwrap();
        let committed = store.global_model(&id).await.unwrap().unwrap();
        assert_eq!(committed, *broadcasted);
    }

    #[tokio::test]
    async fn test_unmask_without_any_mask_fails_the_round() {
        let store = MemoryStore::new();
        let state = utils::coordinator_state();
        let (aggregation, _) = masked_model_and_mask(vec![0.5_f32; 4]);

        let (state_machine, _request_tx, _events) = StateMachineBuilder::new(store, state)
            .in_unmask_phase(aggregation)
            .build();

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_failure());
    }

    #[test]
    fn test_select_mask_plurality_wins() {
        let (_, mask_a) = masked_model_and_mask(vec![0.1_f32; 4]);
        let (_, mask_b) = masked_model_and_mask(vec![0.2_f32; 4]);

        // the highest score wins no matter where the store put it
        let selected = select_mask(vec![(mask_a.clone(), 2), (mask_b.clone(), 1)]).unwrap();
        assert_eq!(selected, mask_a);
        let selected = select_mask(vec![(mask_b, 1), (mask_a.clone(), 2)]).unwrap();
        assert_eq!(selected, mask_a);
    }

    #[test]
    fn test_select_mask_tie_break_is_deterministic() {
        let (_, mask_a) = masked_model_and_mask(vec![0.1_f32; 4]);
        let (_, mask_b) = masked_model_and_mask(vec![0.2_f32; 4]);

        let selected_ab = select_mask(vec![(mask_a.clone(), 1), (mask_b.clone(), 1)]).unwrap();
        let selected_ba = select_mask(vec![(mask_b, 1), (mask_a, 1)]).unwrap();
        // whatever order the store returns, the same mask wins
        assert_eq!(selected_ab, selected_ba);
    }

    #[test]
    fn test_select_mask_empty() {
        assert!(matches!(select_mask(vec![]), Err(UnmaskError::NoMask)));
    }

    #[tokio::test]
    async fn test_dissenting_masks_resolve_by_plurality() {
        // two sum participants report the same mask, a third dissents: the
        // majority mask unmasks the model
        let mut store = MemoryStore::new();
        let state = utils::coordinator_state();

        let summers: Vec<_> = (0..3).map(|_| utils::generate_summer()).collect();
        for summer in &summers {
            utils::register_summer(&mut store, summer).await;
        }

        let (aggregation, mask) = masked_model_and_mask(vec![0.25_f32; 4]);
        let dissenting = MaskSeed::generate().derive_mask(4, utils::mask_config().into());

        for (summer, mask) in summers.iter().zip(&[mask.clone(), mask.clone(), dissenting]) {
            store
                .incr_mask_score(&summer.keys.public, mask)
                .await
                .unwrap()
                .into_inner()
                .unwrap();
        }

        let (state_machine, _request_tx, events) = StateMachineBuilder::new(store, state)
            .in_unmask_phase(aggregation)
            .build();

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_idle());

        let broadcasted = match events.model_listener().get_latest().event {
            ModelUpdate::New(model) => model,
            ModelUpdate::Invalidate => panic!("expected a model broadcast"),
        };
        let weights: Vec<f32> = (*broadcasted).clone().into_primitives_unchecked().collect();
        assert!(weights.iter().all(|w| (w - 0.25).abs() < 1e-9));
    }
}
