//! The sum phase: building the sum dictionary.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

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
            Update,
        },
        requests::{RequestError, StateMachineRequest, SumRequest},
        StateMachine,
    },
    storage::{CoordinatorStorage, Storage, StorageError},
};
use petnet_core::SumDict;

/// Errors which can occur during the sum phase.
#[derive(Debug, Error)]
pub enum SumError {
    #[error("sum dictionary does not exist")]
    NoSumDict,
    #[error("fetching the sum dictionary failed: {0}")]
    FetchSumDict(StorageError),
}

/// The sum phase.
#[derive(Debug)]
pub struct Sum {
    /// The message counters of this phase.
    counters: PhaseCounters,
    /// The frozen sum dictionary, fetched at the end of the phase.
    sum_dict: Option<Arc<SumDict>>,
}

#[async_trait]
impl<T> Handler for PhaseState<Sum, T>
where
    T: Storage,
{
    /// Handles a [`StateMachineRequest::Sum`] request; any other request is rejected.
    async fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError> {
        match req {
            StateMachineRequest::Sum(SumRequest {
                participant_pk,
                ephm_pk,
            }) => {
                self.shared
                    .store
                    .add_sum_participant(&participant_pk, &ephm_pk)
                    .await?
                    .into_inner()?;
                Ok(())
            }
            _ => Err(RequestError::MessageRejected),
        }
    }

    fn phase_parameters(&self) -> PhaseParameters {
        self.shared.state.sum
    }

    fn counters(&self) -> PhaseCounters {
        self.private.counters
    }

    fn counters_mut(&mut self) -> &mut PhaseCounters {
        &mut self.private.counters
    }
}

#[async_trait]
impl<T> Phase<T> for PhaseState<Sum, T>
where
    T: Storage,
{
    const NAME: PhaseName = PhaseName::Sum;

    async fn process(&mut self) -> Result<(), PhaseError> {
        self.process_requests().await?;
        self.freeze_sum_dict().await?;
        Ok(())
    }

    fn broadcast(&mut self) {
        // safe unwrap: the sum dict has been fetched in `process`
        let sum_dict = self.private.sum_dict.take().unwrap();
        info!("broadcasting the sum dictionary");
        self.shared
            .events
            .broadcast_sum_dict(DictionaryUpdate::New(sum_dict));
    }

    async fn next(self) -> Option<StateMachine<T>> {
        Some(PhaseState::<Update, _>::new(self.shared).into())
    }
}

impl<T> PhaseState<Sum, T>
where
    T: Storage,
{
    /// Creates a new sum phase.
    pub fn new(shared: Shared<T>) -> Self {
        Self {
            private: Sum {
                counters: PhaseCounters::default(),
                sum_dict: None,
            },
            shared,
        }
    }

    /// Creates a sum phase that resumes after a restart, with the number of
    /// already registered sum participants.
    pub(in crate::state_machine) fn restore(shared: Shared<T>, accepted: u64) -> Self {
        let mut state = Self::new(shared);
        state.private.counters.accepted = accepted;
        state
    }

    /// Fetches the sum dictionary which is frozen for the rest of the round.
    async fn freeze_sum_dict(&mut self) -> Result<(), SumError> {
        info!("freezing the sum dictionary");
        let sum_dict = self
            .shared
            .store
            .sum_dict()
            .await
            .map_err(SumError::FetchSumDict)?
            .ok_or(SumError::NoSumDict)?;
        self.private.sum_dict = Some(Arc::new(sum_dict));
        Ok(())
    }
}
