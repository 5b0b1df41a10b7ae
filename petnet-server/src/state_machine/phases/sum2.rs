//! The sum2 phase: collecting the reconstructed masks.

use async_trait::async_trait;

use crate::{
    state_machine::{
        coordinator::PhaseParameters,
        phases::{
            Handler,
            Phase,
            PhaseCounters,
            PhaseError,
            PhaseName,
            PhaseState,
            Shared,
            Unmask,
        },
        requests::{RequestError, StateMachineRequest, Sum2Request},
        StateMachine,
    },
    storage::{CoordinatorStorage, Storage},
};
use petnet_core::mask::Aggregation;

/// The sum2 phase.
#[derive(Debug)]
pub struct Sum2 {
    /// The message counters of this phase.
    counters: PhaseCounters,
    /// The aggregate of the masked models, carried over from the update phase.
    aggregation: Aggregation,
}

#[async_trait]
impl<T> Handler for PhaseState<Sum2, T>
where
    T: Storage,
{
    /// Handles a [`StateMachineRequest::Sum2`] request; any other request is rejected.
    async fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError> {
        match req {
            StateMachineRequest::Sum2(Sum2Request {
                participant_pk,
                model_mask,
            }) => {
                self.shared
                    .store
                    .incr_mask_score(&participant_pk, &model_mask)
                    .await?
                    .into_inner()?;
                Ok(())
            }
            _ => Err(RequestError::MessageRejected),
        }
    }

    fn phase_parameters(&self) -> PhaseParameters {
        self.shared.state.sum2
    }

    fn counters(&self) -> PhaseCounters {
        self.private.counters
    }

    fn counters_mut(&mut self) -> &mut PhaseCounters {
        &mut self.private.counters
    }
}

#[async_trait]
impl<T> Phase<T> for PhaseState<Sum2, T>
where
    T: Storage,
{
    const NAME: PhaseName = PhaseName::Sum2;

    async fn process(&mut self) -> Result<(), PhaseError> {
        self.process_requests().await
    }

    async fn next(self) -> Option<StateMachine<T>> {
        Some(PhaseState::<Unmask, _>::new(self.shared, self.private.aggregation).into())
    }
}

impl<T> PhaseState<Sum2, T>
where
    T: Storage,
{
    /// Creates a new sum2 phase.
    pub fn new(shared: Shared<T>, aggregation: Aggregation) -> Self {
        Self {
            private: Sum2 {
                counters: PhaseCounters::default(),
                aggregation,
            },
            shared,
        }
    }

    /// Creates a sum2 phase that resumes after a restart, with the number of
    /// masks submitted so far.
    pub(in crate::state_machine) fn restore(
        shared: Shared<T>,
        aggregation: Aggregation,
        accepted: u64,
    ) -> Self {
        let mut state = Self::new(shared, aggregation);
        state.private.counters.accepted = accepted;
        state
    }
}
