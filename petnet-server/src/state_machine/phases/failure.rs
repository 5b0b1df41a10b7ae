//! The failure phase: discarding a failed round.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info};

use crate::{
    state_machine::{
        events::DictionaryUpdate,
        phases::{
            Idle,
            IdleError,
            Phase,
            PhaseName,
            PhaseState,
            Shared,
            Shutdown,
            SumError,
            UnmaskError,
            UpdateError,
        },
        StateMachine,
    },
    storage::{Storage, StorageError},
};

/// Errors which can occur during the execution of a phase.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("request channel error: {0}")]
    RequestChannel(&'static str),
    #[error("the phase timed out")]
    PhaseTimeout(#[from] tokio::time::error::Elapsed),
    #[error("recording the phase transition failed: {0}")]
    RecordPhase(StorageError),
    #[error(transparent)]
    Idle(#[from] IdleError),
    #[error(transparent)]
    Sum(#[from] SumError),
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error(transparent)]
    Unmask(#[from] UnmaskError),
}

/// The failure phase.
#[derive(Debug)]
pub struct Failure {
    pub(in crate::state_machine) error: PhaseError,
}

#[async_trait]
impl<T> Phase<T> for PhaseState<Failure, T>
where
    T: Storage,
{
    const NAME: PhaseName = PhaseName::Failure;

    async fn process(&mut self) -> Result<(), PhaseError> {
        error!("discarding the round: {}", self.private.error);
        Ok(())
    }

    fn broadcast(&mut self) {
        info!("broadcasting invalidation of the round dictionaries");
        let events = &mut self.shared.events;
        events.broadcast_sum_dict(DictionaryUpdate::Invalidate);
        events.broadcast_seed_dict(DictionaryUpdate::Invalidate);
    }

    async fn next(mut self) -> Option<StateMachine<T>> {
        if matches!(self.private.error, PhaseError::RequestChannel(_)) {
            // nobody can submit requests anymore: terminate
            return Some(PhaseState::<Shutdown, _>::new(self.shared).into());
        }

        // a new round must not be opened against an unreachable store
        while let Err(err) = <T as Storage>::is_ready(&mut self.shared.store).await {
            error!("store not ready: {}", err);
            info!("trying again in 5 sec");
            sleep(Duration::from_secs(5)).await;
        }

        // the round id still advances; the committed global model is untouched
        Some(PhaseState::<Idle, _>::new(self.shared).into())
    }
}

impl<T> PhaseState<Failure, T> {
    /// Creates a new failure phase.
    pub fn new(shared: Shared<T>, error: PhaseError) -> Self {
        Self {
            private: Failure { error },
            shared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state_machine::tests::{builder::StateMachineBuilder, utils},
        storage::memory::MemoryStore,
    };

    #[tokio::test]
    async fn test_failure_to_idle_advances_the_round() {
        let store = MemoryStore::new();
        let state = utils::coordinator_state();
        let round_id = state.round_id;

        let (state_machine, _request_tx, events) = StateMachineBuilder::new(store, state)
            .in_failure_phase(PhaseError::Sum(SumError::NoSumDict))
            .build();
        assert!(state_machine.is_failure());

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_idle());

        // the round advances even though no model was committed
        assert_eq!(state_machine.shared().state.round_id, round_id + 1);
        assert_eq!(
            events.sum_dict_listener().get_latest().event,
            DictionaryUpdate::Invalidate,
        );
    }

    #[tokio::test]
    async fn test_failure_to_shutdown_on_closed_channel() {
        let store = MemoryStore::new();
        let state = utils::coordinator_state();

        let (state_machine, _request_tx, _events) = StateMachineBuilder::new(store, state)
            .in_failure_phase(PhaseError::RequestChannel("closed"))
            .build();

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_shutdown());
    }
}
