//! Initialization and crash recovery of the state machine.

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    settings::{MaskSettings, ModelSettings, PetSettings, RestoreSettings},
    state_machine::{
        coordinator::CoordinatorState,
        events::{EventPublisher, EventSubscriber, ModelUpdate},
        phases::{Idle, PhaseName, PhaseState, Shared, Sum, Sum2, Update},
        requests::{RequestReceiver, RequestSender},
        StateMachine,
    },
    storage::{CoordinatorStorage, ModelStorage, Storage, StorageError},
};

type InitResult<T> = Result<T, StateMachineInitializationError>;

/// Errors which can occur during the initialization of the state machine.
#[derive(Debug, Error)]
pub enum StateMachineInitializationError {
    #[error("initializing the crypto library failed")]
    CryptoInit,
    #[error("fetching the coordinator state failed: {0}")]
    FetchCoordinatorState(StorageError),
    #[error("deleting the coordinator data failed: {0}")]
    DeleteCoordinatorData(StorageError),
    #[error("persisting the coordinator state failed: {0}")]
    SetCoordinatorState(StorageError),
    #[error("fetching the round data failed: {0}")]
    FetchRoundData(StorageError),
    #[error("fetching the latest global model id failed: {0}")]
    FetchLatestGlobalModelId(StorageError),
    #[error("fetching the global model failed: {0}")]
    FetchGlobalModel(StorageError),
    #[error("{0}")]
    GlobalModelUnavailable(String),
    #[error("{0}")]
    GlobalModelInvalid(String),
}

/// The initializer of a [`StateMachine`].
///
/// With restoring enabled, it tries to resume the coordinator from the state
/// recorded in the store; otherwise (or if no state is recorded) the
/// coordinator starts fresh from the settings.
pub struct StateMachineInitializer<T> {
    pet_settings: PetSettings,
    mask_settings: MaskSettings,
    model_settings: ModelSettings,
    restore_settings: RestoreSettings,
    store: T,
}

impl<T> StateMachineInitializer<T>
where
    T: Storage,
{
    /// Creates a new [`StateMachineInitializer`].
    pub fn new(
        pet_settings: PetSettings,
        mask_settings: MaskSettings,
        model_settings: ModelSettings,
        restore_settings: RestoreSettings,
        store: T,
    ) -> Self {
        Self {
            pet_settings,
            mask_settings,
            model_settings,
            restore_settings,
            store,
        }
    }

    /// Initializes a new [`StateMachine`].
    ///
    /// # Behavior
    ///
    /// - If `restore.enable` is `false` or no coordinator state is recorded, the store is
    ///   reset and the machine starts from the settings with a fresh round.
    /// - If the recorded phase is `Sum`, `Update` or `Sum2`, the machine resumes that phase:
    ///   the message counts are derived from the store, the masked aggregate is restored, and
    ///   the phase keeps the remainder of its time window.
    /// - Any other recorded phase restarts at `Idle` with the recorded round id, which opens
    ///   a new round.
    /// - A recorded global model id whose model cannot be fetched fails the initialization:
    ///   restarting with an empty model would make participants discard their state.
    pub async fn init(
        mut self,
    ) -> InitResult<(StateMachine<T>, RequestSender, EventSubscriber)> {
        // crucial: init must be called before anything else in this module
        sodiumoxide::init().or(Err(StateMachineInitializationError::CryptoInit))?;

        if self.restore_settings.enable {
            self.from_previous_state().await
        } else {
            info!("restoring the coordinator state is disabled");
            let (state, model) = self.from_settings().await?;
            Ok(self.init_in_idle(state, model))
        }
    }

    // Creates a fresh coordinator state from the settings and resets the store.
    async fn from_settings(&mut self) -> InitResult<(CoordinatorState, ModelUpdate)> {
        info!("initializing the state machine from the settings");
        self.store
            .delete_coordinator_data()
            .await
            .map_err(StateMachineInitializationError::DeleteCoordinatorData)?;
        let state = CoordinatorState::new(
            self.pet_settings,
            self.mask_settings,
            self.model_settings.clone(),
        );
        self.store
            .set_coordinator_state(&state)
            .await
            .map_err(StateMachineInitializationError::SetCoordinatorState)?;
        Ok((state, ModelUpdate::Invalidate))
    }

    // Tries to restore the coordinator from the recorded state.
    async fn from_previous_state(
        mut self,
    ) -> InitResult<(StateMachine<T>, RequestSender, EventSubscriber)> {
        let state = match self
            .store
            .coordinator_state()
            .await
            .map_err(StateMachineInitializationError::FetchCoordinatorState)?
        {
            Some(state) => state,
            None => {
                // no recorded state: this is a fresh start
                let (state, model) = self.from_settings().await?;
                return Ok(self.init_in_idle(state, model));
            }
        };

        let global_model = self.load_latest_global_model(&state).await?;

        match state.phase {
            PhaseName::Sum => {
                info!("resuming the sum phase of round {}", state.round_id);
                let accepted = self
                    .store
                    .sum_dict()
                    .await
                    .map_err(StateMachineInitializationError::FetchRoundData)?
                    .map(|dict| dict.len() as u64)
                    .unwrap_or(0);
                Ok(self.init_resumed(state, global_model, |shared| {
                    PhaseState::<Sum, _>::restore(shared, accepted).into()
                }))
            }
            PhaseName::Update => {
                info!("resuming the update phase of round {}", state.round_id);
                let aggregation = match self
                    .store
                    .masked_aggregate()
                    .await
                    .map_err(StateMachineInitializationError::FetchRoundData)?
                {
                    Some(aggregation) => aggregation,
                    None => {
                        // no update message was accepted before the crash
                        return Ok(self.init_resumed(state, global_model, |shared| {
                            PhaseState::<Update, _>::new(shared).into()
                        }));
                    }
                };
                Ok(self.init_resumed(state, global_model, |shared| {
                    PhaseState::<Update, _>::restore(shared, aggregation).into()
                }))
            }
            PhaseName::Sum2 => {
                info!("resuming the sum2 phase of round {}", state.round_id);
                let aggregation = self
                    .store
                    .masked_aggregate()
                    .await
                    .map_err(StateMachineInitializationError::FetchRoundData)?;
                let accepted = self
                    .store
                    .mask_submitted_count()
                    .await
                    .map_err(StateMachineInitializationError::FetchRoundData)?;
                match aggregation {
                    Some(aggregation) => Ok(self.init_resumed(state, global_model, |shared| {
                        PhaseState::<Sum2, _>::restore(shared, aggregation, accepted).into()
                    })),
                    // without an aggregate there is nothing to unmask: restart the round
                    None => Ok(self.init_in_idle(state, global_model)),
                }
            }
            _ => {
                debug!("recorded phase {} restarts at idle", state.phase);
                Ok(self.init_in_idle(state, global_model))
            }
        }
    }

    // Loads the latest committed global model, if any.
    async fn load_latest_global_model(
        &mut self,
        state: &CoordinatorState,
    ) -> InitResult<ModelUpdate> {
        let global_model_id = match self
            .store
            .latest_global_model_id()
            .await
            .map_err(StateMachineInitializationError::FetchLatestGlobalModelId)?
        {
            // no round has been completed yet
            None => return Ok(ModelUpdate::Invalidate),
            Some(id) => id,
        };

        match self
            .store
            .global_model(&global_model_id)
            .await
            .map_err(StateMachineInitializationError::FetchGlobalModel)?
        {
            Some(model) => {
                if model.len() == state.round_params.model_length {
                    debug!("restored global model {}", global_model_id);
                    Ok(ModelUpdate::New(std::sync::Arc::new(model)))
                } else {
                    Err(StateMachineInitializationError::GlobalModelInvalid(
                        format!(
                            "the length {} of global model {} does not match the model length \
                             setting {}",
                            model.len(),
                            global_model_id,
                            state.round_params.model_length,
                        ),
                    ))
                }
            }
            None => Err(StateMachineInitializationError::GlobalModelUnavailable(
                format!("cannot find global model {}", global_model_id),
            )),
        }
    }

    // Builds the I/O parts shared by all initialization paths.
    fn init_shared(
        &mut self,
        state: CoordinatorState,
        global_model: ModelUpdate,
    ) -> (Shared<T>, RequestSender, EventSubscriber)
    where
        T: Clone,
    {
        let (event_publisher, event_subscriber) = EventPublisher::init(
            state.round_id,
            state.keys.clone(),
            state.round_params.clone(),
            state.phase,
            global_model,
        );
        let (request_rx, request_tx) = RequestReceiver::new();
        let shared = Shared::new(state, event_publisher, request_rx, self.store.clone());
        (shared, request_tx, event_subscriber)
    }

    // Builds a state machine that starts at the idle phase.
    fn init_in_idle(
        &mut self,
        state: CoordinatorState,
        global_model: ModelUpdate,
    ) -> (StateMachine<T>, RequestSender, EventSubscriber) {
        let (shared, request_tx, event_subscriber) = self.init_shared(state, global_model);
        let state_machine = StateMachine::from(PhaseState::<Idle, _>::new(shared));
        (state_machine, request_tx, event_subscriber)
    }

    // Builds a state machine that resumes a recorded phase.
    fn init_resumed(
        &mut self,
        state: CoordinatorState,
        global_model: ModelUpdate,
        into_phase: impl FnOnce(Shared<T>) -> StateMachine<T>,
    ) -> (StateMachine<T>, RequestSender, EventSubscriber) {
        let (mut shared, request_tx, event_subscriber) = self.init_shared(state, global_model);
        shared.resume = true;
        (into_phase(shared), request_tx, event_subscriber)
    }
}
