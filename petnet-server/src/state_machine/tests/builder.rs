//! A builder for state machines in arbitrary phases.

use crate::{
    state_machine::{
        coordinator::CoordinatorState,
        events::{EventPublisher, EventSubscriber, ModelUpdate},
        phases::{Failure, Idle, PhaseError, PhaseState, Shared, Sum, Sum2, Unmask, Update},
        requests::{RequestReceiver, RequestSender},
        StateMachine,
    },
    storage::Storage,
};
use petnet_core::mask::Aggregation;

enum InitialPhase {
    Idle,
    Sum,
    Update,
    Sum2(Aggregation),
    Unmask(Aggregation),
    Failure(PhaseError),
}

/// Builds a state machine that starts in a given phase, for tests.
pub struct StateMachineBuilder<T> {
    store: T,
    state: CoordinatorState,
    initial_phase: InitialPhase,
}

impl<T> StateMachineBuilder<T>
where
    T: Storage,
{
    pub fn new(store: T, state: CoordinatorState) -> Self {
        Self {
            store,
            state,
            initial_phase: InitialPhase::Idle,
        }
    }

    pub fn in_sum_phase(mut self) -> Self {
        self.initial_phase = InitialPhase::Sum;
        self
    }

    pub fn in_update_phase(mut self) -> Self {
        self.initial_phase = InitialPhase::Update;
        self
    }

    pub fn in_sum2_phase(mut self, aggregation: Aggregation) -> Self {
        self.initial_phase = InitialPhase::Sum2(aggregation);
        self
    }

    pub fn in_unmask_phase(mut self, aggregation: Aggregation) -> Self {
        self.initial_phase = InitialPhase::Unmask(aggregation);
        self
    }

    pub fn in_failure_phase(mut self, error: PhaseError) -> Self {
        self.initial_phase = InitialPhase::Failure(error);
        self
    }

    pub fn build(self) -> (StateMachine<T>, RequestSender, EventSubscriber) {
        let Self {
            store,
            state,
            initial_phase,
        } = self;

        let (event_publisher, event_subscriber) = EventPublisher::init(
            state.round_id,
            state.keys.clone(),
            state.round_params.clone(),
            state.phase,
            ModelUpdate::Invalidate,
        );
        let (request_rx, request_tx) = RequestReceiver::new();
        let shared = Shared::new(state, event_publisher, request_rx, store);

        let state_machine = match initial_phase {
            InitialPhase::Idle => PhaseState::<Idle, _>::new(shared).into(),
            InitialPhase::Sum => PhaseState::<Sum, _>::new(shared).into(),
            InitialPhase::Update => PhaseState::<Update, _>::new(shared).into(),
            InitialPhase::Sum2(aggregation) => {
                PhaseState::<Sum2, _>::new(shared, aggregation).into()
            }
            InitialPhase::Unmask(aggregation) => {
                PhaseState::<Unmask, _>::new(shared, aggregation).into()
            }
            InitialPhase::Failure(error) => PhaseState::<Failure, _>::new(shared, error).into(),
        };

        (state_machine, request_tx, event_subscriber)
    }
}
