//! The event bus between the state machine and the services.
//!
//! The state machine publishes round data over `watch` channels; the
//! services hold [`EventListener`]s and always observe the latest value.

use std::sync::Arc;

use tokio::sync::watch;

use crate::state_machine::phases::PhaseName;
use petnet_core::{
    common::RoundParameters,
    crypto::EncryptKeyPair,
    mask::Model,
    SeedDict,
    SumDict,
};

/// An event emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<E> {
    /// Metadata that associates this event to the round in which it was emitted.
    pub round_id: u64,
    /// The event itself.
    pub event: E,
}

/// Global model update event.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelUpdate {
    /// The model of the previous round is no longer valid.
    Invalidate,
    /// A new global model has been committed.
    New(Arc<Model>),
}

/// Dictionary update event.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DictionaryUpdate<D> {
    /// The dictionary of the previous round is no longer valid.
    Invalidate,
    /// A new dictionary is available.
    New(Arc<D>),
}

/// The sender half for a single kind of event.
#[derive(Debug)]
struct EventBroadcaster<E>(watch::Sender<Event<E>>);

/// A listener for a single kind of event.
#[derive(Debug, Clone)]
pub struct EventListener<E>(watch::Receiver<Event<E>>);

impl<E: Clone> EventListener<E> {
    /// Returns the most recently broadcasted event.
    pub fn get_latest(&self) -> Event<E> {
        self.0.borrow().clone()
    }
}

fn channel<E>(round_id: u64, event: E) -> (EventBroadcaster<E>, EventListener<E>) {
    let (tx, rx) = watch::channel(Event { round_id, event });
    (EventBroadcaster(tx), EventListener(rx))
}

/// A convenience type to emit any coordinator event.
#[derive(Debug)]
pub struct EventPublisher {
    /// The round ID that is attached to all events.
    round_id: u64,
    keys_tx: EventBroadcaster<EncryptKeyPair>,
    params_tx: EventBroadcaster<RoundParameters>,
    phase_tx: EventBroadcaster<PhaseName>,
    deadline_tx: EventBroadcaster<Option<u64>>,
    model_tx: EventBroadcaster<ModelUpdate>,
    sum_dict_tx: EventBroadcaster<DictionaryUpdate<SumDict>>,
    seed_dict_tx: EventBroadcaster<DictionaryUpdate<SeedDict>>,
}

/// The `EventSubscriber` hands out [`EventListener`]s for every kind of
/// coordinator event.
#[derive(Debug, Clone)]
pub struct EventSubscriber {
    keys_rx: EventListener<EncryptKeyPair>,
    params_rx: EventListener<RoundParameters>,
    phase_rx: EventListener<PhaseName>,
    deadline_rx: EventListener<Option<u64>>,
    model_rx: EventListener<ModelUpdate>,
    sum_dict_rx: EventListener<DictionaryUpdate<SumDict>>,
    seed_dict_rx: EventListener<DictionaryUpdate<SeedDict>>,
}

/// Generates a broadcast method on [`EventPublisher`]. Send failures are
/// ignored: they only occur when all listeners are gone, in which case nobody
/// cares about the event anyway.
macro_rules! broadcast_fn {
    ($(#[$doc:meta])* $name:ident, $field:ident, $event:ty) => {
        $(#[$doc])*
        pub fn $name(&mut self, event: $event) {
            let _ = self.$field.0.send(Event {
                round_id: self.round_id,
                event,
            });
        }
    };
}

/// Generates a listener accessor on [`EventSubscriber`].
macro_rules! listener_fn {
    ($(#[$doc:meta])* $name:ident, $field:ident, $event:ty) => {
        $(#[$doc])*
        pub fn $name(&self) -> EventListener<$event> {
            self.$field.clone()
        }
    };
}

impl EventPublisher {
    /// Initializes a new event publisher/subscriber pair with the given initial events.
    pub fn init(
        round_id: u64,
        keys: EncryptKeyPair,
        params: RoundParameters,
        phase: PhaseName,
        model: ModelUpdate,
    ) -> (Self, EventSubscriber) {
        let (keys_tx, keys_rx) = channel(round_id, keys);
        let (params_tx, params_rx) = channel(round_id, params);
        let (phase_tx, phase_rx) = channel(round_id, phase);
        let (deadline_tx, deadline_rx) = channel(round_id, None);
        let (model_tx, model_rx) = channel(round_id, model);
        let (sum_dict_tx, sum_dict_rx) = channel(round_id, DictionaryUpdate::Invalidate);
        let (seed_dict_tx, seed_dict_rx) = channel(round_id, DictionaryUpdate::Invalidate);

        let publisher = EventPublisher {
            round_id,
            keys_tx,
            params_tx,
            phase_tx,
            deadline_tx,
            model_tx,
            sum_dict_tx,
            seed_dict_tx,
        };
        let subscriber = EventSubscriber {
            keys_rx,
            params_rx,
            phase_rx,
            deadline_rx,
            model_rx,
            sum_dict_rx,
            seed_dict_rx,
        };
        (publisher, subscriber)
    }

    /// Sets the round ID that is attached to subsequently broadcasted events.
    pub fn set_round_id(&mut self, id: u64) {
        self.round_id = id;
    }

    broadcast_fn!(
        /// Emits a keys event.
        broadcast_keys, keys_tx, EncryptKeyPair
    );
    broadcast_fn!(
        /// Emits a round parameters event.
        broadcast_params, params_tx, RoundParameters
    );
    broadcast_fn!(
        /// Emits a phase event.
        broadcast_phase, phase_tx, PhaseName
    );
    broadcast_fn!(
        /// Emits the wall-clock deadline (unix seconds) of the current phase, or `None` for
        /// phases without a deadline.
        broadcast_deadline, deadline_tx, Option<u64>
    );
    broadcast_fn!(
        /// Emits a global model event.
        broadcast_model, model_tx, ModelUpdate
    );
    broadcast_fn!(
        /// Emits a sum dictionary update.
        broadcast_sum_dict, sum_dict_tx, DictionaryUpdate<SumDict>
    );
    broadcast_fn!(
        /// Emits a seed dictionary update.
        broadcast_seed_dict, seed_dict_tx, DictionaryUpdate<SeedDict>
    );
}

impl EventSubscriber {
    listener_fn!(
        /// Gets a listener for keys events.
        keys_listener, keys_rx, EncryptKeyPair
    );
    listener_fn!(
        /// Gets a listener for round parameters events.
        params_listener, params_rx, RoundParameters
    );
    listener_fn!(
        /// Gets a listener for phase events.
        phase_listener, phase_rx, PhaseName
    );
    listener_fn!(
        /// Gets a listener for phase deadline events.
        deadline_listener, deadline_rx, Option<u64>
    );
    listener_fn!(
        /// Gets a listener for global model events.
        model_listener, model_rx, ModelUpdate
    );
    listener_fn!(
        /// Gets a listener for sum dictionary events.
        sum_dict_listener, sum_dict_rx, DictionaryUpdate<SumDict>
    );
    listener_fn!(
        /// Gets a listener for seed dictionary events.
        seed_dict_listener, seed_dict_rx, DictionaryUpdate<SeedDict>
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use petnet_core::{
        common::RoundSeed,
        crypto::ByteObject,
        mask::{BoundType, DataType, GroupType, MaskConfig, ModelType},
    };

    fn round_params() -> RoundParameters {
        let config = MaskConfig {
            group_type: GroupType::Prime,
            data_type: DataType::F32,
            bound_type: BoundType::B0,
            model_type: ModelType::M3,
        };
        RoundParameters {
            pk: EncryptKeyPair::generate().public,
            sum: 0.5,
            update: 0.5,
            seed: RoundSeed::zeroed(),
            mask_config: config.into(),
            model_length: 4,
        }
    }

    #[test]
    fn test_listeners_see_the_latest_event() {
        let keys = EncryptKeyPair::generate();
        let (mut publisher, subscriber) = EventPublisher::init(
            0,
            keys,
            round_params(),
            PhaseName::Idle,
            ModelUpdate::Invalidate,
        );

        let phases = subscriber.phase_listener();
        assert_eq!(phases.get_latest().event, PhaseName::Idle);
        assert_eq!(phases.get_latest().round_id, 0);

        publisher.set_round_id(1);
        publisher.broadcast_phase(PhaseName::Sum);

        assert_eq!(phases.get_latest().event, PhaseName::Sum);
        assert_eq!(phases.get_latest().round_id, 1);
    }
}
