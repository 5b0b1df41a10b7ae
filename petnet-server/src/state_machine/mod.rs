//! The state machine that controls the execution of the PET protocol.
//!
//! # Overview
//!
//! The state machine moves the coordinator through the phases of a round:
//!
//! ```text
//! Idle -> Sum -> Update -> Sum2 -> Unmask -> Idle -> ...
//! ```
//!
//! Any phase that fails (most commonly because its minimum message count was
//! not reached before its deadline) moves to `Failure`, which discards the
//! round and loops back to `Idle`; the committed global model is unchanged.
//! When the request channel is closed, `Failure` moves to `Shutdown` instead
//! and the machine terminates.
//!
//! Every phase transition is recorded in the [`storage`] with a
//! compare-and-set, together with the wall-clock time at which the phase was
//! entered. After a restart, the [`StateMachineInitializer`] restores the
//! recorded phase and the machine resumes with the remainder of the phase's
//! time window.
//!
//! # Requests
//!
//! [`StateMachineInitializer::init`] returns a [`RequestSender`] half of the
//! request channel. The service layer submits [`StateMachineRequest`]s
//! through it and awaits the response; the machine processes requests only
//! during the phase they belong to and rejects everything else.
//!
//! # Events
//!
//! The state machine publishes round parameters, phase changes, dictionaries
//! and the global model over the event bus (see [`events`]); the service
//! layer subscribes via the [`EventSubscriber`].
//!
//! [`storage`]: crate::storage
//! [`StateMachineInitializer`]: initializer::StateMachineInitializer
//! [`StateMachineInitializer::init`]: initializer::StateMachineInitializer::init
//! [`RequestSender`]: requests::RequestSender
//! [`StateMachineRequest`]: requests::StateMachineRequest
//! [`EventSubscriber`]: events::EventSubscriber

pub mod coordinator;
pub mod events;
pub mod initializer;
pub mod phases;
pub mod requests;

use derive_more::From;

use self::phases::{Failure, Idle, PhaseState, Shutdown, Sum, Sum2, Unmask, Update};
use crate::storage::Storage;

#[cfg(test)]
pub(crate) mod tests;

/// The state machine with all its phases.
#[derive(From)]
pub enum StateMachine<T> {
    /// The idle phase.
    Idle(PhaseState<Idle, T>),
    /// The sum phase.
    Sum(PhaseState<Sum, T>),
    /// The update phase.
    Update(PhaseState<Update, T>),
    /// The sum2 phase.
    Sum2(PhaseState<Sum2, T>),
    /// The unmask phase.
    Unmask(PhaseState<Unmask, T>),
    /// The failure phase.
    Failure(PhaseState<Failure, T>),
    /// The shutdown phase.
    Shutdown(PhaseState<Shutdown, T>),
}

impl<T> StateMachine<T>
where
    T: Storage,
{
    /// Moves the state machine to the next phase and consumes the current one.
    ///
    /// Returns the next state machine or `None` if the machine terminated in
    /// the [`Shutdown`] phase.
    pub async fn next(self) -> Option<Self> {
        match self {
            StateMachine::Idle(state) => state.run_phase().await,
            StateMachine::Sum(state) => state.run_phase().await,
            StateMachine::Update(state) => state.run_phase().await,
            StateMachine::Sum2(state) => state.run_phase().await,
            StateMachine::Unmask(state) => state.run_phase().await,
            StateMachine::Failure(state) => state.run_phase().await,
            StateMachine::Shutdown(state) => state.run_phase().await,
        }
    }

    /// Runs the state machine until it shuts down.
    ///
    /// The machine shuts down once all [`RequestSender`]s have been dropped.
    ///
    /// [`RequestSender`]: requests::RequestSender
    pub async fn run(mut self) -> Option<()> {
        loop {
            self = self.next().await?;
        }
    }
}

#[cfg(test)]
impl<T> StateMachine<T> {
    pub fn is_idle(&self) -> bool {
        matches!(self, StateMachine::Idle(_))
    }

    pub fn is_sum(&self) -> bool {
        matches!(self, StateMachine::Sum(_))
    }

    pub fn is_update(&self) -> bool {
        matches!(self, StateMachine::Update(_))
    }

    pub fn is_sum2(&self) -> bool {
        matches!(self, StateMachine::Sum2(_))
    }

    pub fn is_unmask(&self) -> bool {
        matches!(self, StateMachine::Unmask(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StateMachine::Failure(_))
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, StateMachine::Shutdown(_))
    }

    /// The shared state of whatever phase the machine is in.
    pub fn shared(&self) -> &phases::Shared<T> {
        match self {
            StateMachine::Idle(state) => &state.shared,
            StateMachine::Sum(state) => &state.shared,
            StateMachine::Update(state) => &state.shared,
            StateMachine::Sum2(state) => &state.shared,
            StateMachine::Unmask(state) => &state.shared,
            StateMachine::Failure(state) => &state.shared,
            StateMachine::Shutdown(state) => &state.shared,
        }
    }
}
