//! The phase abstraction of the state machine.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use derive_more::Display;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, error_span, info, warn};
use tracing_futures::Instrument;

use crate::{
    state_machine::{
        coordinator::CoordinatorState,
        events::EventPublisher,
        phases::{Failure, PhaseError},
        requests::{RequestError, RequestMessage, RequestReceiver},
        StateMachine,
    },
    storage::Storage,
};

/// The name of a phase.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum PhaseName {
    #[display(fmt = "Idle")]
    Idle = 0,
    #[display(fmt = "Sum")]
    Sum = 1,
    #[display(fmt = "Update")]
    Update = 2,
    #[display(fmt = "Sum2")]
    Sum2 = 3,
    #[display(fmt = "Unmask")]
    Unmask = 4,
    #[display(fmt = "Failure")]
    Failure = 5,
    #[display(fmt = "Shutdown")]
    Shutdown = 6,
}

impl PhaseName {
    /// Whether transitions into this phase are recorded in the store.
    ///
    /// Failure and Shutdown are not: a crash during either resumes from the
    /// last recorded protocol phase instead.
    fn is_recorded(self) -> bool {
        !matches!(self, PhaseName::Failure | PhaseName::Shutdown)
    }
}

/// The current wall-clock time in unix seconds.
pub(in crate::state_machine) fn unix_now() -> u64 {
    // safe unwrap: the system clock does not predate the unix epoch
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// A trait that must be implemented by a state in order to move to a next state.
#[async_trait]
pub trait Phase<T>
where
    T: Storage,
{
    /// The name of this phase.
    const NAME: PhaseName;

    /// Performs the tasks of this phase.
    async fn process(&mut self) -> Result<(), PhaseError>;

    /// Broadcasts the data of this phase (nothing by default).
    fn broadcast(&mut self) {}

    /// Moves from this phase to the next phase.
    async fn next(self) -> Option<StateMachine<T>>;
}

/// The coordinator state and the I/O interfaces shared by all phases.
pub struct Shared<T> {
    /// The coordinator state.
    pub(in crate::state_machine) state: CoordinatorState,
    /// The request receiver half.
    pub(in crate::state_machine) request_rx: RequestReceiver,
    /// The event publisher.
    pub(in crate::state_machine) events: EventPublisher,
    /// The store for the round state and the global models.
    pub(in crate::state_machine) store: T,
    /// Whether the next phase entry resumes a restored phase, in which case
    /// the recorded entry time is kept.
    pub(in crate::state_machine) resume: bool,
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("state", &self.state)
            .field("request_rx", &self.request_rx)
            .field("events", &self.events)
            .finish()
    }
}

impl<T> Shared<T> {
    /// Creates a new shared state.
    pub fn new(
        coordinator_state: CoordinatorState,
        publisher: EventPublisher,
        request_rx: RequestReceiver,
        store: T,
    ) -> Self {
        Self {
            state: coordinator_state,
            request_rx,
            events: publisher,
            store,
            resume: false,
        }
    }

    /// Sets the round ID to the given value.
    pub fn set_round_id(&mut self, id: u64) {
        self.state.round_id = id;
        self.events.set_round_id(id);
    }

    /// Returns the current round ID.
    pub fn round_id(&self) -> u64 {
        self.state.round_id
    }

    /// The wall-clock deadline (unix seconds) of the given phase, or `None` for phases
    /// without a deadline.
    fn phase_deadline(&self, phase: PhaseName) -> Option<u64> {
        self.state
            .phase_parameters(phase)
            .map(|params| self.state.phase_entered_at + params.time.max)
    }
}

/// The state corresponding to a phase of the PET protocol.
///
/// This contains the phase-dependent `private` state and the phase-independent `shared` state
/// which is passed along the state transitions.
pub struct PhaseState<S, T> {
    /// The private state.
    pub(in crate::state_machine) private: S,
    /// The shared coordinator state and I/O interfaces.
    pub(in crate::state_machine) shared: Shared<T>,
}

impl<S, T> PhaseState<S, T>
where
    S: Send,
    T: Storage,
    Self: Phase<T>,
{
    /// Runs the current phase to completion.
    ///
    /// 1. Records the phase transition in the store.
    /// 2. Performs the phase tasks.
    /// 3. Purges outdated requests.
    /// 4. Broadcasts the phase data.
    /// 5. Transitions to the next phase.
    pub async fn run_phase(mut self) -> Option<StateMachine<T>> {
        let phase = Self::NAME;
        let span = error_span!("run_phase", phase = %phase);

        async move {
            info!("starting phase");

            // The Failure and Shutdown phases are not recorded, so the
            // in-memory phase must stay on the last recorded one for the
            // compare-and-set below to match again afterwards.
            if phase.is_recorded() {
                let expected = self.shared.state.phase;
                self.shared.state.phase = phase;
                if !self.shared.resume {
                    self.shared.state.phase_entered_at = unix_now();
                }
                self.shared.resume = false;

                match self.shared.store.advance_phase(expected, &self.shared.state).await {
                    Ok(advance) => {
                        if advance.into_inner().is_err() {
                            error!("another coordinator recorded a conflicting phase");
                            return None;
                        }
                    }
                    Err(err) => {
                        warn!("failed to record the phase transition");
                        return Some(self.into_failure_state(PhaseError::RecordPhase(err)));
                    }
                }
            }

            self.shared.events.broadcast_phase(phase);
            let deadline = self.shared.phase_deadline(phase);
            self.shared.events.broadcast_deadline(deadline);

            if let Err(err) = self.process().await {
                warn!("failed to perform the phase tasks");
                return Some(self.into_failure_state(err));
            }
            info!("phase ran successfully");

            if let Err(err) = self.purge_outdated_requests() {
                warn!("failed to purge outdated requests");
                match phase {
                    PhaseName::Failure | PhaseName::Shutdown => {
                        debug!(
                            "already in the {} phase: ignoring the error while purging",
                            phase,
                        );
                    }
                    _ => return Some(self.into_failure_state(err)),
                }
            }

            self.broadcast();

            info!("transitioning to the next phase");
            self.next().await
        }
        .instrument(span)
        .await
    }

    /// Purges all pending requests that are considered outdated at the end of a phase.
    fn purge_outdated_requests(&mut self) -> Result<(), PhaseError> {
        info!("discarding outdated requests");
        while let Some((_, span, resp_tx)) = self.try_next_request()? {
            let _span_guard = span.enter();
            debug!("discarding outdated request");
            let _ = resp_tx.send(Err(RequestError::MessageDiscarded));
        }
        Ok(())
    }
}

impl<S, T> PhaseState<S, T> {
    /// Receives the next queued request.
    ///
    /// # Errors
    /// Returns [`PhaseError::RequestChannel`] when all sender halves have been dropped.
    pub(in crate::state_machine) async fn next_request(
        &mut self,
    ) -> Result<RequestMessage, PhaseError> {
        debug!("waiting for the next incoming request");
        self.shared.request_rx.recv().await.ok_or_else(|| {
            error!("request receiver broken: senders have been dropped");
            PhaseError::RequestChannel("all message senders have been dropped!")
        })
    }

    pub(in crate::state_machine) fn try_next_request(
        &mut self,
    ) -> Result<Option<RequestMessage>, PhaseError> {
        use tokio::sync::mpsc::error::TryRecvError;
        match self.shared.request_rx.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(TryRecvError::Empty) => {
                debug!("no pending request");
                Ok(None)
            }
            Err(TryRecvError::Disconnected) => {
                warn!("failed to get next pending request: channel shut down");
                Err(PhaseError::RequestChannel(
                    "all message senders have been dropped!",
                ))
            }
        }
    }

    pub(in crate::state_machine) fn into_failure_state(self, err: PhaseError) -> StateMachine<T> {
        PhaseState::<Failure, _>::new(self.shared, err).into()
    }
}
