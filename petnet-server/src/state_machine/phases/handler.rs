//! Request handling shared by the sum, update and sum2 phases.

use async_trait::async_trait;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, Span};
use tracing_futures::Instrument;

use crate::{
    state_machine::{
        coordinator::PhaseParameters,
        phases::{unix_now, Phase, PhaseError, PhaseState},
        requests::{RequestError, ResponseSender, StateMachineRequest},
    },
    storage::Storage,
};

/// Message counters of a phase.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhaseCounters {
    /// The number of accepted messages.
    pub accepted: u64,
    /// The number of rejected messages.
    pub rejected: u64,
    /// The number of discarded messages.
    pub discarded: u64,
}

/// A trait that must be implemented by a phase that handles requests.
#[async_trait]
pub trait Handler {
    /// Handles a request.
    ///
    /// # Errors
    /// Fails on protocol and on storage errors.
    async fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError>;

    /// The message count and time bounds of this phase.
    fn phase_parameters(&self) -> PhaseParameters;

    /// The message counters of this phase.
    fn counters(&self) -> PhaseCounters;

    /// A mutable reference to the message counters of this phase.
    fn counters_mut(&mut self) -> &mut PhaseCounters;
}

impl<S, T> PhaseState<S, T>
where
    Self: Handler + Phase<T>,
    S: Send,
    T: Storage,
{
    /// Processes requests wrt the phase parameters.
    ///
    /// - Processes requests for at least `time.min` seconds, counted from the
    ///   phase entry time.
    /// - Then processes requests until `count.min` messages have been
    ///   accepted, bounded by `time.max` seconds since phase entry.
    /// - At most `count.max` messages are accepted; surplus messages are
    ///   discarded.
    ///
    /// Since the bounds are computed from the recorded phase entry time, a
    /// phase that is resumed after a restart only gets the remainder of its
    /// time window.
    ///
    /// # Errors
    /// Fails if all request senders have been dropped or if `count.min` is
    /// not reached before `time.max` elapses.
    pub(in crate::state_machine) async fn process_requests(&mut self) -> Result<(), PhaseError> {
        let PhaseParameters { count, time } = self.phase_parameters();
        let elapsed = unix_now().saturating_sub(self.shared.state.phase_entered_at);
        let min_time = time.min.saturating_sub(elapsed);
        let max_time = time.max.saturating_sub(elapsed);
        info!("processing requests");
        debug!(
            "processing for min {} and max {} more seconds",
            min_time, max_time,
        );

        self.process_during(Duration::from_secs(min_time)).await?;

        let time_left = max_time.saturating_sub(min_time);
        timeout(Duration::from_secs(time_left), self.process_until_enough()).await??;

        let counters = self.counters();
        info!(
            "in total {} messages accepted (min {} and max {} required)",
            counters.accepted, count.min, count.max,
        );
        info!("in total {} messages rejected", counters.rejected);
        info!(
            "in total {} messages discarded (purged not included)",
            counters.discarded,
        );
        Ok(())
    }

    /// Processes requests for as long as the given duration.
    async fn process_during(&mut self, dur: Duration) -> Result<(), PhaseError> {
        let deadline = tokio::time::sleep(dur);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    debug!("duration elapsed");
                    break Ok(());
                }
                next = self.next_request() => {
                    let (req, span, resp_tx) = next?;
                    self.process_single(req, span, resp_tx).await;
                }
            }
        }
    }

    /// Processes requests until enough have been accepted.
    async fn process_until_enough(&mut self) -> Result<(), PhaseError> {
        while !self.has_enough_messages() {
            let (req, span, resp_tx) = self.next_request().await?;
            self.process_single(req, span, resp_tx).await;
        }
        Ok(())
    }

    /// Processes a single request.
    ///
    /// The request is discarded if the maximum message count is already reached, accepted if
    /// it is handled successfully and rejected otherwise.
    async fn process_single(
        &mut self,
        req: StateMachineRequest,
        span: Span,
        resp_tx: ResponseSender,
    ) {
        let response = async {
            if self.has_overmuch_messages() {
                self.counters_mut().discarded += 1;
                debug!("{} messages discarded", self.counters().discarded);
                Err(RequestError::MessageDiscarded)
            } else {
                let response = self.handle_request(req).await;
                if response.is_ok() {
                    self.counters_mut().accepted += 1;
                    debug!(
                        "{} messages accepted (min {} and max {} required)",
                        self.counters().accepted,
                        self.phase_parameters().count.min,
                        self.phase_parameters().count.max,
                    );
                } else {
                    self.counters_mut().rejected += 1;
                    debug!("{} messages rejected", self.counters().rejected);
                }
                response
            }
        }
        .instrument(span)
        .await;

        // this may error out if the receiver has already been dropped, which is fine
        let _ = resp_tx.send(response);
    }

    /// Checks whether enough messages have been accepted wrt the phase parameters.
    fn has_enough_messages(&self) -> bool {
        self.counters().accepted >= self.phase_parameters().count.min
    }

    /// Checks whether too many messages have been accepted wrt the phase parameters.
    fn has_overmuch_messages(&self) -> bool {
        self.counters().accepted >= self.phase_parameters().count.max
    }
}
