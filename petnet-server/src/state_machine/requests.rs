//! The request channel between the services and the state machine.

use derive_more::From;
use thiserror::Error;
use tokio::sync::{
    mpsc::{self, error::TryRecvError},
    oneshot,
};
use tracing::Span;

use crate::storage::{
    LocalSeedDictAddError,
    MaskScoreIncrError,
    StorageError,
    SumPartAddError,
};
use petnet_core::{
    mask::MaskObject,
    message::{Message, Payload},
    LocalSeedDict,
    ParticipantPublicKey,
    SumParticipantEphemeralPublicKey,
    SumParticipantPublicKey,
    UpdateParticipantPublicKey,
};

/// Errors which can occur while the state machine handles a request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("the message was rejected")]
    MessageRejected,
    #[error("the message was discarded")]
    MessageDiscarded,
    #[error("the model or scalar could not be aggregated")]
    AggregationFailed,
    #[error("internal error: {0}")]
    InternalError(&'static str),
    #[error("storage request failed: {0}")]
    CoordinatorStorage(#[from] StorageError),
    #[error(transparent)]
    LocalSeedDictAdd(#[from] LocalSeedDictAddError),
    #[error(transparent)]
    SumPartAdd(#[from] SumPartAddError),
    #[error(transparent)]
    MaskScoreIncr(#[from] MaskScoreIncrError),
}

/// A sum request.
#[derive(Debug)]
pub struct SumRequest {
    /// The public key of the participant.
    pub participant_pk: SumParticipantPublicKey,
    /// The ephemeral public key of the participant.
    pub ephm_pk: SumParticipantEphemeralPublicKey,
}

/// An update request.
#[derive(Debug)]
pub struct UpdateRequest {
    /// The public key of the participant.
    pub participant_pk: UpdateParticipantPublicKey,
    /// The local seed dict that contains the seed used to mask `masked_model`.
    pub local_seed_dict: LocalSeedDict,
    /// The masked model trained by the participant.
    pub masked_model: MaskObject,
}

/// A sum2 request.
#[derive(Debug)]
pub struct Sum2Request {
    /// The public key of the participant.
    pub participant_pk: ParticipantPublicKey,
    /// The model mask reconstructed by the participant.
    pub model_mask: MaskObject,
}

/// A request for the state machine.
#[derive(Debug, From)]
pub enum StateMachineRequest {
    /// A sum request.
    Sum(SumRequest),
    /// An update request.
    Update(UpdateRequest),
    /// A sum2 request.
    Sum2(Sum2Request),
}

impl From<Message> for StateMachineRequest {
    fn from(message: Message) -> Self {
        let Message {
            participant_pk,
            payload,
            ..
        } = message;
        match payload {
            Payload::Sum(sum) => SumRequest {
                participant_pk,
                ephm_pk: sum.ephm_pk,
            }
            .into(),
            Payload::Update(update) => UpdateRequest {
                participant_pk,
                local_seed_dict: update.local_seed_dict,
                masked_model: update.masked_model,
            }
            .into(),
            Payload::Sum2(sum2) => Sum2Request {
                participant_pk,
                model_mask: sum2.model_mask,
            }
            .into(),
            // multipart messages are reassembled by the service layer before
            // they are dispatched to the state machine
            Payload::Chunk(_) => unreachable!("chunks are never dispatched to the state machine"),
        }
    }
}

/// A channel over which the state machine sends the response to a request.
pub(in crate::state_machine) type ResponseSender = oneshot::Sender<Result<(), RequestError>>;

/// A queued request: the request itself, the span of the handler that
/// submitted it, and the channel for the response.
pub(in crate::state_machine) type RequestMessage = (StateMachineRequest, Span, ResponseSender);

/// A handle to send requests to the state machine.
#[derive(Clone, Debug)]
pub struct RequestSender(mpsc::UnboundedSender<RequestMessage>);

impl RequestSender {
    /// Sends a request to the state machine and waits for its response.
    ///
    /// # Errors
    /// Fails if the state machine has already shut down and the channel is closed as a result.
    pub async fn request(&self, req: StateMachineRequest, span: Span) -> Result<(), RequestError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        if self.0.send((req, span, resp_tx)).is_err() {
            return Err(RequestError::InternalError(
                "the state machine is shutting down",
            ));
        }
        resp_rx.await.unwrap_or(Err(RequestError::InternalError(
            "no response from the state machine",
        )))
    }
}

/// The receiver half of the request channel, owned by the state machine.
#[derive(Debug)]
pub struct RequestReceiver(mpsc::UnboundedReceiver<RequestMessage>);

impl RequestReceiver {
    /// Creates a new request channel and returns the receiver and sender halves.
    pub fn new() -> (Self, RequestSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(rx), RequestSender(tx))
    }

    /// Closes the request channel. Queued requests can still be received.
    pub fn close(&mut self) {
        self.0.close()
    }

    /// Receives the next request, or `None` if the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<RequestMessage> {
        self.0.recv().await
    }

    /// Tries to receive the next request without blocking.
    pub fn try_recv(&mut self) -> Result<RequestMessage, TryRecvError> {
        self.0.try_recv()
    }
}
