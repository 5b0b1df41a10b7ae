//! The processing pipeline for incoming PET messages.
//!
//! A raw message goes through four stages:
//!
//! 1. [`MessageParser`]: buffer checks, phase filter, signature verification,
//!    coordinator key validation and parsing.
//! 2. [`MultipartHandler`]: chunks of multipart messages are buffered until
//!    the message is complete; buffers are dropped on phase change.
//! 3. [`TaskValidatorService`]: role eligibility of the sender.
//! 4. [`StateMachineService`]: dispatch to the state machine.
//!
//! [`PetMessageService`] chains the four stages. The external transport maps
//! the error cases to its status codes: parsing and signature failures mean
//! the message is malformed (a 400-class fault of the sender), eligibility
//! failures mean the participant has to wait for another round, phase
//! mismatches and rejections mean the message is a well-formed duplicate or
//! latecomer.

mod error;
mod message_parser;
mod multipart;
mod state_machine;
mod task_validator;

pub use self::{
    error::{BoxedServiceFuture, ServiceError},
    message_parser::MessageParser,
    multipart::MultipartHandler,
    state_machine::StateMachineService,
    task_validator::{TaskValidatorError, TaskValidatorService},
};

use std::sync::Arc;

use rayon::ThreadPool;
use thiserror::Error;
use tower::{Service, ServiceExt};
use tracing::{debug, error_span};
use tracing_futures::Instrument;

use crate::state_machine::{
    events::EventSubscriber,
    requests::{RequestError, RequestSender},
};
use petnet_core::message::{Message, Payload};

/// Error returned by [`PetMessageService::handle_message`].
#[derive(Debug, Error)]
pub enum PetMessageError {
    #[error("failed to parse message: {0}")]
    Parser(ServiceError),

    #[error("failed to reassemble message: {0}")]
    Multipart(ServiceError),

    #[error("failed to validate message: {0}")]
    TaskValidator(TaskValidatorError),

    #[error("state machine failed to handle message: {0}")]
    StateMachine(RequestError),
}

/// A single interface over the whole message processing pipeline.
pub struct PetMessageService {
    message_parser: MessageParser,
    multipart_handler: MultipartHandler,
    task_validator: TaskValidatorService,
    state_machine: StateMachineService,
}

impl PetMessageService {
    /// Creates the full message pipeline over the given event subscriber,
    /// signature verification thread-pool and state machine handle.
    pub fn new(
        events: &EventSubscriber,
        thread_pool: Arc<ThreadPool>,
        request_tx: RequestSender,
    ) -> Self {
        Self {
            message_parser: MessageParser::new(events, thread_pool),
            multipart_handler: MultipartHandler::new(events),
            task_validator: TaskValidatorService::new(events),
            state_machine: StateMachineService::new(request_tx),
        }
    }

    /// Processes a raw message from the beginning to the end.
    ///
    /// Returns `Ok(())` both when the message was fully processed and when a
    /// chunk of a multipart message was buffered.
    pub async fn handle_message(&mut self, raw: Vec<u8>) -> Result<(), PetMessageError> {
        let span = error_span!("handle_message", message_length = raw.len());

        async {
            let message = ServiceExt::<Vec<u8>>::ready(&mut self.message_parser)
                .await
                .map_err(PetMessageError::Parser)?
                .call(raw)
                .await
                .map_err(PetMessageError::Parser)?;
            debug!("parsed a {} message", message_type(&message));

            let message = match self
                .multipart_handler
                .ready()
                .await
                .map_err(PetMessageError::Multipart)?
                .call(message)
                .await
                .map_err(PetMessageError::Multipart)?
            {
                Some(message) => message,
                // a chunk was buffered; the message is not complete yet
                None => return Ok(()),
            };

            let message = self
                .task_validator
                .ready()
                .await
                .map_err(PetMessageError::TaskValidator)?
                .call(message)
                .await
                .map_err(PetMessageError::TaskValidator)?;

            self.state_machine
                .ready()
                .await
                .map_err(PetMessageError::StateMachine)?
                .call(message)
                .await
                .map_err(PetMessageError::StateMachine)
        }
        .instrument(span)
        .await
    }
}

fn message_type(message: &Message) -> &'static str {
    match message.payload {
        Payload::Sum(_) => "sum",
        Payload::Update(_) => "update",
        Payload::Sum2(_) => "sum2",
        Payload::Chunk(_) => "chunk",
    }
}
