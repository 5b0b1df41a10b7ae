//! Errors of the message processing services.

use std::{future::Future, pin::Pin};

use thiserror::Error;

use petnet_core::message::DecodeError;

/// The future type of the boxed message services.
pub type BoxedServiceFuture<R, E> =
    Pin<Box<dyn Future<Output = Result<R, E>> + Send + 'static>>;

/// Errors of the message parsing pipeline.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to parse message: {0}")]
    Parsing(DecodeError),

    #[error("invalid message signature")]
    InvalidMessageSignature,

    #[error("the message was not addressed to this coordinator")]
    InvalidCoordinatorPublicKey,

    #[error("the coordinator did not expect this message in the current phase")]
    UnexpectedMessage,

    #[error("internal error: {0}")]
    InternalError(String),
}
