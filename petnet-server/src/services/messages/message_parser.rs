//! The parsing pipeline for incoming PET messages.

use std::{
    convert::TryFrom,
    sync::Arc,
    task::{Context, Poll},
};

use rayon::ThreadPool;
use tokio::sync::oneshot;
use tower::{limit::ConcurrencyLimit, Service};
use tracing::{debug, warn};

use crate::{
    services::messages::{BoxedServiceFuture, ServiceError},
    state_machine::{
        events::{EventListener, EventSubscriber},
        phases::PhaseName,
    },
};
use petnet_core::{
    crypto::{ByteObject, EncryptKeyPair, PublicEncryptKey},
    message::{FromBytes, Message, MessageBuffer, Tag},
};

/// Checks and parses one raw message.
///
/// A message passes four gates, cheapest first: buffer bound checks, the
/// phase filter, the coordinator key check, and the signature verification.
/// Only then is the payload parsed. The signature check is CPU-bound for
/// large messages, so it runs on a rayon thread-pool instead of blocking the
/// executor.
#[derive(Debug, Clone)]
pub struct RawMessageParser {
    /// A listener for the current phase.
    phase: EventListener<PhaseName>,
    /// A listener for the current coordinator keys.
    keys: EventListener<EncryptKeyPair>,
    /// The thread-pool for the signature checks.
    thread_pool: Arc<ThreadPool>,
}

/// Whether a message of the given type is expected in the given phase.
///
/// Chunks of multipart messages carry the tag of the message they belong to,
/// so they pass the same filter.
fn expected_in_phase(tag: Tag, phase: PhaseName) -> bool {
    matches!(
        (tag, phase),
        (Tag::Sum, PhaseName::Sum)
            | (Tag::Update, PhaseName::Update)
            | (Tag::Sum2, PhaseName::Sum2)
    )
}

impl<T> Service<T> for RawMessageParser
where
    T: AsRef<[u8]> + Sync + Send + 'static,
{
    type Response = Message;
    type Error = ServiceError;
    type Future = BoxedServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: T) -> Self::Future {
        let phase = self.phase.get_latest().event;
        let coordinator_pk = self.keys.get_latest().event.public;
        let thread_pool = self.thread_pool.clone();

        Box::pin(async move {
            let buffer = Arc::new(MessageBuffer::new(req).map_err(ServiceError::Parsing)?);

            let tag = Tag::try_from(buffer.tag()).map_err(ServiceError::Parsing)?;
            if !expected_in_phase(tag, phase) {
                debug!("rejecting a {:?} message in the {} phase", tag, phase);
                return Err(ServiceError::UnexpectedMessage);
            }

            // a message addressed to a previous round key is worthless
            match PublicEncryptKey::from_slice(buffer.coordinator_pk()) {
                Some(pk) if pk == coordinator_pk => {}
                _ => {
                    warn!("found an invalid coordinator public key");
                    return Err(ServiceError::InvalidCoordinatorPublicKey);
                }
            }

            let (tx, rx) = oneshot::channel();
            let signed = Arc::clone(&buffer);
            thread_pool.spawn(move || {
                let _ = tx.send(signed.check_signature());
            });
            match rx.await {
                Ok(Ok(())) => debug!("found a valid message signature"),
                Ok(Err(err)) => {
                    warn!("invalid message signature: {:?}", err);
                    return Err(ServiceError::InvalidMessageSignature);
                }
                Err(_) => {
                    return Err(ServiceError::InternalError(
                        "the signature verification task was dropped".to_string(),
                    ));
                }
            }

            Message::from_byte_slice(buffer.inner()).map_err(ServiceError::Parsing)
        })
    }
}

/// The message parser, with its concurrency bounded to the size of the
/// signature verification thread-pool.
#[derive(Debug, Clone)]
pub struct MessageParser(ConcurrencyLimit<RawMessageParser>);

impl MessageParser {
    /// Creates a new message parser over the given event subscriber and thread-pool.
    pub fn new(events: &EventSubscriber, thread_pool: Arc<ThreadPool>) -> Self {
        let limit = thread_pool.current_num_threads();
        let parser = RawMessageParser {
            phase: events.phase_listener(),
            keys: events.keys_listener(),
            thread_pool,
        };
        Self(ConcurrencyLimit::new(parser, limit))
    }
}

impl<T> Service<T> for MessageParser
where
    T: AsRef<[u8]> + Sync + Send + 'static,
{
    type Response = Message;
    type Error = ServiceError;
    type Future = <ConcurrencyLimit<RawMessageParser> as Service<T>>::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        <ConcurrencyLimit<RawMessageParser> as Service<T>>::poll_ready(&mut self.0, cx)
    }

    fn call(&mut self, req: T) -> Self::Future {
        self.0.call(req)
    }
}
