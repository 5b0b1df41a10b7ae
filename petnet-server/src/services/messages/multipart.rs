//! Reassembly of multipart messages.

use std::{
    collections::{BTreeMap, HashMap},
    task::Poll,
};

use futures::{
    future::{self, Ready},
    task::Context,
};
use tower::Service;
use tracing::debug;

use crate::{
    services::messages::ServiceError,
    state_machine::{
        events::{EventListener, EventSubscriber},
        phases::PhaseName,
    },
};
use petnet_core::{
    crypto::{PublicEncryptKey, PublicSigningKey},
    message::{Chunk, DecodeError, FromBytes, Message, Payload, Sum, Sum2, Tag, Update},
};

/// A `MessageBuilder` stores the chunks of a multipart message. Once all
/// chunks are there, it is consumed and turned into a full [`Message`] (see
/// [`into_message`]).
///
/// [`into_message`]: MessageBuilder::into_message
#[derive(Debug)]
struct MessageBuilder {
    /// The public key of the participant sending the message.
    participant_pk: PublicSigningKey,
    /// The public key of the coordinator.
    coordinator_pk: PublicEncryptKey,
    /// The message type.
    tag: Tag,
    /// The ID of the last chunk, which is only known once the chunk with the
    /// LAST flag has been received. It equals the total number of chunks.
    last_chunk_id: Option<u16>,
    /// The chunks, ordered by ID.
    data: BTreeMap<u16, Vec<u8>>,
}

impl MessageBuilder {
    /// Creates a new [`MessageBuilder`] that contains no chunk.
    fn new(tag: Tag, participant_pk: PublicSigningKey, coordinator_pk: PublicEncryptKey) -> Self {
        MessageBuilder {
            tag,
            participant_pk,
            coordinator_pk,
            data: BTreeMap::new(),
            last_chunk_id: None,
        }
    }

    /// Returns `true` if the builder holds all the chunks of the message.
    fn has_all_chunks(&self) -> bool {
        self.last_chunk_id
            .map(|expected_number_of_chunks| self.data.len() == expected_number_of_chunks as usize)
            .unwrap_or(false)
    }

    /// Adds a chunk.
    fn add_chunk(&mut self, chunk: Chunk) {
        let Chunk { id, last, data, .. } = chunk;
        if last {
            self.last_chunk_id = Some(id);
        }
        self.data.insert(id, data);
    }

    /// Concatenates all the chunks and parses the payload. This must only be
    /// called when all the chunks are there.
    fn into_message(self) -> Result<Message, DecodeError> {
        let bytes = self
            .data
            .into_iter()
            .map(|(_, chunk)| chunk)
            .fold(vec![], |mut acc, chunk| {
                acc.extend(chunk);
                acc
            });
        let payload: Payload = match self.tag {
            Tag::Sum => Sum::from_byte_slice(&bytes).map(Into::into)?,
            Tag::Update => Update::from_byte_slice(&bytes).map(Into::into)?,
            Tag::Sum2 => Sum2::from_byte_slice(&bytes).map(Into::into)?,
        };
        Ok(Message {
            signature: None,
            participant_pk: self.participant_pk,
            coordinator_pk: self.coordinator_pk,
            tag: self.tag,
            is_multipart: false,
            payload,
        })
    }
}

/// [`MessageId`] uniquely identifies a multipart message by the message ID
/// chosen by the participant (which is only unique per participant) and the
/// participant public key.
#[derive(Debug, Hash, Eq, PartialEq, Clone)]
struct MessageId {
    message_id: u16,
    participant_pk: PublicSigningKey,
}

/// A service that reassembles multipart messages.
///
/// Reassembly buffers never outlive the phase in which their chunks arrived:
/// on a phase change all partial messages are dropped.
pub struct MultipartHandler {
    message_builders: HashMap<MessageId, MessageBuilder>,
    /// A listener to retrieve the current phase.
    phase: EventListener<PhaseName>,
    /// The phase the buffered chunks belong to.
    buffered_phase: PhaseName,
}

impl MultipartHandler {
    /// Creates a new multipart handler.
    pub fn new(events: &EventSubscriber) -> Self {
        let phase = events.phase_listener();
        let buffered_phase = phase.get_latest().event;
        Self {
            message_builders: HashMap::new(),
            phase,
            buffered_phase,
        }
    }

    /// Drops all partial messages from a previous phase.
    fn flush_outdated(&mut self) {
        let current = self.phase.get_latest().event;
        if current != self.buffered_phase {
            if !self.message_builders.is_empty() {
                debug!(
                    "dropping {} partial messages from the {} phase",
                    self.message_builders.len(),
                    self.buffered_phase,
                );
            }
            self.message_builders.clear();
            self.buffered_phase = current;
        }
    }
}

impl Service<Message> for MultipartHandler {
    type Response = Option<Message>;
    type Error = ServiceError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: Message) -> Self::Future {
        self.flush_outdated();

        // a message without the multipart flag passes through untouched
        if !message.is_multipart {
            return ready_ok(Some(message));
        }

        if let Message {
            tag,
            participant_pk,
            coordinator_pk,
            payload: Payload::Chunk(chunk),
            ..
        } = message
        {
            let id = MessageId {
                message_id: chunk.message_id,
                participant_pk,
            };
            let builder = self
                .message_builders
                .entry(id.clone())
                .or_insert_with(|| MessageBuilder::new(tag, participant_pk, coordinator_pk));
            builder.add_chunk(chunk);

            if builder.has_all_chunks() {
                // the entry exists, `builder` above refers to it
                match self.message_builders.remove(&id).unwrap().into_message() {
                    Ok(message) => ready_ok(Some(message)),
                    Err(e) => ready_err(ServiceError::Parsing(e)),
                }
            } else {
                ready_ok(None)
            }
        } else {
            // the parser guarantees that the multipart flag implies a chunk payload
            unreachable!("multipart flag is set but the payload is not a chunk");
        }
    }
}

fn ready_ok<T, E>(t: T) -> Ready<Result<T, E>> {
    future::ready(Ok(t))
}

fn ready_err<T, E>(e: E) -> Ready<Result<T, E>> {
    future::ready(Err(e))
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ready;
    use tower_test::mock::Spawn;

    use super::*;
    use crate::services::tests::utils;
    use petnet_core::{crypto::SigningKeyPair, message::ToBytes};

    fn summer_keys() -> SigningKeyPair {
        SigningKeyPair::generate()
    }

    fn coordinator_pk() -> PublicEncryptKey {
        utils::coordinator_keys().public
    }

    /// Splits a serialized sum payload into three chunks.
    fn chunks(message_id: u16) -> (Sum, Vec<Chunk>) {
        let sum = utils::sum_payload();
        let mut bytes = vec![0; sum.buffer_length()];
        sum.to_bytes(&mut bytes);

        let rest = bytes.split_off(40);
        let middle = rest.clone().into_iter().take(30).collect();
        let last = rest.into_iter().skip(30).collect();

        let chunks = vec![
            Chunk {
                id: 1,
                message_id,
                last: false,
                data: bytes,
            },
            Chunk {
                id: 2,
                message_id,
                last: false,
                data: middle,
            },
            Chunk {
                id: 3,
                message_id,
                last: true,
                data: last,
            },
        ];
        (sum, chunks)
    }

    fn chunk_message(keys: &SigningKeyPair, chunk: Chunk) -> Message {
        Message::new_multipart(keys.public, coordinator_pk(), chunk, Tag::Sum)
    }

    #[tokio::test]
    async fn test_reassembly_out_of_order() {
        let (mut publisher, subscriber) = utils::new_event_channels();
        publisher.broadcast_phase(PhaseName::Sum);
        let mut task = Spawn::new(MultipartHandler::new(&subscriber));
        assert_ready!(task.poll_ready()).unwrap();

        let keys = summer_keys();
        let (sum, chunks) = chunks(1234);
        let (first, second, third) = (chunks[0].clone(), chunks[1].clone(), chunks[2].clone());

        // deliver out of order; the message completes exactly once
        assert!(task.call(chunk_message(&keys, third)).await.unwrap().is_none());
        assert!(task.call(chunk_message(&keys, first)).await.unwrap().is_none());
        let message = task
            .call(chunk_message(&keys, second))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(message, Message::new_sum(keys.public, coordinator_pk(), sum));
        assert!(task.get_ref().message_builders.is_empty());
    }

    #[tokio::test]
    async fn test_missing_chunk_is_never_admitted() {
        let (mut publisher, subscriber) = utils::new_event_channels();
        publisher.broadcast_phase(PhaseName::Sum);
        let mut task = Spawn::new(MultipartHandler::new(&subscriber));
        assert_ready!(task.poll_ready()).unwrap();

        let keys = summer_keys();
        let (_, chunks) = chunks(1);

        // the middle chunk never arrives
        assert!(task
            .call(chunk_message(&keys, chunks[0].clone()))
            .await
            .unwrap()
            .is_none());
        assert!(task
            .call(chunk_message(&keys, chunks[2].clone()))
            .await
            .unwrap()
            .is_none());
        assert_eq!(task.get_ref().message_builders.len(), 1);
    }

    #[tokio::test]
    async fn test_same_message_id_from_different_participants() {
        let (mut publisher, subscriber) = utils::new_event_channels();
        publisher.broadcast_phase(PhaseName::Sum);
        let mut task = Spawn::new(MultipartHandler::new(&subscriber));
        assert_ready!(task.poll_ready()).unwrap();

        let keys_1 = summer_keys();
        let keys_2 = summer_keys();
        let (_, chunks) = chunks(42);

        assert!(task
            .call(chunk_message(&keys_1, chunks[0].clone()))
            .await
            .unwrap()
            .is_none());
        assert!(task
            .call(chunk_message(&keys_2, chunks[0].clone()))
            .await
            .unwrap()
            .is_none());

        // the buffers are keyed by participant, not only by message id
        assert_eq!(task.get_ref().message_builders.len(), 2);
    }

    #[tokio::test]
    async fn test_buffers_are_dropped_on_phase_change() {
        let (mut publisher, subscriber) = utils::new_event_channels();
        publisher.broadcast_phase(PhaseName::Sum);
        let mut task = Spawn::new(MultipartHandler::new(&subscriber));
        assert_ready!(task.poll_ready()).unwrap();

        let keys = summer_keys();
        let (_, chunks) = chunks(7);
        assert!(task
            .call(chunk_message(&keys, chunks[0].clone()))
            .await
            .unwrap()
            .is_none());
        assert_eq!(task.get_ref().message_builders.len(), 1);

        // the phase moves on; the remaining chunks are dropped and the late
        // ones start a fresh (incomplete) buffer
        publisher.broadcast_phase(PhaseName::Update);
        assert!(task
            .call(chunk_message(&keys, chunks[1].clone()))
            .await
            .unwrap()
            .is_none());
        assert_eq!(task.get_ref().message_builders.len(), 1);
        let builder = task.get_ref().message_builders.values().next().unwrap();
        assert_eq!(builder.data.len(), 1);
    }
}
