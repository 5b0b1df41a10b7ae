//! Messages.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use std::convert::TryFrom;

use anyhow::{anyhow, Context};

use crate::{
    crypto::{ByteObject, SecretSigningKey, Signature},
    message::{
        buffer::{MessageBuffer, HEADER_LENGTH},
        payload::{chunk::Chunk, sum::Sum, sum2::Sum2, update::Update, Payload},
        traits::{FromBytes, ToBytes},
        DecodeError,
    },
    CoordinatorPublicKey,
    ParticipantPublicKey,
};

/// The type of a message.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tag {
    /// A sum message.
    Sum,
    /// An update message.
    Update,
    /// A sum2 message.
    Sum2,
}

impl TryFrom<u8> for Tag {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Tag::Sum,
            2 => Tag::Update,
            3 => Tag::Sum2,
            _ => return Err(anyhow!("invalid tag {}", value)),
        })
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> Self {
        match tag {
            Tag::Sum => 1,
            Tag::Update => 2,
            Tag::Sum2 => 3,
        }
    }
}

bitflags::bitflags! {
    /// A bitmask that defines flags for a [`Message`].
    pub struct Flags: u8 {
        /// Indicates whether the message is a multipart message.
        const MULTIPART = 1 << 0;
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
/// A header-and-payload representation of a PET message.
///
/// A message is signed by the sending participant. When constructing a
/// message the signature is left empty; it is computed when the message is
/// serialized with [`to_bytes`].
///
/// [`to_bytes`]: Message::to_bytes
pub struct Message {
    /// The signature of the message, covering everything after the signature
    /// field. `None` until the message has been serialized or if it was
    /// parsed from an unsigned buffer.
    pub signature: Option<Signature>,
    /// The public signing key of the sending participant.
    pub participant_pk: ParticipantPublicKey,
    /// The public key of the coordinator the message is addressed to.
    pub coordinator_pk: CoordinatorPublicKey,
    /// Whether this message is a chunk of a multipart message.
    pub is_multipart: bool,
    /// The type of the message.
    pub tag: Tag,
    /// The message payload.
    pub payload: Payload,
}

impl Message {
    /// Creates a new message containing a [`Sum`] payload.
    pub fn new_sum(
        participant_pk: ParticipantPublicKey,
        coordinator_pk: CoordinatorPublicKey,
        payload: Sum,
    ) -> Self {
        Self {
            signature: None,
            participant_pk,
            coordinator_pk,
            is_multipart: false,
            tag: Tag::Sum,
            payload: Payload::Sum(payload),
        }
    }

    /// Creates a new message containing an [`Update`] payload.
    pub fn new_update(
        participant_pk: ParticipantPublicKey,
        coordinator_pk: CoordinatorPublicKey,
        payload: Update,
    ) -> Self {
        Self {
            signature: None,
            participant_pk,
            coordinator_pk,
            is_multipart: false,
            tag: Tag::Update,
            payload: Payload::Update(payload),
        }
    }

    /// Creates a new message containing a [`Sum2`] payload.
    pub fn new_sum2(
        participant_pk: ParticipantPublicKey,
        coordinator_pk: CoordinatorPublicKey,
        payload: Sum2,
    ) -> Self {
        Self {
            signature: None,
            participant_pk,
            coordinator_pk,
            is_multipart: false,
            tag: Tag::Sum2,
            payload: Payload::Sum2(payload),
        }
    }

    /// Creates a new multipart message containing a [`Chunk`] of a message of
    /// the given `tag`.
    pub fn new_multipart(
        participant_pk: ParticipantPublicKey,
        coordinator_pk: CoordinatorPublicKey,
        payload: Chunk,
        tag: Tag,
    ) -> Self {
        Self {
            signature: None,
            participant_pk,
            coordinator_pk,
            is_multipart: true,
            tag,
            payload: Payload::Chunk(payload),
        }
    }

    /// The length of the buffer needed to serialize this message.
    pub fn buffer_length(&self) -> usize {
        HEADER_LENGTH + self.payload.buffer_length()
    }

    /// Serializes this message into `buffer` and signs it with `sk`.
    ///
    /// # Panics
    /// Panics if the buffer is smaller than [`buffer_length`] bytes.
    ///
    /// [`buffer_length`]: Message::buffer_length
    pub fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T, sk: &SecretSigningKey) {
        let mut writer = MessageBuffer::new_unchecked(buffer.as_mut());
        writer.set_length(self.buffer_length() as u32);
        writer.set_tag(self.tag.into());
        let flags = if self.is_multipart {
            Flags::MULTIPART
        } else {
            Flags::empty()
        };
        writer.set_flags(flags.bits());
        writer
            .participant_pk_mut()
            .copy_from_slice(self.participant_pk.as_slice());
        writer
            .coordinator_pk_mut()
            .copy_from_slice(self.coordinator_pk.as_slice());
        self.payload.to_bytes(&mut writer.payload_mut());
        writer.sign(sk);
    }
}

impl FromBytes for Message {
    /// Parses a message from the given buffer.
    ///
    /// The signature is read but *not* verified; verification is the
    /// caller's job, via [`MessageBuffer::check_signature`].
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let reader = MessageBuffer::new(buffer.as_ref())?;

        let signature = Signature::from_byte_slice(&reader.signature()).ok();
        let participant_pk = ParticipantPublicKey::from_byte_slice(&reader.participant_pk())
            .context("invalid participant public key")?;
        let coordinator_pk = CoordinatorPublicKey::from_byte_slice(&reader.coordinator_pk())
            .context("invalid coordinator public key")?;
        let tag = Tag::try_from(reader.tag())?;
        let is_multipart = Flags::from_bits_truncate(reader.flags()).contains(Flags::MULTIPART);

        let payload_slice = reader.payload();
        let payload = if is_multipart {
            Payload::Chunk(Chunk::from_byte_slice(&payload_slice).context("invalid chunk")?)
        } else {
            match tag {
                Tag::Sum => Payload::Sum(
                    Sum::from_byte_slice(&payload_slice).context("invalid sum payload")?,
                ),
                Tag::Update => Payload::Update(
                    Update::from_byte_slice(&payload_slice).context("invalid update payload")?,
                ),
                Tag::Sum2 => Payload::Sum2(
                    Sum2::from_byte_slice(&payload_slice).context("invalid sum2 payload")?,
                ),
            }
        };

        Ok(Self {
            signature,
            participant_pk,
            coordinator_pk,
            is_multipart,
            tag,
            payload,
        })
    }
}
