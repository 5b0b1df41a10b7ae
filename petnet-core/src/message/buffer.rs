//! Message buffers.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use std::{convert::TryInto, ops::Range};

use anyhow::{anyhow, Context};

use crate::{
    crypto::{ByteObject, PublicSigningKey, SecretSigningKey, Signature},
    message::{utils::range, DecodeError},
    CoordinatorPublicKey,
    ParticipantPublicKey,
};

const SIGNATURE_RANGE: Range<usize> = range(0, Signature::LENGTH);
const PARTICIPANT_PK_RANGE: Range<usize> =
    range(SIGNATURE_RANGE.end, ParticipantPublicKey::LENGTH);
const COORDINATOR_PK_RANGE: Range<usize> =
    range(PARTICIPANT_PK_RANGE.end, CoordinatorPublicKey::LENGTH);
const LENGTH_RANGE: Range<usize> = range(COORDINATOR_PK_RANGE.end, 4);
const TAG_FIELD: usize = LENGTH_RANGE.end;
const FLAGS_FIELD: usize = TAG_FIELD + 1;
// Reserved bytes keep the header 4 byte aligned.
const RESERVED: Range<usize> = range(FLAGS_FIELD + 1, 2);
pub(crate) const HEADER_LENGTH: usize = RESERVED.end;

/// A wrapper around a buffer that contains a [`Message`].
///
/// It provides getters and setters to access the different fields of the message safely, as well
/// as signing and signature verification.
///
/// # Frame layout
///
/// ```no_rust
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                      signature (64 bytes)                     +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                  participant_pk (32 bytes)                    +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                  coordinator_pk (32 bytes)                    +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            length                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      tag      |     flags     |           reserved            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                       payload (variable)                      +
/// |                                                               |
/// ```
///
/// The signature covers everything after the signature field up to `length` bytes, and is
/// produced with the participant's secret signing key.
///
/// [`Message`]: crate::message::Message
pub struct MessageBuffer<T> {
    inner: T,
}

impl<T: AsRef<[u8]>> MessageBuffer<T> {
    /// Performs bound checks for the various message fields on `bytes` and returns a new
    /// [`MessageBuffer`].
    ///
    /// # Errors
    /// Fails if the `bytes` are smaller than a minimal-sized message buffer or if the length
    /// field is inconsistent with the buffer.
    pub fn new(bytes: T) -> Result<Self, DecodeError> {
        let buffer = Self { inner: bytes };
        buffer
            .check_buffer_length()
            .context("not a valid MessageBuffer")?;
        Ok(buffer)
    }

    /// Returns a [`MessageBuffer`] without performing any bound checks.
    ///
    /// This means accessing the various fields may panic if the data is invalid.
    pub fn new_unchecked(bytes: T) -> Self {
        Self { inner: bytes }
    }

    /// Performs bound checks to ensure the fields can be accessed without panicking.
    pub fn check_buffer_length(&self) -> Result<(), DecodeError> {
        let len = self.inner.as_ref().len();
        if len < HEADER_LENGTH {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                len,
                HEADER_LENGTH
            ));
        }

        let length = self.length();
        if length < HEADER_LENGTH {
            return Err(anyhow!(
                "invalid length field: {} < {}",
                length,
                HEADER_LENGTH
            ));
        }
        if len < length {
            return Err(anyhow!("invalid buffer length: {} < {}", len, length));
        }
        Ok(())
    }

    /// Gets a reference to the underlying buffer.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Gets the length field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn length(&self) -> usize {
        // safe unwrap: the slice is exactly 4 bytes long
        u32::from_be_bytes(self.inner.as_ref()[LENGTH_RANGE].try_into().unwrap()) as usize
    }

    /// Gets the tag field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn tag(&self) -> u8 {
        self.inner.as_ref()[TAG_FIELD]
    }

    /// Gets the flags field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn flags(&self) -> u8 {
        self.inner.as_ref()[FLAGS_FIELD]
    }

    /// Verifies the message signature against the participant public key embedded in the
    /// message.
    ///
    /// # Errors
    /// Fails if the embedded key or signature is invalid or if the signature does not match the
    /// signed part of the message.
    pub fn check_signature(&self) -> Result<(), DecodeError> {
        let signature = Signature::from_slice(self.signature())
            .ok_or_else(|| anyhow!("invalid signature field"))?;
        let participant_pk = PublicSigningKey::from_slice(self.participant_pk())
            .ok_or_else(|| anyhow!("invalid participant public key field"))?;

        let signed = &self.inner.as_ref()[SIGNATURE_RANGE.end..self.length()];
        if participant_pk.verify_detached(&signature, signed) {
            Ok(())
        } else {
            Err(anyhow!("invalid message signature"))
        }
    }

    /// Gets the signature field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn signature(&self) -> &[u8] {
        &self.inner.as_ref()[SIGNATURE_RANGE]
    }

    /// Gets the participant public key field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn participant_pk(&self) -> &[u8] {
        &self.inner.as_ref()[PARTICIPANT_PK_RANGE]
    }

    /// Gets the coordinator public key field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn coordinator_pk(&self) -> &[u8] {
        &self.inner.as_ref()[COORDINATOR_PK_RANGE]
    }

    /// Gets the payload.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn payload(&self) -> &[u8] {
        &self.inner.as_ref()[HEADER_LENGTH..self.length()]
    }
}

impl<T: AsMut<[u8]> + AsRef<[u8]>> MessageBuffer<T> {
    /// Sets the length field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn set_length(&mut self, value: u32) {
        self.inner.as_mut()[LENGTH_RANGE].copy_from_slice(&value.to_be_bytes());
    }

    /// Sets the tag field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn set_tag(&mut self, value: u8) {
        self.inner.as_mut()[TAG_FIELD] = value;
    }

    /// Sets the flags field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn set_flags(&mut self, value: u8) {
        self.inner.as_mut()[FLAGS_FIELD] = value;
        self.inner.as_mut()[RESERVED].copy_from_slice(&[0, 0]);
    }

    /// Gets a mutable reference to the participant public key field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn participant_pk_mut(&mut self) -> &mut [u8] {
        &mut self.inner.as_mut()[PARTICIPANT_PK_RANGE]
    }

    /// Gets a mutable reference to the coordinator public key field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn coordinator_pk_mut(&mut self) -> &mut [u8] {
        &mut self.inner.as_mut()[COORDINATOR_PK_RANGE]
    }

    /// Gets a mutable reference to the payload.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let end = self.length();
        &mut self.inner.as_mut()[HEADER_LENGTH..end]
    }

    /// Signs the message with the given secret key and writes the signature field.
    ///
    /// The length field must be set before signing.
    ///
    /// # Panics
    /// May panic if the buffer has not been checked before.
    pub fn sign(&mut self, sk: &SecretSigningKey) {
        let length = self.length();
        let signed = &self.inner.as_ref()[SIGNATURE_RANGE.end..length];
        let signature = sk.sign_detached(signed);
        self.inner.as_mut()[SIGNATURE_RANGE].copy_from_slice(signature.as_slice());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SigningKeyPair;

    fn dummy_message_bytes() -> Vec<u8> {
        let mut bytes = vec![0x99; Signature::LENGTH];
        bytes.extend(vec![0xbb; ParticipantPublicKey::LENGTH]); // participant pk
        bytes.extend(vec![0xcc; CoordinatorPublicKey::LENGTH]); // coordinator pk
        bytes.extend(&((HEADER_LENGTH + 4) as u32).to_be_bytes()); // length
        bytes.push(0x01); // tag
        bytes.push(0x00); // flags
        bytes.extend(&[0x00, 0x00]); // reserved
        bytes.extend(&[0x11, 0x22, 0x33, 0x44]); // payload
        bytes
    }

    #[test]
    fn buffer_read() {
        let bytes = dummy_message_bytes();
        let buffer = MessageBuffer::new(&bytes).unwrap();
        assert_eq!(buffer.length(), HEADER_LENGTH + 4);
        assert_eq!(buffer.tag(), 0x01);
        assert_eq!(buffer.flags(), 0x00);
        assert_eq!(
            buffer.participant_pk(),
            vec![0xbb; ParticipantPublicKey::LENGTH].as_slice()
        );
        assert_eq!(
            buffer.coordinator_pk(),
            vec![0xcc; CoordinatorPublicKey::LENGTH].as_slice()
        );
        assert_eq!(buffer.payload(), &[0x11, 0x22, 0x33, 0x44][..]);
    }

    #[test]
    fn buffer_invalid_length_field() {
        let mut bytes = dummy_message_bytes();
        // length field larger than the buffer
        let huge = (bytes.len() + 1) as u32;
        bytes[LENGTH_RANGE].copy_from_slice(&huge.to_be_bytes());
        assert!(MessageBuffer::new(&bytes).is_err());
    }

    #[test]
    fn buffer_too_short() {
        let bytes = dummy_message_bytes();
        assert!(MessageBuffer::new(&bytes[..HEADER_LENGTH - 1]).is_err());
    }

    #[test]
    fn sign_and_verify() {
        let keys = SigningKeyPair::generate();
        let mut bytes = dummy_message_bytes();
        {
            let mut buffer = MessageBuffer::new_unchecked(&mut bytes);
            buffer
                .participant_pk_mut()
                .copy_from_slice(keys.public.as_slice());
            buffer.sign(&keys.secret);
        }

        let buffer = MessageBuffer::new(&bytes).unwrap();
        assert!(buffer.check_signature().is_ok());

        // flipping a payload byte invalidates the signature
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let buffer = MessageBuffer::new(&bytes).unwrap();
        assert!(buffer.check_signature().is_err());
    }
}
