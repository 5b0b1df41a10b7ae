//! Chunks of multipart messages.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use std::convert::TryInto;

use anyhow::anyhow;

use crate::message::{
    traits::{FromBytes, ToBytes},
    DecodeError,
};

/// A chunk of a multipart message.
///
/// # Wire layout
///
/// ```no_rust
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                id             |           message_id          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     flags     |                    reserved                   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                       data (variable length)                  +
/// |                                                               |
/// ```
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Chunk {
    /// The chunk ID.
    pub id: u16,
    /// The ID of the message this chunk belongs to.
    pub message_id: u16,
    /// `true` if this is the last chunk of the message, `false` otherwise.
    pub last: bool,
    /// The data contained in this chunk.
    pub data: Vec<u8>,
}

bitflags::bitflags! {
    /// A bitmask that defines flags for a [`Chunk`].
    pub struct Flags: u8 {
        /// Indicates whether this is the last chunk of a multipart message.
        const LAST_CHUNK = 1 << 0;
    }
}

/// Length in bytes of a chunk header.
const HEADER_LENGTH: usize = 8;

impl ToBytes for Chunk {
    fn buffer_length(&self) -> usize {
        HEADER_LENGTH + self.data.len()
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) {
        let flags = if self.last {
            Flags::LAST_CHUNK
        } else {
            Flags::empty()
        };

        let buffer = buffer.as_mut();
        buffer[..2].copy_from_slice(&self.id.to_be_bytes());
        buffer[2..4].copy_from_slice(&self.message_id.to_be_bytes());
        buffer[4] = flags.bits();
        buffer[5..HEADER_LENGTH].copy_from_slice(&[0, 0, 0]); // reserved
        buffer[HEADER_LENGTH..HEADER_LENGTH + self.data.len()].copy_from_slice(&self.data);
    }
}

impl FromBytes for Chunk {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let bytes = buffer.as_ref();
        if bytes.len() < HEADER_LENGTH {
            return Err(anyhow!(
                "invalid chunk: {} < {} bytes",
                bytes.len(),
                HEADER_LENGTH
            ));
        }
        // safe unwraps: the slices are exactly 2 bytes long
        Ok(Self {
            id: u16::from_be_bytes(bytes[..2].try_into().unwrap()),
            message_id: u16::from_be_bytes(bytes[2..4].try_into().unwrap()),
            last: Flags::from_bits_truncate(bytes[4]).contains(Flags::LAST_CHUNK),
            data: bytes[HEADER_LENGTH..].to_vec(),
        })
    }
}
