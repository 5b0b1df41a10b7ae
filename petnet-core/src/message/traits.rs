//! Message traits.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use std::convert::TryInto;

use anyhow::{anyhow, Context};

use crate::{
    crypto::ByteObject,
    mask::EncryptedMaskSeed,
    message::DecodeError,
    LocalSeedDict,
    SumParticipantPublicKey,
};

/// An interface for serializable message types.
///
/// See also [`FromBytes`] for deserialization.
pub trait ToBytes {
    /// The length of the buffer for encoding the type.
    fn buffer_length(&self) -> usize;

    /// Serializes the type into the given buffer.
    ///
    /// # Panics
    /// This method may panic if the given buffer is too small. Thus, [`buffer_length()`] must be
    /// called prior to calling this, and a large enough buffer must be provided.
    ///
    /// [`buffer_length()`]: ToBytes::buffer_length
    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T);
}

/// An interface for deserializable message types.
///
/// See also [`ToBytes`] for serialization.
pub trait FromBytes: Sized {
    /// Deserializes the type from the given buffer.
    ///
    /// # Errors
    /// May fail if certain parts of the deserialized buffer don't pass message validity checks.
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError>;
}

impl<T> ToBytes for T
where
    T: ByteObject,
{
    fn buffer_length(&self) -> usize {
        Self::LENGTH
    }

    fn to_bytes<U: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut U) {
        buffer.as_mut()[..Self::LENGTH].copy_from_slice(self.as_slice())
    }
}

impl<T> FromBytes for T
where
    T: ByteObject,
{
    fn from_byte_slice<U: AsRef<[u8]>>(buffer: &U) -> Result<Self, DecodeError> {
        Self::from_slice(buffer.as_ref())
            .ok_or_else(|| anyhow!("failed to deserialize byte object"))
    }
}

/// The number of bytes of the length field of a length-delimited item.
pub(crate) const LENGTH_FIELD: usize = 4;

/// Reads the value of a length-delimited field: a big-endian `u32` total
/// length, which includes the four bytes of the length field itself, followed
/// by the value. Trailing bytes beyond the total length are ignored.
pub(crate) fn length_delimited(bytes: &[u8]) -> Result<&[u8], DecodeError> {
    let length = bytes
        .get(..LENGTH_FIELD)
        // safe unwrap: the slice is exactly 4 bytes long
        .map(|field| u32::from_be_bytes(field.try_into().unwrap()) as usize)
        .ok_or_else(|| anyhow!("length field missing"))?;
    if length < LENGTH_FIELD {
        return Err(anyhow!("invalid length field: {}", length));
    }
    bytes.get(LENGTH_FIELD..length).ok_or_else(|| {
        anyhow!(
            "length-delimited value truncated: {} > {} bytes",
            length,
            bytes.len()
        )
    })
}

const ENTRY_LENGTH: usize = SumParticipantPublicKey::LENGTH + EncryptedMaskSeed::LENGTH;

impl ToBytes for LocalSeedDict {
    fn buffer_length(&self) -> usize {
        LENGTH_FIELD + self.len() * ENTRY_LENGTH
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) {
        let buffer = buffer.as_mut();
        buffer[..LENGTH_FIELD].copy_from_slice(&(self.buffer_length() as u32).to_be_bytes());

        let mut rest = &mut buffer[LENGTH_FIELD..];
        for (pk, seed) in self {
            let (entry, tail) = rest.split_at_mut(ENTRY_LENGTH);
            entry[..SumParticipantPublicKey::LENGTH].copy_from_slice(pk.as_slice());
            entry[SumParticipantPublicKey::LENGTH..].copy_from_slice(seed.as_slice());
            rest = tail;
        }
    }
}

impl FromBytes for LocalSeedDict {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let value = length_delimited(buffer.as_ref()).context("invalid local seed dictionary")?;
        if value.len() % ENTRY_LENGTH != 0 {
            return Err(anyhow!("invalid local seed dictionary: trailing bytes"));
        }

        let mut dict = LocalSeedDict::with_capacity(value.len() / ENTRY_LENGTH);
        for entry in value.chunks_exact(ENTRY_LENGTH) {
            let (pk, seed) = entry.split_at(SumParticipantPublicKey::LENGTH);
            // safe unwraps: the split fixes both lengths
            let previous = dict.insert(
                SumParticipantPublicKey::from_slice(pk).unwrap(),
                EncryptedMaskSeed::from_slice(seed).unwrap(),
            );
            if previous.is_some() {
                return Err(anyhow!("invalid local seed dictionary: duplicated key"));
            }
        }
        Ok(dict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_delimited() {
        let bytes = vec![
            0x00, 0x00, 0x00, 0x06, // total length = 6
            0x11, 0x22, // value
            0xff, // trailing bytes are ignored
        ];
        assert_eq!(length_delimited(&bytes).unwrap(), &[0x11, 0x22][..]);

        // an empty value is fine
        assert_eq!(length_delimited(&[0x00, 0x00, 0x00, 0x04]).unwrap(), &[][..]);

        // missing length field
        assert!(length_delimited(&[0x00, 0x00, 0x00]).is_err());
        // length field smaller than itself
        assert!(length_delimited(&[0x00, 0x00, 0x00, 0x03]).is_err());
        // value shorter than announced
        assert!(length_delimited(&[0x00, 0x00, 0x00, 0x08, 0x11, 0x22]).is_err());
    }

    #[test]
    fn test_local_seed_dict_roundtrip() {
        let mut dict = LocalSeedDict::new();
        dict.insert(
            SumParticipantPublicKey::fill_with(0x11),
            EncryptedMaskSeed::fill_with(0xaa),
        );
        dict.insert(
            SumParticipantPublicKey::fill_with(0x22),
            EncryptedMaskSeed::fill_with(0xbb),
        );

        let mut bytes = vec![0; dict.buffer_length()];
        dict.to_bytes(&mut bytes);
        assert_eq!(bytes.len(), LENGTH_FIELD + 2 * ENTRY_LENGTH);

        assert_eq!(LocalSeedDict::from_byte_slice(&bytes).unwrap(), dict);
    }

    #[test]
    fn test_local_seed_dict_partial_entry() {
        let mut dict = LocalSeedDict::new();
        dict.insert(
            SumParticipantPublicKey::fill_with(0x11),
            EncryptedMaskSeed::fill_with(0xaa),
        );
        let mut bytes = vec![0; dict.buffer_length() + 1];
        dict.to_bytes(&mut bytes);
        // announce one extra byte so the entries no longer divide evenly
        let length = (dict.buffer_length() + 1) as u32;
        bytes[..4].copy_from_slice(&length.to_be_bytes());

        assert!(LocalSeedDict::from_byte_slice(&bytes).is_err());
    }
}
