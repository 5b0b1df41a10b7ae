//! Sum2 message payloads.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use anyhow::{anyhow, Context};

use crate::{
    crypto::ByteObject,
    mask::MaskObject,
    message::{
        traits::{FromBytes, ToBytes},
        DecodeError,
    },
    ParticipantTaskSignature,
};

const SIGNATURE_LENGTH: usize = ParticipantTaskSignature::LENGTH;

#[derive(Debug, Eq, PartialEq, Clone)]
/// A high level representation of a sum2 message.
///
/// These messages are sent by sum participants during the sum2 phase.
pub struct Sum2 {
    /// The signature that proves the sender's eligibility for the sum task.
    pub sum_signature: ParticipantTaskSignature,
    /// The mask reconstructed from the seed shares of all update
    /// participants, with which the coordinator unmasks the aggregate.
    pub model_mask: MaskObject,
}

impl ToBytes for Sum2 {
    fn buffer_length(&self) -> usize {
        SIGNATURE_LENGTH + self.model_mask.buffer_length()
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) {
        let (mut signature, mut mask) = buffer.as_mut().split_at_mut(SIGNATURE_LENGTH);
        self.sum_signature.to_bytes(&mut signature);
        self.model_mask.to_bytes(&mut mask);
    }
}

impl FromBytes for Sum2 {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let bytes = buffer.as_ref();
        if bytes.len() < SIGNATURE_LENGTH {
            return Err(anyhow!(
                "invalid sum2 payload: {} < {} bytes",
                bytes.len(),
                SIGNATURE_LENGTH
            ));
        }
        let (signature, mask) = bytes.split_at(SIGNATURE_LENGTH);
        Ok(Self {
            sum_signature: ParticipantTaskSignature::from_byte_slice(&signature)
                .context("invalid sum signature")?,
            model_mask: MaskObject::from_byte_slice(&mask).context("invalid model mask")?,
        })
    }
}

#[cfg(test)]
pub(in crate::message) mod tests {
    use super::*;
    use crate::mask::object::serialization::tests::mask_object;

    pub(crate) fn sum2_bytes() -> Vec<u8> {
        let mut bytes = vec![0x77; SIGNATURE_LENGTH];
        bytes.extend(mask_object().0);
        bytes
    }

    pub(crate) fn sum2() -> Sum2 {
        Sum2 {
            sum_signature: ParticipantTaskSignature::fill_with(0x77),
            model_mask: mask_object().1,
        }
    }

    #[test]
    fn encode() {
        let payload = sum2();
        let bytes = sum2_bytes();
        assert_eq!(payload.buffer_length(), bytes.len());

        let mut buf = vec![0xff; payload.buffer_length()];
        payload.to_bytes(&mut buf);
        assert_eq!(buf, bytes);
    }

    #[test]
    fn decode() {
        assert_eq!(Sum2::from_byte_slice(&sum2_bytes()).unwrap(), sum2());
    }
}
