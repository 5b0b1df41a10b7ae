//! Sum message payloads.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use anyhow::{anyhow, Context};

use crate::{
    crypto::ByteObject,
    message::{
        traits::{FromBytes, ToBytes},
        DecodeError,
    },
    ParticipantTaskSignature,
    SumParticipantEphemeralPublicKey,
};

const SIGNATURE_LENGTH: usize = ParticipantTaskSignature::LENGTH;
const SUM_LENGTH: usize = SIGNATURE_LENGTH + SumParticipantEphemeralPublicKey::LENGTH;

#[derive(Debug, Eq, PartialEq, Clone)]
/// A high level representation of a sum message.
///
/// These messages are sent by sum participants during the sum phase.
pub struct Sum {
    /// The signature that proves the sender's eligibility for the sum task.
    pub sum_signature: ParticipantTaskSignature,
    /// The ephemeral public key generated by the sum participant for the
    /// current round. Update participants seal their mask seeds to it.
    pub ephm_pk: SumParticipantEphemeralPublicKey,
}

impl ToBytes for Sum {
    fn buffer_length(&self) -> usize {
        SUM_LENGTH
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) {
        let (mut signature, mut ephm_pk) = buffer.as_mut().split_at_mut(SIGNATURE_LENGTH);
        self.sum_signature.to_bytes(&mut signature);
        self.ephm_pk.to_bytes(&mut ephm_pk);
    }
}

impl FromBytes for Sum {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let bytes = buffer.as_ref();
        if bytes.len() < SUM_LENGTH {
            return Err(anyhow!(
                "invalid sum payload: {} < {} bytes",
                bytes.len(),
                SUM_LENGTH
            ));
        }
        Ok(Self {
            sum_signature: ParticipantTaskSignature::from_byte_slice(&&bytes[..SIGNATURE_LENGTH])
                .context("invalid sum signature")?,
            ephm_pk: SumParticipantEphemeralPublicKey::from_byte_slice(
                &&bytes[SIGNATURE_LENGTH..SUM_LENGTH],
            )
            .context("invalid ephemeral public key")?,
        })
    }
}

#[cfg(test)]
pub(in crate::message) mod tests {
    use super::*;

    pub(crate) fn sum_bytes() -> Vec<u8> {
        let mut bytes = vec![0x11; SIGNATURE_LENGTH];
        bytes.extend(vec![0x22; SumParticipantEphemeralPublicKey::LENGTH]);
        bytes
    }

    pub(crate) fn sum() -> Sum {
        Sum {
            sum_signature: ParticipantTaskSignature::fill_with(0x11),
            ephm_pk: SumParticipantEphemeralPublicKey::fill_with(0x22),
        }
    }

    #[test]
    fn encode() {
        let payload = sum();
        assert_eq!(payload.buffer_length(), sum_bytes().len());

        let mut buf = vec![0xff; payload.buffer_length()];
        payload.to_bytes(&mut buf);
        assert_eq!(buf, sum_bytes());
    }

    #[test]
    fn decode() {
        assert_eq!(Sum::from_byte_slice(&sum_bytes()).unwrap(), sum());
    }

    #[test]
    fn decode_truncated() {
        assert!(Sum::from_byte_slice(&&sum_bytes()[1..]).is_err());
    }
}
