//! Update message payloads.
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
    LocalSeedDict,
    ParticipantTaskSignature,
};

const SIGNATURE_LENGTH: usize = ParticipantTaskSignature::LENGTH;
const SIGNATURES_LENGTH: usize = 2 * SIGNATURE_LENGTH;

#[derive(Debug, Eq, PartialEq, Clone)]
/// A high level representation of an update message.
///
/// These messages are sent by update participants during the update phase.
pub struct Update {
    /// The signature over the sum task data.
    ///
    /// For an update participant this proves that the sender is *not*
    /// selected for the sum task.
    pub sum_signature: ParticipantTaskSignature,
    /// The signature that proves the sender's eligibility for the update task.
    pub update_signature: ParticipantTaskSignature,
    /// The masked model trained by the update participant, together with the
    /// masked scalar it was scaled with.
    pub masked_model: MaskObject,
    /// The seed used to mask `masked_model`, sealed to the ephemeral public
    /// key of each sum participant.
    pub local_seed_dict: LocalSeedDict,
}

impl ToBytes for Update {
    fn buffer_length(&self) -> usize {
        SIGNATURES_LENGTH + self.masked_model.buffer_length() + self.local_seed_dict.buffer_length()
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) {
        let buffer = buffer.as_mut();
        let model_end = SIGNATURES_LENGTH + self.masked_model.buffer_length();

        self.sum_signature
            .to_bytes(&mut &mut buffer[..SIGNATURE_LENGTH]);
        self.update_signature
            .to_bytes(&mut &mut buffer[SIGNATURE_LENGTH..SIGNATURES_LENGTH]);
        self.masked_model
            .to_bytes(&mut &mut buffer[SIGNATURES_LENGTH..model_end]);
        self.local_seed_dict
            .to_bytes(&mut &mut buffer[model_end..]);
    }
}

impl FromBytes for Update {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let bytes = buffer.as_ref();
        if bytes.len() < SIGNATURES_LENGTH {
            return Err(anyhow!(
                "invalid update payload: {} < {} bytes",
                bytes.len(),
                SIGNATURES_LENGTH
            ));
        }

        let masked_model = MaskObject::from_byte_slice(&&bytes[SIGNATURES_LENGTH..])
            .context("invalid masked model")?;
        // the seed dict follows the masked model, whose serialized length is
        // determined by its configuration
        let dict_offset = SIGNATURES_LENGTH + masked_model.buffer_length();
        let local_seed_dict = LocalSeedDict::from_byte_slice(&&bytes[dict_offset..])
            .context("invalid local seed dictionary")?;

        Ok(Self {
            sum_signature: ParticipantTaskSignature::from_byte_slice(&&bytes[..SIGNATURE_LENGTH])
                .context("invalid sum signature")?,
            update_signature: ParticipantTaskSignature::from_byte_slice(
                &&bytes[SIGNATURE_LENGTH..SIGNATURES_LENGTH],
            )
            .context("invalid update signature")?,
            masked_model,
            local_seed_dict,
        })
    }
}

#[cfg(test)]
pub(in crate::message) mod tests {
    use super::*;
    use crate::{
        mask::{object::serialization::tests::mask_object, EncryptedMaskSeed},
        SumParticipantPublicKey,
    };

    fn local_seed_dict() -> LocalSeedDict {
        let mut dict = LocalSeedDict::new();
        dict.insert(
            SumParticipantPublicKey::fill_with(0x55),
            EncryptedMaskSeed::fill_with(0x66),
        );
        dict
    }

    pub(crate) fn update_bytes() -> Vec<u8> {
        let mut bytes = vec![0x33; SIGNATURE_LENGTH];
        bytes.extend(vec![0x44; SIGNATURE_LENGTH]);
        bytes.extend(mask_object().0);

        let dict = local_seed_dict();
        let mut dict_bytes = vec![0; dict.buffer_length()];
        dict.to_bytes(&mut dict_bytes);
        bytes.extend(dict_bytes);
        bytes
    }

    pub(crate) fn update() -> Update {
        Update {
            sum_signature: ParticipantTaskSignature::fill_with(0x33),
            update_signature: ParticipantTaskSignature::fill_with(0x44),
            masked_model: mask_object().1,
            local_seed_dict: local_seed_dict(),
        }
    }

    #[test]
    fn encode() {
        let payload = update();
        let bytes = update_bytes();
        assert_eq!(payload.buffer_length(), bytes.len());

        let mut buf = vec![0xff; payload.buffer_length()];
        payload.to_bytes(&mut buf);
        assert_eq!(buf, bytes);
    }

    #[test]
    fn decode() {
        assert_eq!(Update::from_byte_slice(&update_bytes()).unwrap(), update());
    }

    #[test]
    fn decode_truncated() {
        let bytes = update_bytes();
        assert!(Update::from_byte_slice(&&bytes[..bytes.len() - 1]).is_err());
    }
}
