//! Mask seeds and mask generation.
//!
//! See the [mask module] documentation since this is a private module anyways.
//!
//! [mask module]: crate::mask

use std::iter;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sodiumoxide::crypto::box_;

use crate::{
    crypto::{encrypt::DecryptionError, prng::generate_integer, ByteObject, SEALBYTES},
    mask::{
        config::MaskConfigPair,
        object::{MaskObject, MaskUnit, MaskVect},
    },
    SumParticipantEphemeralPublicKey,
    SumParticipantEphemeralSecretKey,
};

#[derive(Clone, Debug, PartialEq, Eq)]
/// A seed to generate a mask.
///
/// When this goes out of scope, its contents will be zeroed out.
pub struct MaskSeed(box_::Seed);

impl ByteObject for MaskSeed {
    const LENGTH: usize = box_::SEEDBYTES;

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        box_::Seed::from_slice(bytes).map(Self)
    }

    fn zeroed() -> Self {
        Self(box_::Seed([0_u8; Self::LENGTH]))
    }

    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl MaskSeed {
    /// Gets this seed as an array.
    pub fn as_array(&self) -> [u8; Self::LENGTH] {
        (self.0).0
    }

    /// Encrypts this seed with the given public key as an [`EncryptedMaskSeed`].
    pub fn encrypt(&self, pk: &SumParticipantEphemeralPublicKey) -> EncryptedMaskSeed {
        // safe unwrap: length of slice is guaranteed by constants
        EncryptedMaskSeed::from_slice_unchecked(pk.encrypt(self.as_slice()).as_slice())
    }

    /// Derives a mask of the given length from this seed wrt the masking configurations.
    ///
    /// The derivation mirrors [`Masker::mask`]: the scalar mask is drawn
    /// first, then one group element per model weight.
    ///
    /// [`Masker::mask`]: crate::mask::Masker::mask
    pub fn derive_mask(&self, len: usize, config: MaskConfigPair) -> MaskObject {
        let mut prng = ChaCha20Rng::from_seed(self.as_array());

        let unit_order = config.unit.order();
        let unit = MaskUnit::new_unchecked(config.unit, generate_integer(&mut prng, &unit_order));

        let vect_order = config.vect.order();
        let data = iter::repeat_with(|| generate_integer(&mut prng, &vect_order))
            .take(len)
            .collect();
        let vect = MaskVect::new_unchecked(config.vect, data);

        MaskObject::new_unchecked(vect, unit)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// An encrypted mask seed.
pub struct EncryptedMaskSeed(Vec<u8>);

impl From<Vec<u8>> for EncryptedMaskSeed {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl ByteObject for EncryptedMaskSeed {
    const LENGTH: usize = SEALBYTES + MaskSeed::LENGTH;

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == Self::LENGTH {
            Some(Self(bytes.to_vec()))
        } else {
            None
        }
    }

    fn zeroed() -> Self {
        Self(vec![0_u8; Self::LENGTH])
    }

    fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl EncryptedMaskSeed {
    /// Decrypts this seed as a [`MaskSeed`].
    ///
    /// # Errors
    /// Fails if the decryption fails.
    pub fn decrypt(
        &self,
        pk: &SumParticipantEphemeralPublicKey,
        sk: &SumParticipantEphemeralSecretKey,
    ) -> Result<MaskSeed, DecryptionError> {
        MaskSeed::from_slice(
            sk.decrypt(self.as_slice(), pk)
                .map_err(|_| DecryptionError)?
                .as_slice(),
        )
        .ok_or(DecryptionError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::EncryptKeyPair,
        mask::config::{BoundType, DataType, GroupType, MaskConfig, ModelType},
    };

    #[test]
    fn test_constants() {
        assert_eq!(MaskSeed::LENGTH, 32);
        assert_eq!(EncryptedMaskSeed::LENGTH, 80);
    }

    #[test]
    fn test_derive_mask() {
        let config = MaskConfig {
            group_type: GroupType::Prime,
            data_type: DataType::F32,
            bound_type: BoundType::B0,
            model_type: ModelType::M3,
        };
        let seed = MaskSeed::generate();
        let mask = seed.derive_mask(10, config.into());

        assert_eq!(mask.vect.data.len(), 10);
        assert!(mask.is_valid());

        // deriving twice from the same seed yields the same mask
        assert_eq!(mask, seed.derive_mask(10, config.into()));
    }

    #[test]
    fn test_encryption() {
        let seed = MaskSeed::generate();
        assert_eq!(seed.as_slice().len(), 32);
        assert_ne!(seed, MaskSeed::zeroed());

        let EncryptKeyPair { public, secret } = EncryptKeyPair::generate();
        let encrypted = seed.encrypt(&public);
        assert_eq!(encrypted.as_slice().len(), 80);
        let decrypted = encrypted.decrypt(&public, &secret).unwrap();
        assert_eq!(seed, decrypted);
    }

    #[test]
    fn test_decryption_with_wrong_key() {
        let seed = MaskSeed::generate();
        let keys = EncryptKeyPair::generate();
        let other = EncryptKeyPair::generate();
        let encrypted = seed.encrypt(&keys.public);
        assert!(encrypted.decrypt(&other.public, &other.secret).is_err());
    }
}
