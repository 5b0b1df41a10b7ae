//! `C25519` sealed-box encryption.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [crypto module]: crate::crypto

use serde::{Deserialize, Serialize};
use sodiumoxide::crypto::{box_, sealedbox};
use thiserror::Error;

use super::ByteObject;

/// Number of additional bytes in a ciphertext compared to the corresponding plaintext.
pub const SEALBYTES: usize = sealedbox::SEALBYTES;

#[derive(Error, Debug)]
#[error("decryption of a message failed")]
/// An error related to the decryption of a message.
pub struct DecryptionError;

sodium_object! {
    /// A `C25519` public key for asymmetric authenticated encryption.
    #[derive(Serialize, Deserialize, Hash, Eq, Ord, PartialEq, Copy, Clone, PartialOrd, Debug)]
    pub struct PublicEncryptKey(box_::PublicKey), box_::PUBLICKEYBYTES,
}

impl PublicEncryptKey {
    /// Encrypts a message `m` with this public key, as an anonymous sealed box.
    ///
    /// The resulting ciphertext length is [`SEALBYTES`]` + m.len()`. A fresh ephemeral key
    /// pair is created for the message; its public half is attached to the ciphertext, its
    /// secret half is zeroed out before this function returns.
    pub fn encrypt(&self, m: &[u8]) -> Vec<u8> {
        sealedbox::seal(m, &self.0)
    }
}

sodium_object! {
    /// A `C25519` secret key for asymmetric authenticated encryption.
    ///
    /// When this goes out of scope, its contents will be zeroed out.
    #[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug)]
    pub struct SecretEncryptKey(box_::SecretKey), box_::SECRETKEYBYTES,
}

impl SecretEncryptKey {
    /// Decrypts the sealed box `c` with this secret key and the associated public key, and
    /// returns the plaintext.
    ///
    /// # Errors
    /// Returns `Err(DecryptionError)` if decryption fails.
    pub fn decrypt(&self, c: &[u8], pk: &PublicEncryptKey) -> Result<Vec<u8>, DecryptionError> {
        sealedbox::open(c, &pk.0, &self.0).map_err(|_| DecryptionError)
    }

    /// Computes the corresponding public key for this secret key.
    pub fn public_key(&self) -> PublicEncryptKey {
        PublicEncryptKey(self.0.public_key())
    }
}

sodium_object! {
    /// A seed from which a `C25519` encryption key pair can be derived.
    ///
    /// When this goes out of scope, its contents will be zeroed out.
    #[derive(Serialize, Deserialize, Eq, PartialEq, Clone)]
    pub struct EncryptKeySeed(box_::Seed), box_::SEEDBYTES,
}

impl EncryptKeySeed {
    /// Deterministically derives a new key pair from this seed.
    pub fn derive_encrypt_key_pair(&self) -> (PublicEncryptKey, SecretEncryptKey) {
        let (pk, sk) = box_::keypair_from_seed(&self.0);
        (PublicEncryptKey(pk), SecretEncryptKey(sk))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A `C25519` key pair for asymmetric authenticated encryption.
pub struct EncryptKeyPair {
    /// The `C25519` public key.
    pub public: PublicEncryptKey,
    /// The `C25519` secret key.
    pub secret: SecretEncryptKey,
}

impl EncryptKeyPair {
    /// Generates a new random `C25519` key pair for encryption.
    pub fn generate() -> Self {
        let (pk, sk) = box_::gen_keypair();
        Self {
            public: PublicEncryptKey(pk),
            secret: SecretEncryptKey(sk),
        }
    }

    /// Deterministically derives a new `C25519` key pair from a seed.
    pub fn derive_from_seed(seed: &EncryptKeySeed) -> Self {
        let (public, secret) = seed.derive_encrypt_key_pair();
        Self { public, secret }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let keys = EncryptKeyPair::generate();
        let cipher = keys.public.encrypt(b"round seed share");
        assert_eq!(cipher.len(), SEALBYTES + 16);
        assert_eq!(
            keys.secret.decrypt(&cipher, &keys.public).unwrap(),
            b"round seed share".to_vec(),
        );

        // a foreign key cannot open the box
        let other = EncryptKeyPair::generate();
        assert!(other.secret.decrypt(&cipher, &other.public).is_err());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let seed = EncryptKeySeed::fill_with(0x0f);
        assert_eq!(
            EncryptKeyPair::derive_from_seed(&seed).public,
            EncryptKeyPair::derive_from_seed(&seed).public,
        );
    }
}
