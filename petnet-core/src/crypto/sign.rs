//! `Ed25519` signatures and task eligibility.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [crypto module]: crate::crypto

use std::convert::TryInto;

use num::{
    bigint::{BigUint, ToBigInt},
    rational::Ratio,
};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sodiumoxide::crypto::{hash::sha256, sign};

use super::ByteObject;

sodium_object! {
    /// An `Ed25519` public key for signatures.
    #[derive(Serialize, Deserialize, Hash, Eq, Ord, PartialEq, Copy, Clone, PartialOrd, Debug)]
    pub struct PublicSigningKey(sign::PublicKey), sign::PUBLICKEYBYTES,
}

impl PublicSigningKey {
    /// Verifies the detached signature `s` against the message `m` and this public key.
    ///
    /// Returns `true` if the signature is valid and `false` otherwise.
    pub fn verify_detached(&self, s: &Signature, m: &[u8]) -> bool {
        sign::verify_detached(&s.0, m, &self.0)
    }
}

sodium_object! {
    /// An `Ed25519` secret key for signatures.
    ///
    /// When this goes out of scope, its contents will be zeroed out.
    #[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug)]
    pub struct SecretSigningKey(sign::SecretKey), sign::SECRETKEYBYTES,
}

impl SecretSigningKey {
    /// Signs a message `m` with this secret key.
    pub fn sign_detached(&self, m: &[u8]) -> Signature {
        Signature(sign::sign_detached(m, &self.0))
    }

    /// Computes the corresponding public key for this secret key.
    pub fn public_key(&self) -> PublicSigningKey {
        PublicSigningKey(self.0.public_key())
    }
}

sodium_object! {
    /// A seed from which an `Ed25519` signing key pair can be derived.
    ///
    /// When this goes out of scope, its contents will be zeroed out.
    #[derive(Serialize, Deserialize, Eq, PartialEq, Clone)]
    pub struct SigningKeySeed(sign::Seed), sign::SEEDBYTES,
}

impl SigningKeySeed {
    /// Deterministically derives a new signing key pair from this seed.
    pub fn derive_signing_key_pair(&self) -> (PublicSigningKey, SecretSigningKey) {
        let (pk, sk) = sign::keypair_from_seed(&self.0);
        (PublicSigningKey(pk), SecretSigningKey(sk))
    }
}

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
/// An `Ed25519` signature detached from its message.
pub struct Signature(pub(crate) sign::Signature);

impl ByteObject for Signature {
    const LENGTH: usize = sign::SIGNATUREBYTES;

    fn zeroed() -> Self {
        Self(sign::Signature::new([0_u8; Self::LENGTH]))
    }

    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }
}

// sodiumoxide stopped deriving serde for detached signatures, so the byte
// representation is serialized instead
impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_slice().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <&[u8]>::deserialize(deserializer)?;
        Self::from_slice(bytes)
            .ok_or_else(|| D::Error::invalid_length(bytes.len(), &"an Ed25519 signature"))
    }
}

impl Signature {
    /// Checks the eligibility of this signature against the given threshold.
    ///
    /// The `SHA256` hash of the signature, read as an integer, is mapped to
    /// `[0, 1]` and compared against the threshold:
    /// ```no_rust
    /// int(hash(signature)) / (2**hashbits - 1) <= threshold.
    /// ```
    /// The comparison is exact: both sides are rational numbers.
    pub fn is_eligible(&self, threshold: f64) -> bool {
        if threshold < 0_f64 {
            return false;
        } else if threshold > 1_f64 {
            return true;
        }
        let digest = sha256::hash(self.as_slice());
        let drawn = BigUint::from_bytes_le(digest.as_ref());
        let ceiling = (BigUint::from(1_u8) << (8 * sha256::DIGESTBYTES)) - 1_u8;
        // safe unwraps: the integers are non-negative, the threshold is finite here
        Ratio::new(drawn.to_bigint().unwrap(), ceiling.to_bigint().unwrap())
            <= Ratio::from_float(threshold).unwrap()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// An `Ed25519` key pair for signatures.
pub struct SigningKeyPair {
    /// The `Ed25519` public key.
    pub public: PublicSigningKey,
    /// The `Ed25519` secret key.
    pub secret: SecretSigningKey,
}

impl SigningKeyPair {
    /// Generates a new random `Ed25519` key pair for signing.
    pub fn generate() -> Self {
        let (pk, sk) = sign::gen_keypair();
        Self {
            public: PublicSigningKey(pk),
            secret: SecretSigningKey(sk),
        }
    }

    /// Deterministically derives a new `Ed25519` key pair from a seed.
    pub fn derive_from_seed(seed: &SigningKeySeed) -> Self {
        let (public, secret) = seed.derive_signing_key_pair();
        Self { public, secret }
    }
}
