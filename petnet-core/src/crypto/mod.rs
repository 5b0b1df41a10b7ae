//! Wrappers around the [sodiumoxide] primitives used by the PET protocol.
//!
//! The wrappers expose methods on newtypes instead of free sodiumoxide
//! functions: `C25519` sealed boxes for encryption, `Ed25519` detached
//! signatures, and a `ChaCha20` based integer PRNG. All types that are sent
//! over the wire or persisted implement [`ByteObject`].
//!
//! # Examples
//! ## Encryption of messages
//! ```
//! # use petnet_core::crypto::EncryptKeyPair;
//! let keys = EncryptKeyPair::generate();
//! let message = b"Hello world!".to_vec();
//! let cipher = keys.public.encrypt(&message);
//! assert_eq!(message, keys.secret.decrypt(&cipher, &keys.public).unwrap());
//! ```
//!
//! ## Signing of messages
//! ```
//! # use petnet_core::crypto::SigningKeyPair;
//! let keys = SigningKeyPair::generate();
//! let message = b"Hello world!".to_vec();
//! let signature = keys.secret.sign_detached(&message);
//! assert!(keys.public.verify_detached(&signature, &message));
//! ```
//!
//! [sodiumoxide]: https://docs.rs/sodiumoxide/

use sodiumoxide::randombytes::randombytes;

/// An interface for slicing into cryptographic byte objects.
pub trait ByteObject: Sized {
    /// Length in bytes of this object.
    const LENGTH: usize;

    /// Creates a new object with all the bytes initialized to `0`.
    fn zeroed() -> Self;

    /// Gets the object byte representation.
    fn as_slice(&self) -> &[u8];

    /// Creates an object from the given buffer.
    ///
    /// # Errors
    /// Returns `None` if the length of the byte-slice isn't equal to the length of the object.
    fn from_slice(bytes: &[u8]) -> Option<Self>;

    /// Creates an object from the given buffer.
    ///
    /// # Panics
    /// Panics if the length of the byte-slice isn't equal to the length of the object.
    fn from_slice_unchecked(bytes: &[u8]) -> Self {
        Self::from_slice(bytes).unwrap()
    }

    /// Generates an object with random bytes.
    fn generate() -> Self {
        // safe unwrap: length of slice is guaranteed by constants
        Self::from_slice_unchecked(randombytes(Self::LENGTH).as_slice())
    }

    /// A helper for instantiating an object filled with the given value.
    fn fill_with(value: u8) -> Self {
        Self::from_slice_unchecked(&vec![value; Self::LENGTH])
    }
}

/// Declares a newtype around a sodiumoxide type and derives its
/// [`ByteObject`] implementation from the wrapped type.
macro_rules! sodium_object {
    ($(#[$meta:meta])* pub struct $name:ident($inner:path), $len:expr $(,)?) => {
        $(#[$meta])*
        pub struct $name(pub(crate) $inner);

        impl $crate::crypto::ByteObject for $name {
            const LENGTH: usize = $len;

            fn zeroed() -> Self {
                // safe unwrap: the length matches by construction
                Self::from_slice(&[0_u8; $len]).unwrap()
            }

            fn as_slice(&self) -> &[u8] {
                self.0.as_ref()
            }

            fn from_slice(bytes: &[u8]) -> Option<Self> {
                <$inner>::from_slice(bytes).map(Self)
            }
        }
    };
}

pub(crate) mod encrypt;
pub(crate) mod prng;
pub(crate) mod sign;

pub use self::{
    encrypt::{
        DecryptionError,
        EncryptKeyPair,
        EncryptKeySeed,
        PublicEncryptKey,
        SecretEncryptKey,
        SEALBYTES,
    },
    prng::generate_integer,
    sign::{PublicSigningKey, SecretSigningKey, Signature, SigningKeyPair, SigningKeySeed},
};
