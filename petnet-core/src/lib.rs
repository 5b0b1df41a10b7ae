//! # petnet-core
//!
//! Shared primitives of the PET private aggregation protocol.
//!
//! The PET protocol lets a coordinator aggregate local models from many
//! untrusted participants without ever seeing an individual contribution.
//! Each round, two disjoint sets of participants are selected: *update*
//! participants upload masked models, *sum* participants collect the mask
//! seeds and later reconstruct the combined mask, which is the only thing
//! that can decrypt the aggregate.
//!
//! This crate contains everything both sides of the protocol agree on:
//!
//! - [`crypto`]: signing, sealed boxes and the deterministic PRNG,
//! - [`mask`]: the model representation, masking configurations, and the
//!   masking, aggregation and unmasking arithmetic,
//! - [`message`]: the wire format of the sum, update and sum2 messages,
//!   including multipart chunking,
//! - [`common`]: the per-round parameters published by the coordinator.

#[macro_use]
extern crate serde;

pub mod common;
pub mod crypto;
pub mod mask;
pub mod message;

use std::collections::HashMap;

use thiserror::Error;

use self::crypto::{
    encrypt::{PublicEncryptKey, SecretEncryptKey},
    sign::{PublicSigningKey, SecretSigningKey, Signature},
};

#[derive(Error, Debug)]
#[error("initialization failed: insufficient system entropy to generate secrets")]
/// An error related to insufficient system entropy for secrets at program startup.
pub struct InitError;

/// A public encryption key that identifies a coordinator.
pub type CoordinatorPublicKey = PublicEncryptKey;

/// A secret encryption key that belongs to the public key of a coordinator.
pub type CoordinatorSecretKey = SecretEncryptKey;

/// A public signature key that identifies a participant.
pub type ParticipantPublicKey = PublicSigningKey;

/// A secret signature key that belongs to the public key of a participant.
pub type ParticipantSecretKey = SecretSigningKey;

/// A public signature key that identifies a sum participant.
pub type SumParticipantPublicKey = ParticipantPublicKey;

/// A secret signature key that belongs to the public key of a sum participant.
pub type SumParticipantSecretKey = ParticipantSecretKey;

/// A public encryption key generated by a sum participant for a single round.
/// Update participants seal their mask seeds to it.
pub type SumParticipantEphemeralPublicKey = PublicEncryptKey;

/// The secret counterpart of [`SumParticipantEphemeralPublicKey`].
pub type SumParticipantEphemeralSecretKey = SecretEncryptKey;

/// A public signature key that identifies an update participant.
pub type UpdateParticipantPublicKey = ParticipantPublicKey;

/// A secret signature key that belongs to the public key of an update participant.
pub type UpdateParticipantSecretKey = ParticipantSecretKey;

/// A signature to prove a participant's eligibility for a task.
pub type ParticipantTaskSignature = Signature;

/// The dictionary built during the sum phase. It maps the public key of every
/// sum participant to the ephemeral public key generated by that participant.
pub type SumDict = HashMap<SumParticipantPublicKey, SumParticipantEphemeralPublicKey>;

/// A local seed dictionary sent by an update participant. It contains the
/// participant's mask seed, sealed to the ephemeral key of each sum participant.
pub type LocalSeedDict = HashMap<SumParticipantPublicKey, mask::EncryptedMaskSeed>;

/// The dictionary built during the update phase from all local seed
/// dictionaries. It maps each sum participant to the sealed mask seeds of all
/// update participants.
pub type SeedDict = HashMap<SumParticipantPublicKey, UpdateSeedDict>;

/// Values of [`SeedDict`]. Sent to sum participants.
pub type UpdateSeedDict = HashMap<UpdateParticipantPublicKey, mask::EncryptedMaskSeed>;
