//! The idle phase: opening a new round.

use async_trait::async_trait;
use sodiumoxide::crypto::hash::sha256;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    state_machine::{
        events::DictionaryUpdate,
        phases::{Phase, PhaseError, PhaseName, PhaseState, Shared, Sum},
        StateMachine,
    },
    storage::{CoordinatorStorage, StorageError},
};
use petnet_core::{
    common::RoundSeed,
    crypto::{ByteObject, EncryptKeyPair, SigningKeySeed},
};

/// Errors which can occur during the idle phase.
#[derive(Debug, Error)]
pub enum IdleError {
    #[error("setting the coordinator state failed: {0}")]
    SetCoordinatorState(StorageError),
    #[error("deleting the round dictionaries failed: {0}")]
    DeleteDictionaries(StorageError),
}

/// The idle phase.
#[derive(Debug)]
pub struct Idle;

#[async_trait]
impl<T> Phase<T> for PhaseState<Idle, T>
where
    T: crate::storage::Storage,
{
    const NAME: PhaseName = PhaseName::Idle;

    async fn process(&mut self) -> Result<(), PhaseError> {
        info!("updating the round keys");
        self.gen_round_keypair();

        info!("updating the round seed");
        self.update_round_seed();

        self.shared
            .store
            .set_coordinator_state(&self.shared.state)
            .await
            .map_err(IdleError::SetCoordinatorState)?;

        info!("broadcasting invalidation of the round dictionaries");
        self.shared
            .events
            .broadcast_sum_dict(DictionaryUpdate::Invalidate);
        self.shared
            .events
            .broadcast_seed_dict(DictionaryUpdate::Invalidate);

        self.shared
            .store
            .delete_dicts()
            .await
            .map_err(IdleError::DeleteDictionaries)?;

        Ok(())
    }

    fn broadcast(&mut self) {
        info!("broadcasting new round keys");
        self.shared
            .events
            .broadcast_keys(self.shared.state.keys.clone());

        info!("broadcasting new round parameters");
        self.shared
            .events
            .broadcast_params(self.shared.state.round_params.clone());
    }

    async fn next(self) -> Option<StateMachine<T>> {
        Some(PhaseState::<Sum, _>::new(self.shared).into())
    }
}

impl<T> PhaseState<Idle, T> {
    /// Creates a new idle phase.
    pub fn new(mut shared: Shared<T>) -> Self {
        // Events emitted during this phase must already carry the new round
        // id, so it is incremented here when the phase state is created.
        shared.set_round_id(shared.round_id() + 1);
        debug!("new round ID = {}", shared.round_id());
        Self {
            private: Idle,
            shared,
        }
    }

    /// Generates fresh round credentials.
    fn gen_round_keypair(&mut self) {
        self.shared.state.keys = EncryptKeyPair::generate();
        self.shared.state.round_params.pk = self.shared.state.keys.public;
    }

    /// Updates the seed round parameter by chaining it to the previous seed.
    fn update_round_seed(&mut self) {
        // safe unwrap: the signing seed and the secret encrypt key have the same length
        let (_, sk) =
            SigningKeySeed::from_slice_unchecked(self.shared.state.keys.secret.as_slice())
                .derive_signing_key_pair();
        let signature = sk.sign_detached(
            &[
                self.shared.state.round_params.seed.as_slice(),
                &self.shared.state.round_params.sum.to_le_bytes(),
                &self.shared.state.round_params.update.to_le_bytes(),
            ]
            .concat(),
        );
        // safe unwrap: the hash digest and the round seed have the same length
        self.shared.state.round_params.seed =
            RoundSeed::from_slice_unchecked(sha256::hash(signature.as_slice()).as_ref());
    }
}
