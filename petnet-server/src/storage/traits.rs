//! The storage API.

use async_trait::async_trait;
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::state_machine::{
    coordinator::CoordinatorState,
    phases::PhaseName,
};
use petnet_core::{
    common::RoundSeed,
    crypto::ByteObject,
    mask::{Aggregation, MaskObject, Model},
    LocalSeedDict,
    SeedDict,
    SumDict,
    SumParticipantEphemeralPublicKey,
    SumParticipantPublicKey,
    UpdateParticipantPublicKey,
};

/// The error type for storage operations that are not related to the application domain, for
/// example IO errors of the substrate.
pub type StorageError = anyhow::Error;

/// The result of a storage operation.
pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
/// An abstract coordinator storage.
///
/// Every operation is atomic: it is either fully applied or not applied at
/// all, and concurrent callers observe operations in a single total order.
pub trait CoordinatorStorage
where
    Self: Clone + Send + Sync + 'static,
{
    /// Sets a [`CoordinatorState`], overriding any existing state, and records its phase.
    async fn set_coordinator_state(&mut self, state: &CoordinatorState) -> StorageResult<()>;

    /// Returns the [`CoordinatorState`], or `None` if no state has been set yet.
    async fn coordinator_state(&mut self) -> StorageResult<Option<CoordinatorState>>;

    /// Records the phase transition carried by `state` if and only if the currently
    /// recorded phase equals `expected`.
    ///
    /// # Behavior
    ///
    /// - If the recorded phase equals `expected` (or no phase has been recorded yet), write
    ///   `state` and return `StorageResult::Ok(PhaseAdvance)` containing `Result::Ok(())`.
    /// - If another phase is recorded, leave the store untouched and return
    ///   `StorageResult::Ok(PhaseAdvance)` containing
    ///   `Result::Err(PhaseAdvanceError::PhaseMismatch)`.
    async fn advance_phase(
        &mut self,
        expected: PhaseName,
        state: &CoordinatorState,
    ) -> StorageResult<PhaseAdvance>;

    /// Adds a sum participant entry to the [`SumDict`].
    ///
    /// # Behavior
    ///
    /// - If the participant was added, return `StorageResult::Ok(SumPartAdd)` containing
    ///   `Result::Ok(())`.
    /// - If the participant already exists, return `StorageResult::Ok(SumPartAdd)` containing
    ///   `Result::Err(SumPartAddError::AlreadyExists)`.
    async fn add_sum_participant(
        &mut self,
        pk: &SumParticipantPublicKey,
        ephm_pk: &SumParticipantEphemeralPublicKey,
    ) -> StorageResult<SumPartAdd>;

    /// Returns the [`SumDict`], or `None` if it is empty.
    async fn sum_dict(&mut self) -> StorageResult<Option<SumDict>>;

    /// Adds a [`LocalSeedDict`] of the given [`UpdateParticipantPublicKey`] to the [`SeedDict`].
    ///
    /// # Behavior
    ///
    /// All checks and insertions happen in one atomic operation:
    ///
    /// - If the local dict does not have exactly one entry per sum participant, return
    ///   `Result::Err(LocalSeedDictAddError::LengthMisMatch)`.
    /// - If the local dict contains a key which is not a sum participant, return
    ///   `Result::Err(LocalSeedDictAddError::UnknownSumParticipant)`.
    /// - If the update participant has already submitted, return
    ///   `Result::Err(LocalSeedDictAddError::UpdatePkAlreadySubmitted)`.
    /// - Otherwise insert each seed and return `Result::Ok(())`.
    async fn add_local_seed_dict(
        &mut self,
        update_pk: &UpdateParticipantPublicKey,
        local_seed_dict: &LocalSeedDict,
    ) -> StorageResult<LocalSeedDictAdd>;

    /// Returns the [`SeedDict`], or `None` if no sum participants exist.
    async fn seed_dict(&mut self) -> StorageResult<Option<SeedDict>>;

    /// Persists the running aggregate of masked models.
    ///
    /// The update phase handler is the single writer of this value; persisting it after every
    /// accepted update message keeps the aggregate recoverable after a crash.
    async fn set_masked_aggregate(&mut self, aggregation: &Aggregation) -> StorageResult<()>;

    /// Returns the persisted aggregate of masked models, or `None` if no update message has
    /// been accepted in the current round.
    async fn masked_aggregate(&mut self) -> StorageResult<Option<Aggregation>>;

    /// Increments the score of the given mask by one.
    ///
    /// # Behavior
    ///
    /// All checks and the increment happen in one atomic operation:
    ///
    /// - If `pk` is not a sum participant, return `Result::Err(MaskScoreIncrError::UnknownSumPk)`.
    /// - If `pk` has already submitted a mask, return
    ///   `Result::Err(MaskScoreIncrError::MaskAlreadySubmitted)`.
    /// - Otherwise increment the mask score and return `Result::Ok(())`.
    async fn incr_mask_score(
        &mut self,
        pk: &SumParticipantPublicKey,
        mask: &MaskObject,
    ) -> StorageResult<MaskScoreIncr>;

    /// Returns the scored masks from which the winning mask is selected, or `None` if no mask
    /// has been submitted.
    ///
    /// # Contract
    ///
    /// Implementations must include *every* mask that is tied for the highest score; they may
    /// include lower-scored masks as well, and no ordering is required. The caller re-derives
    /// the winner from the scores, so a backend that returns the masks unsorted cannot break
    /// the plurality/tie-break guarantee.
    async fn best_masks(&mut self) -> StorageResult<Option<Vec<(MaskObject, u64)>>>;

    /// Returns the number of unique masks.
    async fn number_of_unique_masks(&mut self) -> StorageResult<u64>;

    /// Returns the number of sum participants that have submitted a mask.
    async fn mask_submitted_count(&mut self) -> StorageResult<u64>;

    /// Deletes all coordinator data. This includes the coordinator state as well as the round
    /// dictionaries and the masked aggregate. Committed global models are retained.
    async fn delete_coordinator_data(&mut self) -> StorageResult<()>;

    /// Deletes the round dictionaries and the masked aggregate, but not the coordinator state.
    async fn delete_dicts(&mut self) -> StorageResult<()>;

    /// Sets the latest global model id, overriding any existing id.
    async fn set_latest_global_model_id(&mut self, id: &str) -> StorageResult<()>;

    /// Returns the latest global model id, or `None` if no round has been completed yet.
    async fn latest_global_model_id(&mut self) -> StorageResult<Option<String>>;

    /// Checks if the [`CoordinatorStorage`] is ready to process requests.
    async fn is_ready(&mut self) -> StorageResult<()>;
}

#[async_trait]
/// An abstract model storage.
pub trait ModelStorage
where
    Self: Clone + Send + Sync + 'static,
{
    /// Sets a global model.
    ///
    /// # Behavior
    ///
    /// - If a global model with the same id already exists, return
    ///   `StorageResult::Err(StorageError)`.
    /// - Otherwise store the model and return its id.
    async fn set_global_model(
        &mut self,
        round_id: u64,
        round_seed: &RoundSeed,
        global_model: &Model,
    ) -> StorageResult<String>;

    /// Returns the global model with the given id, or `None` if it does not exist.
    async fn global_model(&mut self, id: &str) -> StorageResult<Option<Model>>;

    /// Creates a unique global model id from the round id and the round seed in which the
    /// model was created.
    ///
    /// The format is `roundid_roundseed`, where the [`RoundSeed`] is encoded in hexadecimal.
    fn create_global_model_id(round_id: u64, round_seed: &RoundSeed) -> String {
        format!("{}_{}", round_id, hex::encode(round_seed.as_slice()))
    }

    /// Checks if the [`ModelStorage`] is ready to process requests.
    async fn is_ready(&mut self) -> StorageResult<()>;
}

#[async_trait]
/// The combined storage of the coordinator.
pub trait Storage: CoordinatorStorage + ModelStorage {
    /// Checks if the [`CoordinatorStorage`] and [`ModelStorage`] are ready to process
    /// requests.
    async fn is_ready(&mut self) -> StorageResult<()>;
}

/// A wrapper that contains the result of the "add sum participant" operation.
#[derive(Debug)]
pub struct SumPartAdd(pub(crate) Result<(), SumPartAddError>);

impl SumPartAdd {
    /// Unwraps this wrapper, returning the underlying result.
    pub fn into_inner(self) -> Result<(), SumPartAddError> {
        self.0
    }
}

/// Error that can occur when adding a sum participant to the [`SumDict`].
#[derive(Error, Debug, TryFromPrimitive)]
#[repr(i64)]
pub enum SumPartAddError {
    #[error("the sum participant already exists")]
    AlreadyExists = 0,
}

/// A wrapper that contains the result of the "add local seed dict" operation.
#[derive(Debug)]
pub struct LocalSeedDictAdd(pub(crate) Result<(), LocalSeedDictAddError>);

impl LocalSeedDictAdd {
    /// Unwraps this wrapper, returning the underlying result.
    pub fn into_inner(self) -> Result<(), LocalSeedDictAddError> {
        self.0
    }
}

/// Error that can occur when adding a local seed dict to the [`SeedDict`].
#[derive(Error, Debug, TryFromPrimitive)]
#[repr(i64)]
pub enum LocalSeedDictAddError {
    #[error("the length of the local seed dict and the length of the sum dict are not equal")]
    LengthMisMatch = -1,
    #[error("the local seed dict contains an unknown sum participant")]
    UnknownSumParticipant = -2,
    #[error("the update participant already submitted an update")]
    UpdatePkAlreadySubmitted = -3,
    #[error("the update participant already exists in the inner update seed dict")]
    UpdatePkAlreadyExistsInUpdateSeedDict = -4,
}

/// A wrapper that contains the result of the "increment mask score" operation.
#[derive(Debug)]
pub struct MaskScoreIncr(pub(crate) Result<(), MaskScoreIncrError>);

impl MaskScoreIncr {
    /// Unwraps this wrapper, returning the underlying result.
    pub fn into_inner(self) -> Result<(), MaskScoreIncrError> {
        self.0
    }
}

/// Error that can occur when incrementing a mask score.
#[derive(Error, Debug, TryFromPrimitive)]
#[repr(i64)]
pub enum MaskScoreIncrError {
    #[error("unknown sum participant")]
    UnknownSumPk = -1,
    #[error("the sum participant submitted a mask already")]
    MaskAlreadySubmitted = -2,
}

/// A wrapper that contains the result of the "advance phase" operation.
#[derive(Debug)]
pub struct PhaseAdvance(pub(crate) Result<(), PhaseAdvanceError>);

impl PhaseAdvance {
    /// Unwraps this wrapper, returning the underlying result.
    pub fn into_inner(self) -> Result<(), PhaseAdvanceError> {
        self.0
    }
}

/// Error that can occur when recording a phase transition.
#[derive(Error, Debug, TryFromPrimitive)]
#[repr(i64)]
pub enum PhaseAdvanceError {
    #[error("the recorded phase is not the expected one")]
    PhaseMismatch = -1,
}
