//! An in-memory [`CoordinatorStorage`] and [`ModelStorage`].
//!
//! All round state lives behind one mutex, which makes every operation
//! trivially atomic. The backend serves the test-suite and single-process
//! deployments that can afford to lose the round state on restart; its
//! behavior is the reference semantics for the other backends.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::{
    state_machine::{coordinator::CoordinatorState, phases::PhaseName},
    storage::{
        CoordinatorStorage,
        LocalSeedDictAdd,
        LocalSeedDictAddError,
        MaskScoreIncr,
        MaskScoreIncrError,
        ModelStorage,
        PhaseAdvance,
        PhaseAdvanceError,
        StorageResult,
        SumPartAdd,
        SumPartAddError,
    },
};
use petnet_core::{
    common::RoundSeed,
    mask::{Aggregation, MaskObject, Model},
    LocalSeedDict,
    SeedDict,
    SumDict,
    SumParticipantEphemeralPublicKey,
    SumParticipantPublicKey,
    UpdateParticipantPublicKey,
    UpdateSeedDict,
};

#[derive(Default)]
struct Inner {
    state: Option<CoordinatorState>,
    sum_dict: SumDict,
    seed_dict: SeedDict,
    update_participants: HashSet<UpdateParticipantPublicKey>,
    masked_aggregate: Option<Aggregation>,
    mask_submitted: HashSet<SumParticipantPublicKey>,
    // serialized mask -> (mask, score)
    mask_dict: HashMap<Vec<u8>, (MaskObject, u64)>,
    latest_global_model_id: Option<String>,
    global_models: HashMap<String, Model>,
}

impl Inner {
    fn flush_dicts(&mut self) {
        self.sum_dict.clear();
        self.seed_dict.clear();
        self.update_participants.clear();
        self.masked_aggregate = None;
        self.mask_submitted.clear();
        self.mask_dict.clear();
    }
}

#[derive(Clone, Default)]
/// An in-memory store.
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a poisoned mutex means a handler panicked mid-operation; the
        // operations below never panic while holding the lock
        self.inner.lock().expect("memory store mutex poisoned")
    }
}

#[async_trait]
impl CoordinatorStorage for MemoryStore {
    async fn set_coordinator_state(&mut self, state: &CoordinatorState) -> StorageResult<()> {
        self.lock().state = Some(state.clone());
        Ok(())
    }

    async fn coordinator_state(&mut self) -> StorageResult<Option<CoordinatorState>> {
        Ok(self.lock().state.clone())
    }

    async fn advance_phase(
        &mut self,
        expected: PhaseName,
        state: &CoordinatorState,
    ) -> StorageResult<PhaseAdvance> {
        let mut inner = self.lock();
        let recorded = inner.state.as_ref().map(|state| state.phase);
        if let Some(phase) = recorded {
            if phase != expected {
                return Ok(PhaseAdvance(Err(PhaseAdvanceError::PhaseMismatch)));
            }
        }
        inner.state = Some(state.clone());
        Ok(PhaseAdvance(Ok(())))
    }

    async fn add_sum_participant(
        &mut self,
        pk: &SumParticipantPublicKey,
        ephm_pk: &SumParticipantEphemeralPublicKey,
    ) -> StorageResult<SumPartAdd> {
        let mut inner = self.lock();
        if inner.sum_dict.contains_key(pk) {
            return Ok(SumPartAdd(Err(SumPartAddError::AlreadyExists)));
        }
        inner.sum_dict.insert(*pk, *ephm_pk);
        Ok(SumPartAdd(Ok(())))
    }

    async fn sum_dict(&mut self) -> StorageResult<Option<SumDict>> {
        let inner = self.lock();
        if inner.sum_dict.is_empty() {
            Ok(None)
        } else {
            Ok(Some(inner.sum_dict.clone()))
        }
    }

    async fn add_local_seed_dict(
        &mut self,
        update_pk: &UpdateParticipantPublicKey,
        local_seed_dict: &LocalSeedDict,
    ) -> StorageResult<LocalSeedDictAdd> {
        let mut inner = self.lock();

        if local_seed_dict.len() != inner.sum_dict.len() {
            return Ok(LocalSeedDictAdd(Err(LocalSeedDictAddError::LengthMisMatch)));
        }
        if local_seed_dict
            .keys()
            .any(|sum_pk| !inner.sum_dict.contains_key(sum_pk))
        {
            return Ok(LocalSeedDictAdd(Err(
                LocalSeedDictAddError::UnknownSumParticipant,
            )));
        }
        if !inner.update_participants.insert(*update_pk) {
            return Ok(LocalSeedDictAdd(Err(
                LocalSeedDictAddError::UpdatePkAlreadySubmitted,
            )));
        }

        for (sum_pk, seed) in local_seed_dict {
            let update_seed_dict = inner
                .seed_dict
                .entry(*sum_pk)
                .or_insert_with(UpdateSeedDict::new);
            if update_seed_dict.insert(*update_pk, seed.clone()).is_some() {
                return Ok(LocalSeedDictAdd(Err(
                    LocalSeedDictAddError::UpdatePkAlreadyExistsInUpdateSeedDict,
                )));
            }
        }
        Ok(LocalSeedDictAdd(Ok(())))
    }

    async fn seed_dict(&mut self) -> StorageResult<Option<SeedDict>> {
        let inner = self.lock();
        if inner.sum_dict.is_empty() {
            return Ok(None);
        }
        // every sum participant has an entry, even if no update arrived yet
        let seed_dict = inner
            .sum_dict
            .keys()
            .map(|sum_pk| {
                (
                    *sum_pk,
                    inner.seed_dict.get(sum_pk).cloned().unwrap_or_default(),
                )
            })
            .collect();
        Ok(Some(seed_dict))
    }

    async fn set_masked_aggregate(&mut self, aggregation: &Aggregation) -> StorageResult<()> {
        self.lock().masked_aggregate = Some(aggregation.clone());
        Ok(())
    }

    async fn masked_aggregate(&mut self) -> StorageResult<Option<Aggregation>> {
        Ok(self.lock().masked_aggregate.clone())
    }

    async fn incr_mask_score(
        &mut self,
        pk: &SumParticipantPublicKey,
        mask: &MaskObject,
    ) -> StorageResult<MaskScoreIncr> {
        let mut inner = self.lock();
        if !inner.sum_dict.contains_key(pk) {
            return Ok(MaskScoreIncr(Err(MaskScoreIncrError::UnknownSumPk)));
        }
        if !inner.mask_submitted.insert(*pk) {
            return Ok(MaskScoreIncr(Err(MaskScoreIncrError::MaskAlreadySubmitted)));
        }
        let key = bincode::serialize(mask)?;
        let entry = inner.mask_dict.entry(key).or_insert((mask.clone(), 0));
        entry.1 += 1;
        Ok(MaskScoreIncr(Ok(())))
    }

    async fn best_masks(&mut self) -> StorageResult<Option<Vec<(MaskObject, u64)>>> {
        let inner = self.lock();
        if inner.mask_dict.is_empty() {
            return Ok(None);
        }
        // all scored masks, sorted for stable assertions in tests; the
        // contract only requires the full top-score group, unordered
        let mut entries: Vec<(&Vec<u8>, &(MaskObject, u64))> = inner.mask_dict.iter().collect();
        entries.sort_by(|(key_a, (_, count_a)), (key_b, (_, count_b))| {
            count_b.cmp(count_a).then_with(|| key_a.cmp(key_b))
        });
        Ok(Some(
            entries
                .into_iter()
                .map(|(_, (mask, count))| (mask.clone(), *count))
                .collect(),
        ))
    }

    async fn number_of_unique_masks(&mut self) -> StorageResult<u64> {
        Ok(self.lock().mask_dict.len() as u64)
    }

    async fn mask_submitted_count(&mut self) -> StorageResult<u64> {
        Ok(self.lock().mask_submitted.len() as u64)
    }

    async fn delete_coordinator_data(&mut self) -> StorageResult<()> {
        let mut inner = self.lock();
        inner.flush_dicts();
        inner.state = None;
        inner.latest_global_model_id = None;
        Ok(())
    }

    async fn delete_dicts(&mut self) -> StorageResult<()> {
        self.lock().flush_dicts();
        Ok(())
    }

    async fn set_latest_global_model_id(&mut self, id: &str) -> StorageResult<()> {
        self.lock().latest_global_model_id = Some(id.to_string());
        Ok(())
    }

    async fn latest_global_model_id(&mut self) -> StorageResult<Option<String>> {
        Ok(self.lock().latest_global_model_id.clone())
    }

    async fn is_ready(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ModelStorage for MemoryStore {
    async fn set_global_model(
        &mut self,
        round_id: u64,
        round_seed: &RoundSeed,
        global_model: &Model,
    ) -> StorageResult<String> {
        let id = Self::create_global_model_id(round_id, round_seed);
        let mut inner = self.lock();
        if inner.global_models.contains_key(&id) {
            return Err(anyhow!("global model {} already exists", id));
        }
        inner.global_models.insert(id.clone(), global_model.clone());
        Ok(id)
    }

    async fn global_model(&mut self, id: &str) -> StorageResult<Option<Model>> {
        Ok(self.lock().global_models.get(id).cloned())
    }

    async fn is_ready(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl crate::storage::Storage for MemoryStore {
    async fn is_ready(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petnet_core::{
        crypto::{ByteObject, EncryptKeyPair, SigningKeyPair},
        mask::{BoundType, DataType, EncryptedMaskSeed, GroupType, MaskConfig, ModelType},
    };

    fn new_store() -> MemoryStore {
        MemoryStore::new()
    }

    fn sum_entry() -> (SumParticipantPublicKey, SumParticipantEphemeralPublicKey) {
        (
            SigningKeyPair::generate().public,
            EncryptKeyPair::generate().public,
        )
    }

    fn mask(seed: u8) -> MaskObject {
        let config = MaskConfig {
            group_type: GroupType::Prime,
            data_type: DataType::F32,
            bound_type: BoundType::B0,
            model_type: ModelType::M3,
        };
        petnet_core::mask::MaskSeed::fill_with(seed).derive_mask(4, config.into())
    }

    #[tokio::test]
    async fn test_sum_dict() {
        let mut store = new_store();
        assert!(store.sum_dict().await.unwrap().is_none());

        let (pk, ephm_pk) = sum_entry();
        assert!(store
            .add_sum_participant(&pk, &ephm_pk)
            .await
            .unwrap()
            .into_inner()
            .is_ok());

        // the second registration of the same key is rejected
        let duplicate = store.add_sum_participant(&pk, &ephm_pk).await.unwrap();
        assert!(matches!(
            duplicate.into_inner().unwrap_err(),
            SumPartAddError::AlreadyExists
        ));

        let sum_dict = store.sum_dict().await.unwrap().unwrap();
        assert_eq!(sum_dict.len(), 1);
        assert_eq!(sum_dict.get(&pk), Some(&ephm_pk));
    }

    #[tokio::test]
    async fn test_seed_dict_checks() {
        let mut store = new_store();
        let (sum_pk, ephm_pk) = sum_entry();
        store
            .add_sum_participant(&sum_pk, &ephm_pk)
            .await
            .unwrap()
            .into_inner()
            .unwrap();

        let update_pk = SigningKeyPair::generate().public;

        // wrong length
        let empty = LocalSeedDict::new();
        let res = store.add_local_seed_dict(&update_pk, &empty).await.unwrap();
        assert!(matches!(
            res.into_inner().unwrap_err(),
            LocalSeedDictAddError::LengthMisMatch
        ));

        // unknown sum participant
        let mut unknown = LocalSeedDict::new();
        unknown.insert(
            SigningKeyPair::generate().public,
            EncryptedMaskSeed::zeroed(),
        );
        let res = store
            .add_local_seed_dict(&update_pk, &unknown)
            .await
            .unwrap();
        assert!(matches!(
            res.into_inner().unwrap_err(),
            LocalSeedDictAddError::UnknownSumParticipant
        ));

        // the failed attempts must not have touched the seed dict
        let seed_dict = store.seed_dict().await.unwrap().unwrap();
        assert!(seed_dict.get(&sum_pk).unwrap().is_empty());

        // valid
        let mut valid = LocalSeedDict::new();
        valid.insert(sum_pk, EncryptedMaskSeed::zeroed());
        let res = store.add_local_seed_dict(&update_pk, &valid).await.unwrap();
        assert!(res.into_inner().is_ok());

        // repeated submission
        let res = store.add_local_seed_dict(&update_pk, &valid).await.unwrap();
        assert!(matches!(
            res.into_inner().unwrap_err(),
            LocalSeedDictAddError::UpdatePkAlreadySubmitted
        ));

        let seed_dict = store.seed_dict().await.unwrap().unwrap();
        assert_eq!(seed_dict.get(&sum_pk).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mask_scores() {
        let mut store = new_store();
        assert!(store.best_masks().await.unwrap().is_none());

        let (pk_1, ephm_pk_1) = sum_entry();
        let (pk_2, ephm_pk_2) = sum_entry();
        let (pk_3, ephm_pk_3) = sum_entry();
        store
            .add_sum_participant(&pk_1, &ephm_pk_1)
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        store
            .add_sum_participant(&pk_2, &ephm_pk_2)
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        store
            .add_sum_participant(&pk_3, &ephm_pk_3)
            .await
            .unwrap()
            .into_inner()
            .unwrap();

        // unknown sum participant
        let stranger = SigningKeyPair::generate().public;
        let res = store.incr_mask_score(&stranger, &mask(1)).await.unwrap();
        assert!(matches!(
            res.into_inner().unwrap_err(),
            MaskScoreIncrError::UnknownSumPk
        ));

        // two votes for mask 1, one for mask 2
        for (pk, mask) in &[(pk_1, mask(1)), (pk_2, mask(1)), (pk_3, mask(2))] {
            let res = store.incr_mask_score(pk, mask).await.unwrap();
            assert!(res.into_inner().is_ok());
        }

        // repeated submission
        let res = store.incr_mask_score(&pk_1, &mask(1)).await.unwrap();
        assert!(matches!(
            res.into_inner().unwrap_err(),
            MaskScoreIncrError::MaskAlreadySubmitted
        ));

        assert_eq!(store.number_of_unique_masks().await.unwrap(), 2);
        assert_eq!(store.mask_submitted_count().await.unwrap(), 3);

        let best = store.best_masks().await.unwrap().unwrap();
        assert_eq!(best.len(), 2);
        assert_eq!(best[0], (mask(1), 2));
        assert_eq!(best[1], (mask(2), 1));
    }

    #[tokio::test]
    async fn test_delete_dicts_keeps_state_and_models() {
        let mut store = new_store();
        let (pk, ephm_pk) = sum_entry();
        store
            .add_sum_participant(&pk, &ephm_pk)
            .await
            .unwrap()
            .into_inner()
            .unwrap();

        let model = Model::from(vec![]);
        let id = store
            .set_global_model(1, &RoundSeed::zeroed(), &model)
            .await
            .unwrap();
        store.set_latest_global_model_id(&id).await.unwrap();

        store.delete_dicts().await.unwrap();

        assert!(store.sum_dict().await.unwrap().is_none());
        assert!(store.masked_aggregate().await.unwrap().is_none());
        assert_eq!(store.latest_global_model_id().await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_global_model_is_write_once() {
        let mut store = new_store();
        let model = Model::from(vec![]);
        let seed = RoundSeed::zeroed();
        store.set_global_model(1, &seed, &model).await.unwrap();
        assert!(store.set_global_model(1, &seed, &model).await.is_err());
    }
}
