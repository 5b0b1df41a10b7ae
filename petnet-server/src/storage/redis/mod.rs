//! A Redis-backed [`CoordinatorStorage`] and [`ModelStorage`].
//!
//! # Data model
//!
//! ```text
//! {
//!     // coordinator state, bincode encoded
//!     "coordinator_state": "...",
//!     // currently recorded phase, as a small integer
//!     "phase": "...",
//!     // sum dict
//!     "sum_dict": { // hash
//!         SumParticipantPublicKey_1: SumParticipantEphemeralPublicKey_1,
//!         SumParticipantPublicKey_2: SumParticipantEphemeralPublicKey_2
//!     },
//!     // seed dict
//!     "update_participants": [ // set
//!         UpdateParticipantPublicKey_1,
//!         UpdateParticipantPublicKey_2
//!     ],
//!     SumParticipantPublicKey_1: { // hash
//!         UpdateParticipantPublicKey_1: EncryptedMaskSeed,
//!         UpdateParticipantPublicKey_2: EncryptedMaskSeed
//!     },
//!     // running aggregate of masked models, bincode encoded
//!     "masked_aggregate": "...",
//!     // mask dict
//!     "mask_submitted": [ // set
//!         SumParticipantPublicKey_1,
//!         SumParticipantPublicKey_2
//!     ],
//!     "mask_dict": [ // sorted set of (bincode encoded mask, score)
//!         (mask_object_1, 2),
//!         (mask_object_2, 1)
//!     ],
//!     "latest_global_model_id": global_model_id,
//!     // committed global models, bincode encoded; survive round resets
//!     "global_model/{id}": "..."
//! }
//! ```
//!
//! The multi-key checks (seed dict shape, mask submission, phase transitions) run as Lua
//! scripts, which Redis executes atomically.

mod impls;

use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, IntoConnectionInfo, Pipeline, Script};
pub use redis::{RedisError, RedisResult};
use tracing::debug;

use self::impls::{
    EncryptedMaskSeedRead,
    LocalSeedDictWrite,
    MaskObjectRead,
    MaskObjectWrite,
    PublicEncryptKeyRead,
    PublicEncryptKeyWrite,
    PublicSigningKeyRead,
    PublicSigningKeyWrite,
};
use crate::{
    state_machine::{coordinator::CoordinatorState, phases::PhaseName},
    storage::{
        CoordinatorStorage,
        LocalSeedDictAdd,
        MaskScoreIncr,
        ModelStorage,
        PhaseAdvance,
        StorageError,
        StorageResult,
        SumPartAdd,
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
};

#[derive(Clone)]
/// A Redis client for the coordinator storage.
pub struct Client {
    connection: ConnectionManager,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("redis::Client").finish()
    }
}

fn to_storage_err(e: RedisError) -> StorageError {
    anyhow!(e)
}

impl Client {
    /// Creates a new Redis client.
    ///
    /// `url` to which Redis instance the client should connect to. The URL format is
    /// `redis://[<username>][:<passwd>@]<hostname>[:port][/<db>]`.
    ///
    /// The [`Client`] uses a [`redis::aio::ConnectionManager`] that automatically reconnects
    /// if the connection is dropped.
    pub async fn new<T: IntoConnectionInfo>(url: T) -> Result<Self, RedisError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_tokio_connection_manager().await?;
        Ok(Self { connection })
    }

    async fn create_flush_dicts_pipeline(&mut self) -> RedisResult<Pipeline> {
        // the seed dict is stored as one hash per sum participant, so their keys have to be
        // collected before the dictionaries can be deleted
        let sum_pks: Vec<PublicSigningKeyRead> = self.connection.hkeys("sum_dict").await?;
        let mut pipe = redis::pipe();

        pipe.del("sum_dict").ignore();
        pipe.del("update_participants").ignore();
        for sum_pk in sum_pks {
            pipe.del(sum_pk).ignore();
        }
        pipe.del("masked_aggregate").ignore();
        pipe.del("mask_submitted").ignore();
        pipe.del("mask_dict").ignore();
        Ok(pipe)
    }
}

#[async_trait]
impl CoordinatorStorage for Client {
    async fn set_coordinator_state(&mut self, state: &CoordinatorState) -> StorageResult<()> {
        debug!("set coordinator state");
        let blob = bincode::serialize(state)?;
        redis::pipe()
            .atomic()
            .set("coordinator_state", blob)
            .ignore()
            .set("phase", u8::from(state.phase))
            .ignore()
            .query_async(&mut self.connection)
            .await
            .map_err(to_storage_err)
    }

    async fn coordinator_state(&mut self) -> StorageResult<Option<CoordinatorState>> {
        let blob: Option<Vec<u8>> = self
            .connection
            .get("coordinator_state")
            .await
            .map_err(to_storage_err)?;
        blob.map(|bytes| bincode::deserialize(&bytes))
            .transpose()
            .map_err(Into::into)
    }

    async fn advance_phase(
        &mut self,
        expected: PhaseName,
        state: &CoordinatorState,
    ) -> StorageResult<PhaseAdvance> {
        debug!("record phase transition to {}", state.phase);
        let script = Script::new(
            r#"
                -- ARGV[1]: expected phase
                -- ARGV[2]: next phase
                -- ARGV[3]: coordinator state

                local recorded = redis.call("GET", "phase")
                if recorded ~= false and recorded ~= ARGV[1] then
                    return -1
                end

                redis.call("SET", "phase", ARGV[2])
                redis.call("SET", "coordinator_state", ARGV[3])
                return 0
            "#,
        );

        let blob = bincode::serialize(state)?;
        script
            .arg(u8::from(expected).to_string())
            .arg(u8::from(state.phase).to_string())
            .arg(blob)
            .invoke_async(&mut self.connection)
            .await
            .map_err(to_storage_err)
    }

    async fn add_sum_participant(
        &mut self,
        pk: &SumParticipantPublicKey,
        ephm_pk: &SumParticipantEphemeralPublicKey,
    ) -> StorageResult<SumPartAdd> {
        debug!("add sum participant with pk {:?}", pk);
        // HSETNX: 1 if field is new, 0 if it already exists
        self.connection
            .hset_nx(
                "sum_dict",
                PublicSigningKeyWrite::from(pk),
                PublicEncryptKeyWrite::from(ephm_pk),
            )
            .await
            .map_err(to_storage_err)
    }

    async fn sum_dict(&mut self) -> StorageResult<Option<SumDict>> {
        debug!("get sum dictionary");
        let reply: Vec<(PublicSigningKeyRead, PublicEncryptKeyRead)> = self
            .connection
            .hgetall("sum_dict")
            .await
            .map_err(to_storage_err)?;

        if reply.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            reply
                .into_iter()
                .map(|(pk, ephm_pk)| (pk.into(), ephm_pk.into()))
                .collect(),
        ))
    }

    async fn add_local_seed_dict(
        &mut self,
        update_pk: &UpdateParticipantPublicKey,
        local_seed_dict: &LocalSeedDict,
    ) -> StorageResult<LocalSeedDictAdd> {
        debug!(
            "update seed dictionary for update participant with pk {:?}",
            update_pk
        );
        let script = Script::new(
            r#"
                -- KEYS: key-value pairs [sum_pk_1, seed_1, sum_pk_2, seed_2, ...]
                -- ARGV[1]: update_pk

                local update_pk = ARGV[1]

                -- check if the local seed dict has the same length as the sum dict
                local seed_dict_len = #KEYS / 2
                local sum_dict_len = redis.call("HLEN", "sum_dict")
                if seed_dict_len ~= sum_dict_len then
                    return -1
                end

                -- check that all pks of the local seed dict are in the sum dict
                for i = 1, #KEYS, 2 do
                    local exist_in_sum_dict = redis.call("HEXISTS", "sum_dict", KEYS[i])
                    if exist_in_sum_dict == 0 then
                        return -2
                    end
                end

                -- check if the update participant already submitted
                -- SADD returns 0 if the member already exists
                local newly_added = redis.call("SADD", "update_participants", update_pk)
                if newly_added == 0 then
                    return -3
                end

                -- update the seed dict
                for i = 1, #KEYS, 2 do
                    local newly_set = redis.call("HSETNX", KEYS[i], update_pk, KEYS[i + 1])
                    -- HSETNX returns 0 if the field already exists, which can only happen
                    -- if the stored data is corrupted
                    if newly_set == 0 then
                        return -4
                    end
                end

                return 0
            "#,
        );

        script
            .key(LocalSeedDictWrite::from(local_seed_dict))
            .arg(PublicSigningKeyWrite::from(update_pk))
            .invoke_async(&mut self.connection)
            .await
            .map_err(to_storage_err)
    }

    async fn seed_dict(&mut self) -> StorageResult<Option<SeedDict>> {
        debug!("get seed dictionary");
        let sum_pks: Vec<PublicSigningKeyRead> = self
            .connection
            .hkeys("sum_dict")
            .await
            .map_err(to_storage_err)?;

        if sum_pks.is_empty() {
            return Ok(None);
        }

        let mut seed_dict = SeedDict::new();
        for sum_pk in sum_pks {
            let shares: HashMap<PublicSigningKeyRead, EncryptedMaskSeedRead> = self
                .connection
                .hgetall(&sum_pk)
                .await
                .map_err(to_storage_err)?;
            seed_dict.insert(
                sum_pk.into(),
                shares
                    .into_iter()
                    .map(|(pk, seed)| (pk.into(), seed.into()))
                    .collect(),
            );
        }

        Ok(Some(seed_dict))
    }

    async fn set_masked_aggregate(&mut self, aggregation: &Aggregation) -> StorageResult<()> {
        debug!("set masked aggregate");
        let blob = bincode::serialize(aggregation)?;
        self.connection
            .set("masked_aggregate", blob)
            .await
            .map_err(to_storage_err)
    }

    async fn masked_aggregate(&mut self) -> StorageResult<Option<Aggregation>> {
        let blob: Option<Vec<u8>> = self
            .connection
            .get("masked_aggregate")
            .await
            .map_err(to_storage_err)?;
        blob.map(|bytes| bincode::deserialize(&bytes))
            .transpose()
            .map_err(Into::into)
    }

    async fn incr_mask_score(
        &mut self,
        sum_pk: &SumParticipantPublicKey,
        mask: &MaskObject,
    ) -> StorageResult<MaskScoreIncr> {
        debug!("increment mask score");
        let script = Script::new(
            r#"
                -- KEYS[1]: mask
                -- ARGV[1]: sum_pk

                local sum_pk = ARGV[1]

                -- check if the participant is a sum participant
                --
                -- the sum_pk is not removed from the sum_dict because the sum_dict keys
                -- are needed to delete the seed dict hashes at the end of the round
                local sum_pk_exists = redis.call("HEXISTS", "sum_dict", sum_pk)
                if sum_pk_exists == 0 then
                    return -1
                end

                -- check if the sum participant already submitted a mask
                -- SADD returns 0 if the member already exists
                local newly_added = redis.call("SADD", "mask_submitted", sum_pk)
                if newly_added == 0 then
                    return -2
                end

                redis.call("ZINCRBY", "mask_dict", 1, KEYS[1])
                return 0
            "#,
        );

        script
            .key(MaskObjectWrite::from(mask))
            .arg(PublicSigningKeyWrite::from(sum_pk))
            .invoke_async(&mut self.connection)
            .await
            .map_err(to_storage_err)
    }

    async fn best_masks(&mut self) -> StorageResult<Option<Vec<(MaskObject, u64)>>> {
        debug!("get best masks");
        // first the highest score, then every mask that reached it: the
        // contract requires the full top-score group, and a ZREVRANGE prefix
        // would drop tied masks
        let top: Vec<(MaskObjectRead, u64)> = self
            .connection
            .zrevrange_withscores("mask_dict", 0, 0)
            .await
            .map_err(to_storage_err)?;
        let top_score = match top.into_iter().next() {
            Some((_, score)) => score,
            None => return Ok(None),
        };

        let tied: Vec<MaskObjectRead> = self
            .connection
            .zrangebyscore("mask_dict", top_score, top_score)
            .await
            .map_err(to_storage_err)?;
        Ok(Some(
            tied.into_iter()
                .map(|mask| (mask.into(), top_score))
                .collect(),
        ))
    }

    async fn number_of_unique_masks(&mut self) -> StorageResult<u64> {
        self.connection
            .zcount("mask_dict", "-inf", "+inf")
            .await
            .map_err(to_storage_err)
    }

    async fn mask_submitted_count(&mut self) -> StorageResult<u64> {
        self.connection
            .scard("mask_submitted")
            .await
            .map_err(to_storage_err)
    }

    async fn delete_coordinator_data(&mut self) -> StorageResult<()> {
        debug!("flush coordinator data");
        let mut pipe = self
            .create_flush_dicts_pipeline()
            .await
            .map_err(to_storage_err)?;
        pipe.del("coordinator_state").ignore();
        pipe.del("phase").ignore();
        pipe.del("latest_global_model_id").ignore();
        pipe.atomic()
            .query_async(&mut self.connection)
            .await
            .map_err(to_storage_err)
    }

    async fn delete_dicts(&mut self) -> StorageResult<()> {
        debug!("flush all round dictionaries");
        let mut pipe = self
            .create_flush_dicts_pipeline()
            .await
            .map_err(to_storage_err)?;
        pipe.atomic()
            .query_async(&mut self.connection)
            .await
            .map_err(to_storage_err)
    }

    async fn set_latest_global_model_id(&mut self, global_model_id: &str) -> StorageResult<()> {
        debug!("set latest global model with id {}", global_model_id);
        self.connection
            .set("latest_global_model_id", global_model_id)
            .await
            .map_err(to_storage_err)
    }

    async fn latest_global_model_id(&mut self) -> StorageResult<Option<String>> {
        self.connection
            .get("latest_global_model_id")
            .await
            .map_err(to_storage_err)
    }

    async fn is_ready(&mut self) -> StorageResult<()> {
        redis::cmd("PING")
            .query_async::<_, String>(&mut self.connection)
            .await
            .map(|_| ())
            .map_err(to_storage_err)
    }
}

#[async_trait]
impl crate::storage::Storage for Client {
    async fn is_ready(&mut self) -> StorageResult<()> {
        CoordinatorStorage::is_ready(self).await
    }
}

#[async_trait]
impl ModelStorage for Client {
    async fn set_global_model(
        &mut self,
        round_id: u64,
        round_seed: &RoundSeed,
        global_model: &Model,
    ) -> StorageResult<String> {
        let id = Self::create_global_model_id(round_id, round_seed);
        debug!("set global model with id {}", id);
        let blob = bincode::serialize(global_model)?;
        // SETNX: 0 if the key already exists
        let newly_set: bool = self
            .connection
            .set_nx(format!("global_model/{}", id), blob)
            .await
            .map_err(to_storage_err)?;
        if newly_set {
            Ok(id)
        } else {
            Err(anyhow!("global model {} already exists", id))
        }
    }

    async fn global_model(&mut self, id: &str) -> StorageResult<Option<Model>> {
        debug!("get global model with id {}", id);
        let blob: Option<Vec<u8>> = self
            .connection
            .get(format!("global_model/{}", id))
            .await
            .map_err(to_storage_err)?;
        blob.map(|bytes| bincode::deserialize(&bytes))
            .transpose()
            .map_err(Into::into)
    }

    async fn is_ready(&mut self) -> StorageResult<()> {
        redis::cmd("PING")
            .query_async::<_, String>(&mut self.connection)
            .await
            .map(|_| ())
            .map_err(to_storage_err)
    }
}
