//! Helpers for the state machine tests.

use tracing::Span;

use crate::{
    settings::{
        MaskSettings,
        ModelSettings,
        PetSettings,
        PetSettingsCount,
        PetSettingsSum,
        PetSettingsSum2,
        PetSettingsTime,
        PetSettingsUpdate,
    },
    state_machine::{
        coordinator::CoordinatorState,
        requests::{RequestError, RequestSender, Sum2Request, SumRequest, UpdateRequest},
    },
    storage::{memory::MemoryStore, CoordinatorStorage},
};
use petnet_core::{
    crypto::{EncryptKeyPair, SigningKeyPair},
    mask::{
        Aggregation,
        BoundType,
        DataType,
        GroupType,
        MaskConfig,
        MaskObject,
        Masker,
        Model,
        ModelType,
        Scalar,
    },
    LocalSeedDict,
};

pub fn pet_settings() -> PetSettings {
    PetSettings {
        sum: PetSettingsSum {
            prob: 0.5,
            count: PetSettingsCount { min: 1, max: 10 },
            time: PetSettingsTime { min: 1, max: 10 },
        },
        update: PetSettingsUpdate {
            prob: 0.9,
            count: PetSettingsCount { min: 3, max: 10 },
            time: PetSettingsTime { min: 1, max: 10 },
        },
        sum2: PetSettingsSum2 {
            count: PetSettingsCount { min: 1, max: 10 },
            time: PetSettingsTime { min: 1, max: 10 },
        },
    }
}

pub fn mask_settings() -> MaskSettings {
    MaskSettings {
        group_type: GroupType::Prime,
        data_type: DataType::F32,
        bound_type: BoundType::B0,
        model_type: ModelType::M3,
    }
}

pub fn mask_config() -> MaskConfig {
    mask_settings().into()
}

pub fn model_settings() -> ModelSettings {
    ModelSettings { length: 4 }
}

pub fn coordinator_state() -> CoordinatorState {
    CoordinatorState::new(pet_settings(), mask_settings(), model_settings())
}

/// A sum participant: its long-lived signing keys and its per-round
/// ephemeral encryption keys.
#[derive(Clone, Debug)]
pub struct SumParticipant {
    pub keys: SigningKeyPair,
    pub ephm_keys: EncryptKeyPair,
}

pub fn generate_summer() -> SumParticipant {
    SumParticipant {
        keys: SigningKeyPair::generate(),
        ephm_keys: EncryptKeyPair::generate(),
    }
}

/// An update participant.
#[derive(Clone, Debug)]
pub struct UpdateParticipant {
    pub keys: SigningKeyPair,
}

pub fn generate_updater() -> UpdateParticipant {
    UpdateParticipant {
        keys: SigningKeyPair::generate(),
    }
}

/// Registers a sum participant directly in the store.
pub async fn register_summer(store: &mut MemoryStore, summer: &SumParticipant) {
    store
        .add_sum_participant(&summer.keys.public, &summer.ephm_keys.public)
        .await
        .unwrap()
        .into_inner()
        .unwrap();
}

pub async fn send_sum_request(
    request_tx: &RequestSender,
    summer: &SumParticipant,
) -> Result<(), RequestError> {
    let req = SumRequest {
        participant_pk: summer.keys.public,
        ephm_pk: summer.ephm_keys.public,
    };
    request_tx.request(req.into(), Span::none()).await
}

/// Masks a model the way an update participant would and builds the matching
/// update request: the mask seed is sealed to every given sum participant.
pub fn update_request(
    updater: &UpdateParticipant,
    model: &Model,
    summers: &[SumParticipant],
) -> (UpdateRequest, MaskObject) {
    let (mask_seed, masked_model) = Masker::new(mask_config().into()).mask(Scalar::unit(), model);

    let mut local_seed_dict = LocalSeedDict::new();
    for summer in summers {
        local_seed_dict.insert(
            summer.keys.public,
            mask_seed.encrypt(&summer.ephm_keys.public),
        );
    }

    let req = UpdateRequest {
        participant_pk: updater.keys.public,
        local_seed_dict,
        masked_model: masked_model.clone(),
    };
    (req, masked_model)
}

pub async fn send_update_request(
    request_tx: &RequestSender,
    req: UpdateRequest,
) -> Result<(), RequestError> {
    request_tx.request(req.into(), Span::none()).await
}

pub async fn send_sum2_request(
    request_tx: &RequestSender,
    summer: &SumParticipant,
    model_mask: MaskObject,
) -> Result<(), RequestError> {
    let req = Sum2Request {
        participant_pk: summer.keys.public,
        model_mask,
    };
    request_tx.request(req.into(), Span::none()).await
}

/// Reconstructs the aggregated mask the way a sum participant would: decrypt
/// every seed share addressed to it and aggregate the derived masks.
pub fn reconstruct_mask(
    summer: &SumParticipant,
    shares: &petnet_core::UpdateSeedDict,
    model_length: usize,
) -> MaskObject {
    let mut mask_agg = Aggregation::new(mask_config().into(), model_length);
    for encrypted_seed in shares.values() {
        let seed = encrypted_seed
            .decrypt(&summer.ephm_keys.public, &summer.ephm_keys.secret)
            .unwrap();
        mask_agg.aggregate(seed.derive_mask(model_length, mask_config().into()));
    }
    mask_agg.into()
}
