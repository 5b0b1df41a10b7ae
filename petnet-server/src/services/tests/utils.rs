//! Helpers for the service tests.

use crate::state_machine::{
    events::{Event, EventPublisher, EventSubscriber, ModelUpdate},
    phases::PhaseName,
};
use petnet_core::{
    common::RoundParameters,
    crypto::{ByteObject, EncryptKeyPair, EncryptKeySeed, SigningKeyPair},
    mask::{BoundType, DataType, GroupType, MaskConfig, ModelType},
    message::{Message, Sum},
};

/// The coordinator keys with which the test event channels are initialized.
pub fn coordinator_keys() -> EncryptKeyPair {
    EncryptKeyPair::derive_from_seed(&EncryptKeySeed::zeroed())
}

pub fn round_params() -> RoundParameters {
    let config = MaskConfig {
        group_type: GroupType::Prime,
        data_type: DataType::F32,
        bound_type: BoundType::B0,
        model_type: ModelType::M3,
    };
    RoundParameters {
        pk: coordinator_keys().public,
        sum: 0.5,
        update: 0.5,
        seed: petnet_core::common::RoundSeed::fill_with(0x42),
        mask_config: config.into(),
        model_length: 4,
    }
}

pub fn new_event_channels() -> (EventPublisher, EventSubscriber) {
    EventPublisher::init(
        0,
        coordinator_keys(),
        round_params(),
        PhaseName::Idle,
        ModelUpdate::Invalidate,
    )
}

pub fn round_params_event() -> Event<RoundParameters> {
    Event {
        round_id: 0,
        event: round_params(),
    }
}

/// A sum payload with arbitrary (not eligibility-checked) contents.
pub fn sum_payload() -> Sum {
    Sum {
        sum_signature: petnet_core::crypto::Signature::fill_with(0x11),
        ephm_pk: EncryptKeyPair::generate().public,
    }
}

/// A signed, serialized sum message addressed to the given coordinator.
pub fn new_signed_sum_message(coordinator: &EncryptKeyPair) -> (Message, Vec<u8>) {
    let keys = SigningKeyPair::generate();
    let message = Message::new_sum(keys.public, coordinator.public, sum_payload());
    let mut bytes = vec![0; message.buffer_length()];
    message.to_bytes(&mut bytes, &keys.secret);
    (message, bytes)
}
