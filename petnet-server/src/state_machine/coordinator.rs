//! Coordinator state and phase parameter types.

use serde::{Deserialize, Serialize};

use crate::{
    settings::{MaskSettings, ModelSettings, PetSettings},
    state_machine::phases::PhaseName,
};
use petnet_core::{
    common::{RoundParameters, RoundSeed},
    crypto::{ByteObject, EncryptKeyPair},
    mask::MaskConfig,
};

/// The minimal and maximal number of messages accepted in a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountParameters {
    /// The minimal number of messages.
    pub min: u64,
    /// The maximal number of messages.
    pub max: u64,
}

/// The minimal and maximal amount of time (in seconds) a phase lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeParameters {
    /// The minimal time.
    pub min: u64,
    /// The maximal time.
    pub max: u64,
}

/// The message count and time bounds of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseParameters {
    /// The message count bounds.
    pub count: CountParameters,
    /// The time bounds.
    pub time: TimeParameters,
}

/// The coordinator state.
///
/// This is everything the coordinator needs to restore a round after a
/// restart; the phase machine persists it at every phase transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorState {
    /// The credentials of the coordinator.
    pub keys: EncryptKeyPair,
    /// Internal ID used to identify a round.
    pub round_id: u64,
    /// The round parameters.
    pub round_params: RoundParameters,
    /// The phase the coordinator is currently in.
    pub phase: PhaseName,
    /// The wall-clock time (unix seconds) at which the current phase was entered.
    pub phase_entered_at: u64,
    /// The parameters of the sum phase.
    pub sum: PhaseParameters,
    /// The parameters of the update phase.
    pub update: PhaseParameters,
    /// The parameters of the sum2 phase.
    pub sum2: PhaseParameters,
}

impl CoordinatorState {
    /// Creates a new coordinator state from the settings.
    pub fn new(
        pet_settings: PetSettings,
        mask_settings: MaskSettings,
        model_settings: ModelSettings,
    ) -> Self {
        let keys = EncryptKeyPair::generate();
        let round_params = RoundParameters {
            pk: keys.public,
            sum: pet_settings.sum.prob,
            update: pet_settings.update.prob,
            seed: RoundSeed::zeroed(),
            mask_config: MaskConfig::from(mask_settings).into(),
            model_length: model_settings.length,
        };
        Self {
            keys,
            round_id: 0,
            round_params,
            phase: PhaseName::Idle,
            phase_entered_at: 0,
            sum: PhaseParameters {
                count: CountParameters {
                    min: pet_settings.sum.count.min,
                    max: pet_settings.sum.count.max,
                },
                time: TimeParameters {
                    min: pet_settings.sum.time.min,
                    max: pet_settings.sum.time.max,
                },
            },
            update: PhaseParameters {
                count: CountParameters {
                    min: pet_settings.update.count.min,
                    max: pet_settings.update.count.max,
                },
                time: TimeParameters {
                    min: pet_settings.update.time.min,
                    max: pet_settings.update.time.max,
                },
            },
            sum2: PhaseParameters {
                count: CountParameters {
                    min: pet_settings.sum2.count.min,
                    max: pet_settings.sum2.count.max,
                },
                time: TimeParameters {
                    min: pet_settings.sum2.time.min,
                    max: pet_settings.sum2.time.max,
                },
            },
        }
    }

    /// Returns the parameters of the given phase, or `None` for phases without any.
    pub fn phase_parameters(&self, phase: PhaseName) -> Option<&PhaseParameters> {
        match phase {
            PhaseName::Sum => Some(&self.sum),
            PhaseName::Update => Some(&self.update),
            PhaseName::Sum2 => Some(&self.sum2),
            _ => None,
        }
    }
}
