//! Round parameters published by the coordinator.

use serde::{Deserialize, Serialize};
use sodiumoxide::crypto::box_;

use crate::{crypto::ByteObject, mask::MaskConfigPair, CoordinatorPublicKey};

/// The tag under which sum-task eligibility signatures are produced.
pub const SUM_TASK_TAG: &[u8] = b"sum";

/// The tag under which update-task eligibility signatures are produced.
pub const UPDATE_TASK_TAG: &[u8] = b"update";

/// The parameters of a round, published at the start of the round and fetched
/// by participants before they act.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundParameters {
    /// The public key of the coordinator used for encryption.
    pub pk: CoordinatorPublicKey,
    /// Fraction of participants to be selected for the sum task.
    pub sum: f64,
    /// Fraction of participants to be selected for the update task.
    pub update: f64,
    /// The random round seed.
    pub seed: RoundSeed,
    /// The masking configuration of this round.
    pub mask_config: MaskConfigPair,
    /// The length of the model.
    pub model_length: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A seed for a round.
pub struct RoundSeed(box_::Seed);

impl ByteObject for RoundSeed {
    const LENGTH: usize = box_::SEEDBYTES;

    /// Creates a round seed from a slice of bytes.
    ///
    /// # Errors
    /// Fails if the length of the input is invalid.
    fn from_slice(bytes: &[u8]) -> Option<Self> {
        box_::Seed::from_slice(bytes).map(Self)
    }

    /// Creates a round seed initialized to zero.
    fn zeroed() -> Self {
        Self(box_::Seed([0_u8; Self::LENGTH]))
    }

    /// Gets the round seed as a slice.
    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// The data a participant signs to prove its eligibility for the sum task.
///
/// Acceptance is a pure function of the key, the round and the role, so the
/// round id is part of the signed data.
pub fn sum_task_data(round_id: u64, seed: &RoundSeed) -> Vec<u8> {
    [SUM_TASK_TAG, &round_id.to_be_bytes(), seed.as_slice()].concat()
}

/// The data a participant signs to prove its eligibility for the update task.
pub fn update_task_data(round_id: u64, seed: &RoundSeed) -> Vec<u8> {
    [UPDATE_TASK_TAG, &round_id.to_be_bytes(), seed.as_slice()].concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_data_is_role_and_round_specific() {
        let seed = RoundSeed::fill_with(0x42);
        assert_ne!(sum_task_data(1, &seed), update_task_data(1, &seed));
        assert_ne!(sum_task_data(1, &seed), sum_task_data(2, &seed));
        assert_eq!(sum_task_data(7, &seed), sum_task_data(7, &seed));
    }
}
