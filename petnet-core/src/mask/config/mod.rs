//! Masking configurations.
//!
//! See the [mask module] documentation since this is a private module anyways.
//!
//! [mask module]: crate::mask

pub(crate) mod serialization;

use std::convert::TryFrom;

use num::{
    bigint::{BigInt, BigUint},
    rational::Ratio,
    traits::Pow,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("invalid masking configuration")]
/// An error related to an unknown masking configuration encoding.
pub struct InvalidMaskConfigError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
/// The order of the finite group in which masked weights are embedded.
pub enum GroupType {
    /// The smallest group that fits all aggregates. No gap, slowest arithmetic.
    Integer = 0,
    /// The smallest prime order group that fits all aggregates.
    Prime = 1,
    /// The smallest power-of-two order group that fits all aggregates.
    Power2 = 2,
}

impl TryFrom<u8> for GroupType {
    type Error = InvalidMaskConfigError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::Integer),
            1 => Ok(Self::Prime),
            2 => Ok(Self::Power2),
            _ => Err(InvalidMaskConfigError),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
/// The original primitive data type of the model weights.
pub enum DataType {
    F32 = 0,
    F64 = 1,
    I32 = 2,
    I64 = 3,
}

impl TryFrom<u8> for DataType {
    type Error = InvalidMaskConfigError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::F32),
            1 => Ok(Self::F64),
            2 => Ok(Self::I32),
            3 => Ok(Self::I64),
            _ => Err(InvalidMaskConfigError),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
/// The absolute bound enforced on the model weights before masking.
pub enum BoundType {
    /// Weights are absolutely bounded by 1.
    B0 = 0,
    /// Weights are absolutely bounded by 100.
    B2 = 2,
    /// Weights are absolutely bounded by 10,000.
    B4 = 4,
    /// Weights are absolutely bounded by 1,000,000.
    B6 = 6,
    /// Weights are bounded by the maximum value of their data type.
    Bmax = 255,
}

impl TryFrom<u8> for BoundType {
    type Error = InvalidMaskConfigError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::B0),
            2 => Ok(Self::B2),
            4 => Ok(Self::B4),
            6 => Ok(Self::B6),
            255 => Ok(Self::Bmax),
            _ => Err(InvalidMaskConfigError),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
/// The maximum number of masked models that may be aggregated without
/// information loss.
pub enum ModelType {
    /// At most 1,000 models.
    M3 = 3,
    /// At most 1,000,000 models.
    M6 = 6,
    /// At most 1,000,000,000 models.
    M9 = 9,
    /// At most 1,000,000,000,000 models.
    M12 = 12,
}

impl TryFrom<u8> for ModelType {
    type Error = InvalidMaskConfigError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            3 => Ok(Self::M3),
            6 => Ok(Self::M6),
            9 => Ok(Self::M9),
            12 => Ok(Self::M12),
            _ => Err(InvalidMaskConfigError),
        }
    }
}

impl ModelType {
    /// The maximum number of models that may be aggregated under this model type.
    pub fn max_nb_models(self) -> usize {
        10_usize.pow(self as u32)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// A masking configuration.
pub struct MaskConfig {
    /// The order of the finite group.
    pub group_type: GroupType,
    /// The original primitive data type of the weights.
    pub data_type: DataType,
    /// The absolute bound of the weights.
    pub bound_type: BoundType,
    /// The maximum number of aggregated models.
    pub model_type: ModelType,
}

impl MaskConfig {
    /// The additive shift which makes shifted weights non-negative.
    pub fn add_shift(&self) -> Ratio<BigInt> {
        use {BoundType::*, DataType::*};

        // safe unwraps: the float maxima are finite
        match self.bound_type {
            B0 => Ratio::from_integer(BigInt::from(1)),
            B2 => Ratio::from_integer(BigInt::from(100)),
            B4 => Ratio::from_integer(BigInt::from(10_000)),
            B6 => Ratio::from_integer(BigInt::from(1_000_000)),
            Bmax => match self.data_type {
                F32 => Ratio::from_float(f32::MAX).unwrap(),
                F64 => Ratio::from_float(f64::MAX).unwrap(),
                I32 => Ratio::from_integer(BigInt::from(i32::MAX)),
                I64 => Ratio::from_integer(BigInt::from(i64::MAX)),
            },
        }
    }

    /// The exponential shift (a power of ten) which makes shifted weights integral.
    pub fn exp_shift(&self) -> BigInt {
        use {BoundType::*, DataType::*};

        let exponent = match self.data_type {
            F32 => match self.bound_type {
                B0 | B2 | B4 | B6 => 10_usize,
                Bmax => 45,
            },
            F64 => match self.bound_type {
                B0 | B2 | B4 | B6 => 20,
                Bmax => 324,
            },
            // fractional digits are still required for scaled aggregation
            I32 | I64 => 10,
        };
        BigInt::from(10).pow(exponent)
    }

    /// The order of the finite group.
    ///
    /// The group must hold sums of up to `max_nb_models` shifted weights, each
    /// of which is bounded by `2 * add_shift * exp_shift`. The group type
    /// picks the smallest integer, prime or power-of-two order above that
    /// bound.
    pub fn order(&self) -> BigUint {
        // safe unwraps: the product is integral and non-negative for all
        // supported configurations
        let bound = (self.add_shift()
            * self.exp_shift()
            * BigInt::from(2)
            * BigInt::from(self.model_type.max_nb_models()))
        .to_integer()
        .to_biguint()
        .unwrap();

        match self.group_type {
            GroupType::Integer => bound + BigUint::from(1_u8),
            GroupType::Power2 => BigUint::from(1_u8) << (bound.bits() as usize),
            GroupType::Prime => bound + self.prime_delta(),
        }
    }

    /// The offset of the smallest prime above the integer group bound.
    ///
    /// These are protocol constants: both sides of the protocol must agree on
    /// the exact group order for the masks to cancel.
    fn prime_delta(&self) -> u64 {
        use {BoundType::*, DataType::*, ModelType::*};

        match (self.data_type, self.bound_type, self.model_type) {
            // f32, i32 and i64 share the bounded shifts
            (F32, B0, M3) | (I32, B0, M3) | (I64, B0, M3) => 21,
            (F32, B0, M6) | (I32, B0, M6) | (I64, B0, M6) => 3,
            (F32, B0, M9) | (I32, B0, M9) | (I64, B0, M9) => 11,
            (F32, B0, M12) | (I32, B0, M12) | (I64, B0, M12) => 3,
            (F32, B2, M3) | (I32, B2, M3) | (I64, B2, M3) => 21,
            (F32, B2, M6) | (I32, B2, M6) | (I64, B2, M6) => 57,
            (F32, B2, M9) | (I32, B2, M9) | (I64, B2, M9) => 69,
            (F32, B2, M12) | (I32, B2, M12) | (I64, B2, M12) => 3,
            (F32, B4, M3) | (I32, B4, M3) | (I64, B4, M3) => 3,
            (F32, B4, M6) | (I32, B4, M6) | (I64, B4, M6) => 89,
            (F32, B4, M9) | (I32, B4, M9) | (I64, B4, M9) => 69,
            (F32, B4, M12) | (I32, B4, M12) | (I64, B4, M12) => 27,
            (F32, B6, M3) | (I32, B6, M3) | (I64, B6, M3) => 11,
            (F32, B6, M6) | (I32, B6, M6) | (I64, B6, M6) => 3,
            (F32, B6, M9) | (I32, B6, M9) | (I64, B6, M9) => 9,
            (F32, B6, M12) | (I32, B6, M12) | (I64, B6, M12) => 131,
            (F32, Bmax, M3) => 179,
            (F32, Bmax, M6) => 53,
            (F32, Bmax, M9) => 181,
            (F32, Bmax, M12) => 149,
            (F64, B0, M3) => 69,
            (F64, B0, M6) => 27,
            (F64, B0, M9) => 17,
            (F64, B0, M12) => 159,
            (F64, B2, M3) => 9,
            (F64, B2, M6) => 131,
            (F64, B2, M9) => 47,
            (F64, B2, M12) => 203,
            (F64, B4, M3) => 39,
            (F64, B4, M6) => 71,
            (F64, B4, M9) => 17,
            (F64, B4, M12) => 41,
            (F64, B6, M3) => 17,
            (F64, B6, M6) => 159,
            (F64, B6, M9) => 3,
            (F64, B6, M12) => 23,
            (F64, Bmax, M3) => 729,
            (F64, Bmax, M6) => 1129,
            (F64, Bmax, M9) => 243,
            (F64, Bmax, M12) => 1753,
            (I32, Bmax, M3) => 9,
            (I32, Bmax, M6) => 33,
            (I32, Bmax, M9) => 51,
            (I32, Bmax, M12) => 113,
            (I64, Bmax, M3) => 53,
            (I64, Bmax, M6) => 17,
            (I64, Bmax, M9) => 291,
            (I64, Bmax, M12) => 27,
        }
    }

    /// The number of bytes needed to represent the largest element of the group.
    pub fn bytes_per_number(&self) -> usize {
        (self.order() - BigUint::from(1_u8)).to_bytes_le().len()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// A pair of masking configurations: one for the model vector, one for the
/// masked scalar travelling with it.
pub struct MaskConfigPair {
    /// The masking configuration of the model.
    pub vect: MaskConfig,
    /// The masking configuration of the scalar.
    pub unit: MaskConfig,
}

impl From<MaskConfig> for MaskConfigPair {
    fn from(config: MaskConfig) -> Self {
        Self {
            vect: config,
            unit: config,
        }
    }
}

#[cfg(test)]
mod tests {
    use num::traits::Num;

    use super::*;

    fn config(group_type: GroupType) -> MaskConfig {
        MaskConfig {
            group_type,
            data_type: DataType::F32,
            bound_type: BoundType::B0,
            model_type: ModelType::M3,
        }
    }

    #[test]
    fn test_integer_order() {
        // 2 * 1 * 10^10 * 10^3 + 1
        assert_eq!(
            config(GroupType::Integer).order(),
            BigUint::from_str_radix("20000000000001", 10).unwrap(),
        );
    }

    #[test]
    fn test_prime_order() {
        // the smallest prime above 2 * 10^13
        assert_eq!(
            config(GroupType::Prime).order(),
            BigUint::from_str_radix("20000000000021", 10).unwrap(),
        );
    }

    #[test]
    fn test_power2_order() {
        // 2^45 is the smallest power of two above 2 * 10^13
        assert_eq!(
            config(GroupType::Power2).order(),
            BigUint::from(1_u8) << 45_usize,
        );
    }

    #[test]
    fn test_prime_order_f64() {
        // the smallest prime above 2 * 10^23
        let config = MaskConfig {
            group_type: GroupType::Prime,
            data_type: DataType::F64,
            bound_type: BoundType::B0,
            model_type: ModelType::M3,
        };
        assert_eq!(
            config.order(),
            BigUint::from_str_radix("200000000000000000000069", 10).unwrap(),
        );
    }

    #[test]
    fn test_bytes_per_number() {
        // 20000000000020 fits into 6 bytes
        assert_eq!(config(GroupType::Prime).bytes_per_number(), 6);
    }
}
