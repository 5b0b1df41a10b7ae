//! Masked objects.
//!
//! See the [mask module] documentation since this is a private module anyways.
//!
//! [mask module]: crate::mask

pub(crate) mod serialization;

use num::bigint::BigUint;
use thiserror::Error;

use crate::mask::config::{MaskConfig, MaskConfigPair};

#[derive(Error, Debug)]
#[error("the mask object is invalid: data is incompatible with the masking configuration")]
/// Errors related to invalid mask objects.
pub struct InvalidMaskObjectError;

#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize)]
/// A vector of masked values: either a mask or a masked model.
pub struct MaskVect {
    /// The masked values.
    pub data: Vec<BigUint>,
    /// The masking configuration the values conform to.
    pub config: MaskConfig,
}

impl MaskVect {
    /// Creates a new mask vector from the given masking configuration and data.
    ///
    /// # Errors
    /// Fails if the data does not conform to the masking configuration.
    pub fn new(config: MaskConfig, data: Vec<BigUint>) -> Result<Self, InvalidMaskObjectError> {
        let obj = Self::new_unchecked(config, data);
        if obj.is_valid() {
            Ok(obj)
        } else {
            Err(InvalidMaskObjectError)
        }
    }

    /// Creates a new mask vector from the given masking configuration and data
    /// without conformity checks.
    pub fn new_unchecked(config: MaskConfig, data: Vec<BigUint>) -> Self {
        Self { data, config }
    }

    /// Creates a new, empty mask vector of the given capacity.
    pub fn empty(config: MaskConfig, size: usize) -> Self {
        Self {
            data: Vec::with_capacity(size),
            config,
        }
    }

    /// Checks if all values conform to the masking configuration.
    pub fn is_valid(&self) -> bool {
        let order = self.config.order();
        self.data.iter().all(|i| i < &order)
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize)]
/// A single masked value: either a mask or a masked scalar.
pub struct MaskUnit {
    /// The masked value.
    pub data: BigUint,
    /// The masking configuration the value conforms to.
    pub config: MaskConfig,
}

impl MaskUnit {
    /// Creates a new mask unit from the given masking configuration and value.
    ///
    /// # Errors
    /// Fails if the value does not conform to the masking configuration.
    pub fn new(config: MaskConfig, data: BigUint) -> Result<Self, InvalidMaskObjectError> {
        let obj = Self::new_unchecked(config, data);
        if obj.is_valid() {
            Ok(obj)
        } else {
            Err(InvalidMaskObjectError)
        }
    }

    /// Creates a new mask unit from the given masking configuration and value
    /// without conformity checks.
    pub fn new_unchecked(config: MaskConfig, data: BigUint) -> Self {
        Self { data, config }
    }

    /// Creates a new zero-valued mask unit.
    pub fn empty(config: MaskConfig) -> Self {
        Self {
            data: BigUint::from(0_u8),
            config,
        }
    }

    /// Checks if the value conforms to the masking configuration.
    pub fn is_valid(&self) -> bool {
        self.data < self.config.order()
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize)]
/// A masked model and its masked scalar, or the mask of both.
pub struct MaskObject {
    /// The masked model or model mask.
    pub vect: MaskVect,
    /// The masked scalar or scalar mask.
    pub unit: MaskUnit,
}

impl MaskObject {
    /// Creates a new mask object from the given vector and unit parts.
    ///
    /// # Errors
    /// Fails if either part does not conform to its masking configuration.
    pub fn new(vect: MaskVect, unit: MaskUnit) -> Result<Self, InvalidMaskObjectError> {
        let obj = Self { vect, unit };
        if obj.is_valid() {
            Ok(obj)
        } else {
            Err(InvalidMaskObjectError)
        }
    }

    /// Creates a new mask object from the given parts without conformity checks.
    pub fn new_unchecked(vect: MaskVect, unit: MaskUnit) -> Self {
        Self { vect, unit }
    }

    /// Creates a new, empty mask object of the given capacity.
    pub fn empty(config: MaskConfigPair, size: usize) -> Self {
        Self {
            vect: MaskVect::empty(config.vect, size),
            unit: MaskUnit::empty(config.unit),
        }
    }

    /// Gets the masking configurations of both parts.
    pub fn config(&self) -> MaskConfigPair {
        MaskConfigPair {
            vect: self.vect.config,
            unit: self.unit.config,
        }
    }

    /// Checks if both parts conform to their masking configurations.
    pub fn is_valid(&self) -> bool {
        self.vect.is_valid() && self.unit.is_valid()
    }
}
