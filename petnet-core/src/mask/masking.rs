//! Masking, aggregation and unmasking of models.
//!
//! See the [mask module] documentation since this is a private module anyways.
//!
//! [mask module]: crate::mask

use num::{
    bigint::{BigInt, BigUint, ToBigInt},
    clamp,
    rational::Ratio,
    traits::clamp_max,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use thiserror::Error;

use crate::{
    crypto::{prng::generate_integer, ByteObject},
    mask::{
        config::MaskConfigPair,
        model::Model,
        object::{MaskObject, MaskUnit, MaskVect},
        scalar::Scalar,
        seed::MaskSeed,
    },
};

#[derive(Debug, Error, Eq, PartialEq)]
/// Errors related to the unmasking of models.
pub enum UnmaskingError {
    #[error("there is no model to unmask")]
    NoModel,

    #[error("too many models were aggregated for the current unmasking configuration")]
    TooManyModels,

    #[error("too many scalars were aggregated for the current unmasking configuration")]
    TooManyScalars,

    #[error("the masked model is incompatible with the mask used for unmasking")]
    MaskManyMismatch,

    #[error("the masked scalar is incompatible with the mask used for unmasking")]
    MaskOneMismatch,

    #[error("the mask is invalid")]
    InvalidMask,
}

#[derive(Debug, Error)]
/// Errors related to the aggregation of masks and masked models.
pub enum AggregationError {
    #[error("the object to aggregate is invalid")]
    InvalidObject,

    #[error("too many models were aggregated for the current unmasking configuration")]
    TooManyModels,

    #[error("too many scalars were aggregated for the current unmasking configuration")]
    TooManyScalars,

    #[error("the model to aggregate is incompatible with the current aggregated model")]
    ModelMismatch,

    #[error("the scalar to aggregate is incompatible with the current aggregated scalar")]
    ScalarMismatch,
}

/// Shifts a clamped value into the non-negative integers of the group.
///
/// # Panics
/// Panics if the value is below `-add_shift`, which the callers exclude by
/// clamping first.
fn embed(value: &Ratio<BigInt>, add_shift: &Ratio<BigInt>, exp_shift: &BigInt) -> BigUint {
    ((value + add_shift) * exp_shift)
        .to_integer()
        .to_biguint()
        .unwrap()
}

/// Reverts [`embed`] for a sum of `nb_models` embedded values.
fn unembed(value: BigUint, add_shift: &Ratio<BigInt>, exp_shift: &BigInt, nb_models: usize) -> Ratio<BigInt> {
    // safe unwrap: `to_bigint` never fails for `BigUint`s
    Ratio::from(value.to_bigint().unwrap()) / exp_shift - add_shift * BigInt::from(nb_models)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// An aggregator for masks and masked models.
pub struct Aggregation {
    nb_models: usize,
    object: MaskObject,
    object_size: usize,
}

impl From<MaskObject> for Aggregation {
    fn from(object: MaskObject) -> Self {
        Self {
            nb_models: 1,
            object_size: object.vect.data.len(),
            object,
        }
    }
}

impl From<Aggregation> for MaskObject {
    fn from(aggr: Aggregation) -> Self {
        aggr.object
    }
}

#[allow(clippy::len_without_is_empty)]
impl Aggregation {
    /// Creates a new, empty aggregator for masks or masked models.
    pub fn new(config: MaskConfigPair, object_size: usize) -> Self {
        Self {
            nb_models: 0,
            object: MaskObject::empty(config, object_size),
            object_size,
        }
    }

    /// Gets the length of the aggregated mask object.
    pub fn len(&self) -> usize {
        self.object_size
    }

    /// Gets the number of objects that have been aggregated so far.
    pub fn nb_models(&self) -> usize {
        self.nb_models
    }

    /// Gets the masking configurations of the aggregator.
    pub fn config(&self) -> MaskConfigPair {
        self.object.config()
    }

    /// Validates if unmasking of the aggregated masked model with the given `mask` may be
    /// safely performed. Unmasking without this check may produce garbage.
    ///
    /// # Errors
    /// Fails if nothing has been aggregated yet, if more objects were aggregated than the
    /// configuration admits, if the mask does not fit the aggregate (configuration or length),
    /// or if the mask itself is invalid.
    pub fn validate_unmasking(&self, mask: &MaskObject) -> Result<(), UnmaskingError> {
        if self.nb_models == 0 {
            Err(UnmaskingError::NoModel)
        } else if self.nb_models > self.object.vect.config.model_type.max_nb_models() {
            Err(UnmaskingError::TooManyModels)
        } else if self.nb_models > self.object.unit.config.model_type.max_nb_models() {
            Err(UnmaskingError::TooManyScalars)
        } else if self.object.vect.config != mask.vect.config
            || self.object_size != mask.vect.data.len()
        {
            Err(UnmaskingError::MaskManyMismatch)
        } else if self.object.unit.config != mask.unit.config {
            Err(UnmaskingError::MaskOneMismatch)
        } else if !mask.is_valid() {
            Err(UnmaskingError::InvalidMask)
        } else {
            Ok(())
        }
    }

    /// Unmasks the aggregated masked model with the given `mask` and reverts the scaling with
    /// the unmasked scalar sum.
    ///
    /// [`validate_unmasking()`] must succeed before calling this, otherwise the result is
    /// garbage.
    ///
    /// # Panics
    /// This may only panic if [`validate_unmasking()`] fails.
    ///
    /// [`validate_unmasking()`]: Aggregation::validate_unmasking
    pub fn unmask(self, mask: MaskObject) -> Model {
        let Self {
            nb_models, object, ..
        } = self;

        // the scalar sum comes out first: it divides the weights below
        let config = object.unit.config;
        let order = config.order();
        // the subtraction panics on underflow, which can only happen with an
        // invalid mask
        let unmasked = (object.unit.data + &order - mask.unit.data) % &order;
        let scalar_sum = unembed(unmasked, &config.add_shift(), &config.exp_shift(), nb_models);

        let config = object.vect.config;
        let order = config.order();
        let add_shift = config.add_shift();
        let exp_shift = config.exp_shift();
        object
            .vect
            .data
            .into_iter()
            .zip(mask.vect.data)
            .map(|(masked, mask)| {
                let unmasked = (masked + &order - mask) % &order;
                unembed(unmasked, &add_shift, &exp_shift, nb_models) / &scalar_sum
            })
            .collect()
    }

    /// Validates if aggregation of the aggregated mask object with the given `object` may be
    /// safely performed. Aggregating without this check may produce garbage.
    ///
    /// # Errors
    /// Fails if the configurations or the lengths don't coincide (an empty aggregator accepts
    /// any length), if the configuration admits no further object, or if the `object` itself
    /// is invalid.
    pub fn validate_aggregation(&self, object: &MaskObject) -> Result<(), AggregationError> {
        if self.object.vect.config != object.vect.config
            || self.object_size != object.vect.data.len()
        {
            Err(AggregationError::ModelMismatch)
        } else if self.object.unit.config != object.unit.config {
            Err(AggregationError::ScalarMismatch)
        } else if self.nb_models >= self.object.vect.config.model_type.max_nb_models() {
            Err(AggregationError::TooManyModels)
        } else if self.nb_models >= self.object.unit.config.model_type.max_nb_models() {
            Err(AggregationError::TooManyScalars)
        } else if !object.is_valid() {
            Err(AggregationError::InvalidObject)
        } else {
            Ok(())
        }
    }

    /// Aggregates the given `object` into the aggregate, element-wise modulo the group order.
    ///
    /// [`validate_aggregation()`] must succeed before calling this, otherwise the result is
    /// garbage.
    ///
    /// [`validate_aggregation()`]: Aggregation::validate_aggregation
    pub fn aggregate(&mut self, object: MaskObject) {
        if self.nb_models == 0 {
            self.object = object;
        } else {
            let order = self.object.vect.config.order();
            for (aggregated, new) in self.object.vect.data.iter_mut().zip(object.vect.data) {
                *aggregated = (&*aggregated + new) % &order;
            }

            let order = self.object.unit.config.order();
            let aggregated = &mut self.object.unit.data;
            *aggregated = (&*aggregated + object.unit.data) % order;
        }
        self.nb_models += 1;
    }
}

/// A masker for models.
pub struct Masker {
    config: MaskConfigPair,
    seed: MaskSeed,
}

impl Masker {
    /// Creates a new masker with the given masking `config`uration with a randomly generated
    /// seed.
    pub fn new(config: MaskConfigPair) -> Self {
        Self {
            config,
            seed: MaskSeed::generate(),
        }
    }

    /// Creates a new masker with the given masking `config`uration and `seed`.
    pub fn with_seed(config: MaskConfigPair, seed: MaskSeed) -> Self {
        Self { config, seed }
    }

    /// Masks the given `model` wrt the masking configuration.
    ///
    /// The scalar and the weights are clamped to the configured bounds, the weights are scaled
    /// by the scalar, shifted into the finite group, and masked with random group elements
    /// drawn from a PRNG seeded with the returned [`MaskSeed`]. The scalar is masked the same
    /// way under the unit configuration. [`MaskSeed::derive_mask`] re-derives the exact mask,
    /// and [`Aggregation::unmask`] reverts the whole procedure.
    pub fn mask(self, scalar: Scalar, model: &Model) -> (MaskSeed, MaskObject) {
        let Self { config, seed } = self;
        let mut prng = ChaCha20Rng::from_seed(seed.as_array());

        // the scalar mask comes first in the PRNG stream, mirrored by
        // MaskSeed::derive_mask
        let unit_order = config.unit.order();
        let unit_mask = generate_integer(&mut prng, &unit_order);

        let unit_shift = config.unit.add_shift();
        let scalar_ratio = scalar.to_ratio();
        let clamped_scalar = clamp_max(&scalar_ratio, &unit_shift);
        let masked_scalar =
            (embed(clamped_scalar, &unit_shift, &config.unit.exp_shift()) + unit_mask)
                % &unit_order;

        let vect_order = config.vect.order();
        let add_shift = config.vect.add_shift();
        let exp_shift = config.vect.exp_shift();
        let lower_bound = -&add_shift;
        let masked_weights = model
            .iter()
            .map(|weight| {
                let scaled = clamped_scalar * weight;
                let clamped = clamp(&scaled, &lower_bound, &add_shift);
                let embedded = embed(clamped, &add_shift, &exp_shift);
                (embedded + generate_integer(&mut prng, &vect_order)) % &vect_order
            })
            .collect();

        let object = MaskObject::new_unchecked(
            MaskVect::new_unchecked(config.vect, masked_weights),
            MaskUnit::new_unchecked(config.unit, masked_scalar),
        );
        (seed, object)
    }
}

#[cfg(test)]
mod tests {
    use num::traits::Signed;
    use rand::{
        distributions::{Distribution, Uniform},
        SeedableRng,
    };
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::mask::{
        config::{
            BoundType::{Bmax, B0, B2},
            DataType::{F32, F64, I32, I64},
            GroupType::{Integer, Power2, Prime},
            MaskConfig,
            ModelType::M3,
        },
        model::FromPrimitives,
    };

    /// Generates a masking/unmasking round-trip test for a single model:
    /// - generate random weights from a uniform distribution with a seeded PRNG
    /// - create a model from the weights and mask it
    /// - derive the mask corresponding to the seed used
    /// - unmask the masked model
    /// - check that the unmasked weights equal the original weights (up to a tolerance
    ///   determined by the masking configuration)
    ///
    /// The arguments to the macro are:
    /// - a suffix for the test name
    /// - the group type of the model (variants of `GroupType`)
    /// - the data type of the model (primitive type and variant of `DataType`)
    /// - an absolute bound for the weights and its `BoundType` variant
    /// - the number of weights
    macro_rules! test_masking {
        ($suffix:ident, $group:expr, $prim:ty, $data:expr, $bound:expr, $bound_type:expr, $len:expr $(,)?) => {
            paste::item! {
                #[test]
                fn [<test_masking_ $suffix>]() {
                    let config = MaskConfig {
                        group_type: $group,
                        data_type: $data,
                        bound_type: $bound_type,
                        model_type: M3,
                    };
                    let vect_len = $len as usize;

                    let mut prng = ChaCha20Rng::from_seed(MaskSeed::generate().as_array());
                    let random_weights = Uniform::new_inclusive(-$bound, $bound)
                        .sample_iter(&mut prng)
                        .take(vect_len)
                        .map(|w| w as $prim);
                    let model = Model::from_primitives(random_weights).unwrap();
                    assert_eq!(model.len(), vect_len);

                    let (mask_seed, masked_model) =
                        Masker::new(config.into()).mask(Scalar::unit(), &model);
                    assert_eq!(masked_model.vect.data.len(), vect_len);
                    assert!(masked_model.is_valid());

                    let mask = mask_seed.derive_mask(vect_len, config.into());
                    let aggregation = Aggregation::from(masked_model);
                    assert!(aggregation.validate_unmasking(&mask).is_ok());
                    let unmasked_model = aggregation.unmask(mask);

                    let tolerance = Ratio::from_integer(config.exp_shift()).recip();
                    assert!(
                        model.iter()
                            .zip(unmasked_model.iter())
                            .all(|(weight, unmasked_weight)| {
                                (weight - unmasked_weight).abs() <= tolerance
                            })
                    );
                }
            }
        };
    }

    test_masking!(int_f32_b0, Integer, f32, F32, 1_f64, B0, 10);
    test_masking!(prime_f32_b0, Prime, f32, F32, 1_f64, B0, 10);
    test_masking!(pow_f32_b0, Power2, f32, F32, 1_f64, B0, 10);
    test_masking!(prime_f32_b2, Prime, f32, F32, 100_f64, B2, 10);
    test_masking!(prime_f32_bmax, Prime, f32, F32, (f32::MAX / 2.5) as f64, Bmax, 10);
    test_masking!(int_f64_b0, Integer, f64, F64, 1_f64, B0, 10);
    test_masking!(prime_f64_b0, Prime, f64, F64, 1_f64, B0, 10);
    test_masking!(pow_f64_b2, Power2, f64, F64, 100_f64, B2, 10);
    test_masking!(prime_i32_b2, Prime, i32, I32, 100_i32, B2, 10);
    test_masking!(prime_i64_b2, Prime, i64, I64, 100_i64, B2, 10);

    fn config() -> MaskConfig {
        MaskConfig {
            group_type: Prime,
            data_type: F32,
            bound_type: B0,
            model_type: M3,
        }
    }

    fn random_model(len: usize, prng: &mut ChaCha20Rng) -> Model {
        Model::from_primitives(
            Uniform::new_inclusive(-1_f32, 1_f32)
                .sample_iter(prng)
                .take(len),
        )
        .unwrap()
    }

    #[test]
    fn test_aggregation_commutes() {
        // aggregating the same masked models in two different orders must
        // yield identical aggregates
        let config = config();
        let mut prng = ChaCha20Rng::from_seed([17_u8; 32]);
        let masked: Vec<MaskObject> = (0..5)
            .map(|_| {
                let model = random_model(10, &mut prng);
                Masker::new(config.into()).mask(Scalar::unit(), &model).1
            })
            .collect();

        let mut forward = Aggregation::new(config.into(), 10);
        for object in masked.iter() {
            assert!(forward.validate_aggregation(object).is_ok());
            forward.aggregate(object.clone());
        }

        let mut backward = Aggregation::new(config.into(), 10);
        for object in masked.iter().rev() {
            backward.aggregate(object.clone());
        }

        assert_eq!(forward.nb_models(), backward.nb_models());
        assert_eq!(
            MaskObject::from(forward),
            MaskObject::from(backward),
        );
    }

    #[test]
    fn test_masking_and_aggregation() {
        // mask a handful of scaled models, aggregate the masked models and
        // the masks, then unmask and compare against the weighted average
        let config = config();
        let model_count = 4_usize;
        let vect_len = 10_usize;
        let mut prng = ChaCha20Rng::from_seed([42_u8; 32]);

        let mut averaged_model = Model::from_primitives(vec![0_f32; vect_len].into_iter()).unwrap();
        let mut aggregated_masked_model = Aggregation::new(config.into(), vect_len);
        let mut aggregated_mask = Aggregation::new(config.into(), vect_len);
        let scalar = Scalar::new(1_u32, model_count as u32);
        let scalar_ratio = scalar.to_ratio();
        for _ in 0..model_count {
            let model = random_model(vect_len, &mut prng);
            averaged_model
                .iter_mut()
                .zip(model.iter())
                .for_each(|(averaged_weight, weight)| {
                    *averaged_weight += &scalar_ratio * weight;
                });

            let (mask_seed, masked_model) =
                Masker::new(config.into()).mask(scalar.clone(), &model);
            let mask = mask_seed.derive_mask(vect_len, config.into());

            assert!(aggregated_masked_model
                .validate_aggregation(&masked_model)
                .is_ok());
            aggregated_masked_model.aggregate(masked_model);
            assert!(aggregated_mask.validate_aggregation(&mask).is_ok());
            aggregated_mask.aggregate(mask);
        }

        let mask = aggregated_mask.into();
        assert!(aggregated_masked_model.validate_unmasking(&mask).is_ok());
        let unmasked_model = aggregated_masked_model.unmask(mask);
        let tolerance = Ratio::from_integer(BigInt::from(model_count))
            / Ratio::from_integer(config.exp_shift());
        assert!(averaged_model
            .iter()
            .zip(unmasked_model.iter())
            .all(|(averaged_weight, unmasked_weight)| {
                (averaged_weight - unmasked_weight).abs() <= tolerance
            }));
    }

    #[test]
    fn test_aggregation_rejects_mismatches() {
        let config = config();
        let aggregation = Aggregation::new(config.into(), 10);

        // length mismatch
        let mut prng = ChaCha20Rng::from_seed([3_u8; 32]);
        let model = random_model(7, &mut prng);
        let (_, masked) = Masker::new(config.into()).mask(Scalar::unit(), &model);
        assert!(matches!(
            aggregation.validate_aggregation(&masked),
            Err(AggregationError::ModelMismatch)
        ));

        // config mismatch
        let other = MaskConfig {
            data_type: F64,
            ..config
        };
        let model = random_model(10, &mut prng);
        let (_, masked) = Masker::new(other.into()).mask(Scalar::unit(), &model);
        assert!(matches!(
            aggregation.validate_aggregation(&masked),
            Err(AggregationError::ModelMismatch)
        ));
    }

    #[test]
    fn test_unmasking_requires_a_model() {
        let config = config();
        let aggregation = Aggregation::new(config.into(), 10);
        let mask = MaskSeed::generate().derive_mask(10, config.into());
        assert!(matches!(
            aggregation.validate_unmasking(&mask),
            Err(UnmaskingError::NoModel)
        ));
    }
}
