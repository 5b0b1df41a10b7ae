//! Masking, aggregation and unmasking of models.
//!
//! # Models
//! A [`Model`] is a collection of weights represented as rational numbers of
//! arbitrary precision, so no information is lost before masking. Models can
//! be created from and converted back into the primitive types [`f32`],
//! [`f64`], [`i32`] and [`i64`].
//!
//! # Masking configurations
//! A [`MaskConfig`] fixes the finite group in which masked weights live. It
//! consists of four enumerated choices:
//!
//! - [`GroupType`]: the order of the finite group (`Integer`, `Prime` or
//!   `Power2`), trading a smaller gap between the largest embedded weight and
//!   the group order against arithmetic performance.
//! - [`DataType`]: the original primitive data type of the weights, which
//!   determines how many decimal places survive the fixed-point embedding.
//! - [`BoundType`]: the absolute bound enforced on the weights before
//!   masking (`1`, `100`, `10^4`, `10^6` or the data type's maximum).
//! - [`ModelType`]: the maximum number of models that may be aggregated
//!   without wrapping (`10^3` up to `10^12`).
//!
//! A [`MaskConfigPair`] carries one configuration for the model vector and
//! one for the masked scalar that travels with it.
//!
//! # Masking, aggregation and unmasking
//! A [`Masker`] embeds the scaled, clamped weights into the configured group
//! and adds a pseudo-random group element per weight, derived from a fresh
//! [`MaskSeed`]. The seed is what update participants seal to the sum
//! participants; re-expanding it with [`MaskSeed::derive_mask`] yields the
//! exact mask again.
//!
//! Masked models are combined with an [`Aggregation`], which performs
//! element-wise modular addition; the same type also combines masks. Since
//! addition in the group is commutative and associative, the arrival order of
//! the contributions is irrelevant. Once the aggregated mask is known, the
//! aggregated masked model is unmasked with [`Aggregation::unmask`], which
//! subtracts the mask, inverts the fixed-point embedding and divides by the
//! unmasked scalar sum.
//!
//! ```
//! # use petnet_core::mask::{
//! #     Aggregation, BoundType, DataType, FromPrimitives, GroupType, IntoPrimitives, MaskConfig,
//! #     Masker, Model, ModelType, Scalar,
//! # };
//! let config = MaskConfig {
//!     group_type: GroupType::Prime,
//!     data_type: DataType::F32,
//!     bound_type: BoundType::B0,
//!     model_type: ModelType::M3,
//! };
//! let model = Model::from_primitives_bounded(vec![0.5_f32; 4].into_iter());
//!
//! let (seed, masked) = Masker::new(config.into()).mask(Scalar::unit(), &model);
//! let mask = seed.derive_mask(4, config.into());
//!
//! let aggregation = Aggregation::from(masked);
//! assert!(aggregation.validate_unmasking(&mask).is_ok());
//! let unmasked = aggregation.unmask(mask);
//! let weights: Vec<f32> = unmasked.into_primitives_unchecked().collect();
//! assert!(weights.iter().all(|w| (w - 0.5).abs() < 1e-9));
//! ```

pub(crate) mod config;
pub(crate) mod masking;
pub(crate) mod model;
pub(crate) mod object;
pub(crate) mod scalar;
pub(crate) mod seed;

pub use self::{
    config::{
        BoundType,
        DataType,
        GroupType,
        InvalidMaskConfigError,
        MaskConfig,
        MaskConfigPair,
        ModelType,
    },
    masking::{Aggregation, AggregationError, Masker, UnmaskingError},
    model::{FromPrimitives, IntoPrimitives, Model, ModelCastError, PrimitiveCastError},
    object::{InvalidMaskObjectError, MaskObject, MaskUnit, MaskVect},
    scalar::{FromPrimitive, IntoPrimitive, Scalar, ScalarCastError},
    seed::{EncryptedMaskSeed, MaskSeed},
};
