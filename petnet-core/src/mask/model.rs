//! Model representation and conversion.
//!
//! See the [mask module] documentation since this is a private module anyways.
//!
//! [mask module]: crate::mask

use std::{
    fmt::Debug,
    iter::FromIterator,
    ops::{Deref, DerefMut},
};

use derive_more::{Display, From, Into};
use num::{
    bigint::BigInt,
    clamp,
    rational::Ratio,
    traits::{float::FloatCore, identities::Zero, ToPrimitive},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A numerical representation of a machine learning model.
///
/// The weights are kept as exact rationals of arbitrary precision, so no
/// information is lost between training and the fixed-point embedding.
#[derive(Debug, Clone, PartialEq, Hash, From, Into, Serialize, Deserialize)]
pub struct Model(Vec<Ratio<BigInt>>);

impl Deref for Model {
    type Target = [Ratio<BigInt>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Model {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Ratio<BigInt>> for Model {
    fn from_iter<I: IntoIterator<Item = Ratio<BigInt>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Model {
    type Item = Ratio<BigInt>;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Debug, Display)]
/// A primitive data type as a target for model conversion.
pub(crate) enum PrimitiveType {
    F32,
    F64,
    I32,
    I64,
}

#[derive(Error, Debug)]
#[error("Could not convert weight {weight} to primitive type {target}")]
/// Errors related to model conversion into primitives.
pub struct ModelCastError {
    pub(crate) weight: Ratio<BigInt>,
    pub(crate) target: PrimitiveType,
}

#[derive(Clone, Error, Debug)]
#[error("Could not convert primitive type {0:?} to weight")]
/// Errors related to weight conversion from primitives.
pub struct PrimitiveCastError<P: Debug>(pub(crate) P);

/// An interface to convert a [`Model`] into an iterator of primitive values
/// ([`f32`], [`f64`], [`i32`], [`i64`]). The opposite trait is
/// [`FromPrimitives`].
pub trait IntoPrimitives<P: 'static>: Sized {
    /// Creates an iterator that yields converted primitive values.
    ///
    /// # Errors
    /// Yields an error for each weight that can't be represented in the primitive type.
    fn into_primitives(self) -> Box<dyn Iterator<Item = Result<P, ModelCastError>>>;

    /// Consumes this model into an iterator that yields `P` values.
    ///
    /// # Panics
    /// Panics if a weight can't be represented in the primitive type.
    fn into_primitives_unchecked(self) -> Box<dyn Iterator<Item = P>> {
        Box::new(
            self.into_primitives()
                .map(|res| res.expect("conversion to primitive type failed")),
        )
    }
}

/// An interface to convert an iterator of primitive values ([`f32`], [`f64`],
/// [`i32`], [`i64`]) into a [`Model`]. The opposite trait is
/// [`IntoPrimitives`].
pub trait FromPrimitives<P: Debug>: Sized {
    /// Collects a model from primitive values.
    ///
    /// # Errors
    /// Fails on the first primitive value that is not finite.
    fn from_primitives<I: Iterator<Item = P>>(iter: I) -> Result<Self, PrimitiveCastError<P>>;

    /// Collects a model from primitive values, clamping values that are not finite.
    fn from_primitives_bounded<I: Iterator<Item = P>>(iter: I) -> Self;
}

macro_rules! impl_integer_conversions {
    ($prim:ty, $to_prim:ident, $target:ident) => {
        impl IntoPrimitives<$prim> for Model {
            fn into_primitives(self) -> Box<dyn Iterator<Item = Result<$prim, ModelCastError>>> {
                Box::new(self.0.into_iter().map(|weight| {
                    let converted = weight.to_integer().$to_prim();
                    converted.ok_or(ModelCastError {
                        weight,
                        target: PrimitiveType::$target,
                    })
                }))
            }
        }

        impl FromPrimitives<$prim> for Model {
            fn from_primitives<I: Iterator<Item = $prim>>(
                iter: I,
            ) -> Result<Self, PrimitiveCastError<$prim>> {
                Ok(iter.map(|p| Ratio::from_integer(BigInt::from(p))).collect())
            }

            fn from_primitives_bounded<I: Iterator<Item = $prim>>(iter: I) -> Self {
                // integers are always finite
                Self::from_primitives(iter).unwrap()
            }
        }
    };
}

impl_integer_conversions!(i32, to_i32, I32);
impl_integer_conversions!(i64, to_i64, I64);

macro_rules! impl_float_conversions {
    ($prim:ty, $target:ident) => {
        impl IntoPrimitives<$prim> for Model {
            fn into_primitives(self) -> Box<dyn Iterator<Item = Result<$prim, ModelCastError>>> {
                Box::new(self.0.into_iter().map(|weight| {
                    ratio_to_float::<$prim>(&weight).ok_or(ModelCastError {
                        weight,
                        target: PrimitiveType::$target,
                    })
                }))
            }
        }

        impl FromPrimitives<$prim> for Model {
            fn from_primitives<I: Iterator<Item = $prim>>(
                iter: I,
            ) -> Result<Self, PrimitiveCastError<$prim>> {
                iter.map(|f| Ratio::from_float(f).ok_or(PrimitiveCastError(f)))
                    .collect()
            }

            fn from_primitives_bounded<I: Iterator<Item = $prim>>(iter: I) -> Self {
                iter.map(float_to_ratio_bounded::<$prim>).collect()
            }
        }
    };
}

impl_float_conversions!(f32, F32);
impl_float_conversions!(f64, F64);

/// Converts a rational number into a primitive floating point value.
///
/// Ratios whose terms are too large for the primitive type are shrunk until
/// both terms convert; halving numerator and denominator together preserves
/// the quotient.
///
/// # Errors
/// Fails if the rational number is outside the range of the primitive type.
pub(crate) fn ratio_to_float<F: FloatCore>(ratio: &Ratio<BigInt>) -> Option<F> {
    // safe unwraps: the float extrema are finite
    if ratio < &Ratio::from_float(F::min_value()).unwrap()
        || ratio > &Ratio::from_float(F::max_value()).unwrap()
    {
        return None;
    }

    let mut numer = ratio.numer().clone();
    let mut denom = ratio.denom().clone();
    // terminates after at most the bit-length of the ratio iterations
    loop {
        match (F::from(numer.clone()), F::from(denom.clone())) {
            (Some(n), Some(d)) if n != F::zero() && d != F::zero() => {
                let float = n / d;
                if float.is_finite() {
                    break Some(float);
                }
            }
            (Some(_), Some(_)) => break Some(F::zero()),
            _ => {}
        }
        numer >>= 1_usize;
        denom >>= 1_usize;
    }
}

/// Converts a primitive floating point value into a rational number.
///
/// Maps positive/negative infinity to the maximum/minimum of the primitive
/// type and NaN to zero.
pub(crate) fn float_to_ratio_bounded<F: FloatCore>(f: F) -> Ratio<BigInt> {
    if f.is_nan() {
        Ratio::zero()
    } else {
        // safe unwrap: the clamped value is finite
        Ratio::from_float(clamp(f, F::min_value(), F::max_value())).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use std::iter;

    use super::*;

    type R = Ratio<BigInt>;

    macro_rules! test_roundtrip {
        ($name:ident, $prim:ty, $values:expr) => {
            #[test]
            fn $name() {
                let values: Vec<$prim> = $values;
                let model = Model::from_primitives(values.iter().cloned()).unwrap();
                assert_eq!(model.len(), values.len());
                assert_eq!(
                    model,
                    Model::from_primitives_bounded(values.iter().cloned()),
                );

                let back: Vec<$prim> = model.into_primitives_unchecked().collect();
                assert_eq!(back, values);
            }
        };
    }

    test_roundtrip!(test_roundtrip_f32, f32, vec![-1.5_f32, 0.0, 0.1, 1.0]);
    test_roundtrip!(test_roundtrip_f64, f64, vec![-1.5_f64, 0.0, 0.1, 1.0]);
    test_roundtrip!(test_roundtrip_i32, i32, vec![i32::MIN, -1, 0, 1, i32::MAX]);
    test_roundtrip!(test_roundtrip_i64, i64, vec![i64::MIN, -1, 0, 1, i64::MAX]);

    #[test]
    fn test_from_weird_floats() {
        // +/- infinity clamp to the extrema
        assert!(Model::from_primitives(iter::once(f32::INFINITY)).is_err());
        assert_eq!(
            Model::from_primitives_bounded(iter::once(f32::INFINITY)),
            vec![R::from_float(f32::MAX).unwrap()].into(),
        );
        assert!(Model::from_primitives(iter::once(f32::NEG_INFINITY)).is_err());
        assert_eq!(
            Model::from_primitives_bounded(iter::once(f32::NEG_INFINITY)),
            vec![R::from_float(f32::MIN).unwrap()].into(),
        );

        // NaN clamps to zero
        assert!(Model::from_primitives(iter::once(f64::NAN)).is_err());
        assert_eq!(
            Model::from_primitives_bounded(iter::once(f64::NAN)),
            vec![R::zero()].into(),
        );
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_ratio_to_float_shrinks_large_terms() {
        // numerator and denominator saturate an f32 individually, but their
        // quotient is perfectly representable
        let f32_max = R::from_float(f32::max_value()).unwrap();
        let ratio = &f32_max * BigInt::from(10) / (f32_max * BigInt::from(100));
        assert_eq!(ratio_to_float::<f32>(&ratio).unwrap(), 0.1_f32);
    }

    #[test]
    fn test_ratio_to_float_out_of_range() {
        let too_big = R::from_float(f64::MAX).unwrap() * BigInt::from(2);
        assert!(ratio_to_float::<f32>(&too_big).is_none());
    }
}
