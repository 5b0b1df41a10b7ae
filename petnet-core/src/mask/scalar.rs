//! Scalar representation and conversion.
//!
//! See the [mask module] documentation since this is a private module anyways.
//!
//! [mask module]: crate::mask

use std::convert::{TryFrom, TryInto};

use derive_more::{From, Into};
use num::{
    clamp,
    rational::Ratio,
    traits::float::FloatCore,
    BigInt,
    BigUint,
    One,
    Unsigned,
    Zero,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mask::model::{ratio_to_float, PrimitiveType};

#[derive(Debug, Clone, PartialEq, Hash, From, Into, Serialize, Deserialize)]
/// The non-negative weight with which a participant scales its update.
pub struct Scalar(Ratio<BigUint>);

impl From<Scalar> for Ratio<BigInt> {
    fn from(scalar: Scalar) -> Self {
        let (numer, denom) = scalar.0.into();
        Ratio::new(numer.into(), denom.into())
    }
}

impl TryFrom<Ratio<BigInt>> for Scalar {
    type Error = <BigUint as TryFrom<BigInt>>::Error;

    fn try_from(ratio: Ratio<BigInt>) -> Result<Self, Self::Error> {
        let (numer, denom) = ratio.into();
        Ok(Self(Ratio::new(numer.try_into()?, denom.try_into()?)))
    }
}

impl Scalar {
    /// Constructs a new `Scalar` from the given numerator and denominator.
    pub fn new<U>(numer: U, denom: U) -> Self
    where
        U: Unsigned + Into<BigUint>,
    {
        Self(Ratio::new(numer.into(), denom.into()))
    }

    /// Constructs a `Scalar` representing the given integer.
    pub fn from_integer<U>(u: U) -> Self
    where
        U: Unsigned + Into<BigUint>,
    {
        Self(Ratio::from_integer(u.into()))
    }

    /// Constructs a `Scalar` of unit value.
    pub fn unit() -> Self {
        Self(Ratio::one())
    }

    /// Convenience method for conversion to a non-negative ratio of `BigInt`.
    pub(crate) fn to_ratio(&self) -> Ratio<BigInt> {
        self.clone().into()
    }

    /// Constructs a `Scalar` from a primitive floating point value, clamped where necessary.
    ///
    /// Maps positive infinity to max of the primitive data type, negatives and NaN to zero.
    pub(crate) fn from_float_bounded<F: FloatCore>(f: F) -> Self {
        if f.is_nan() {
            Self(Ratio::zero())
        } else {
            let finite_f = clamp(f, F::zero(), F::max_value());
            // safe unwraps: the clamped value is finite and non-negative
            Ratio::from_float(finite_f).unwrap().try_into().unwrap()
        }
    }
}

#[derive(Error, Debug)]
#[error("Could not convert scalar {scalar} to primitive type {target}")]
/// Errors related to scalar conversion into primitives.
pub struct ScalarCastError {
    scalar: Ratio<BigUint>,
    target: PrimitiveType,
}

/// An interface for conversion of a [`Scalar`] into a primitive value.
pub trait IntoPrimitive<P>: Sized {
    /// Consumes into a converted primitive value.
    ///
    /// # Errors
    /// Returns an error if the conversion fails.
    fn into_primitive(self) -> Result<P, ScalarCastError>;
}

/// An interface for conversion of a primitive value into a [`Scalar`].
pub trait FromPrimitive<P>: Sized {
    /// Converts from a primitive value.
    ///
    /// # Errors
    /// Returns an error if the primitive value is not finite or negative.
    fn from_primitive(p: P) -> Result<Self, P>;

    /// Converts from a primitive value, clamping non-finite and negative values.
    fn from_primitive_bounded(p: P) -> Self;
}

macro_rules! impl_scalar_float_conversions {
    ($prim:ty, $target:ident) => {
        impl IntoPrimitive<$prim> for Scalar {
            fn into_primitive(self) -> Result<$prim, ScalarCastError> {
                let ratio = self.to_ratio();
                ratio_to_float::<$prim>(&ratio).ok_or(ScalarCastError {
                    scalar: self.0,
                    target: PrimitiveType::$target,
                })
            }
        }

        impl FromPrimitive<$prim> for Scalar {
            fn from_primitive(p: $prim) -> Result<Self, $prim> {
                if p.is_finite() && p >= 0.0 {
                    // safe unwraps: the value is finite and non-negative
                    Ok(Ratio::from_float(p).unwrap().try_into().unwrap())
                } else {
                    Err(p)
                }
            }

            fn from_primitive_bounded(p: $prim) -> Self {
                Self::from_float_bounded(p)
            }
        }
    };
}

impl_scalar_float_conversions!(f32, F32);
impl_scalar_float_conversions!(f64, F64);
