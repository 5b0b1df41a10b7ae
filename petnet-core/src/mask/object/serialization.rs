//! Serialization of masked objects.
//!
//! A serialized [`MaskVect`] consists of the 4 byte masking configuration, a
//! big-endian `u32` element count, and the elements themselves, each encoded
//! in little-endian over the fixed number of bytes dictated by the
//! configuration. A serialized [`MaskUnit`] is the configuration followed by
//! a single element. A serialized [`MaskObject`] is the vector part followed
//! by the unit part.
//!
//! See the [mask module] documentation since this is a private module anyways.
//!
//! [mask module]: crate::mask

use std::convert::TryInto;

use anyhow::{anyhow, Context};
use num::bigint::BigUint;

use crate::{
    mask::{
        config::{serialization::MASK_CONFIG_LENGTH, MaskConfig},
        object::{MaskObject, MaskUnit, MaskVect},
    },
    message::{
        traits::{FromBytes, ToBytes},
        DecodeError,
    },
};

/// The number of bytes of the element count field.
const NUMBERS_LENGTH: usize = 4;
const VECT_HEADER_LENGTH: usize = MASK_CONFIG_LENGTH + NUMBERS_LENGTH;

// Little-endian with zero padding. Panics if the element does not fit the
// slot, which only happens for data that violates its configuration.
fn write_element(element: &BigUint, slot: &mut [u8]) {
    let bytes = element.to_bytes_le();
    slot[..bytes.len()].copy_from_slice(&bytes);
    for byte in slot.iter_mut().skip(bytes.len()) {
        *byte = 0;
    }
}

impl ToBytes for MaskVect {
    fn buffer_length(&self) -> usize {
        VECT_HEADER_LENGTH + self.config.bytes_per_number() * self.data.len()
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) {
        let buffer = buffer.as_mut();
        self.config.to_bytes(&mut &mut buffer[..MASK_CONFIG_LENGTH]);
        buffer[MASK_CONFIG_LENGTH..VECT_HEADER_LENGTH]
            .copy_from_slice(&(self.data.len() as u32).to_be_bytes());

        let width = self.config.bytes_per_number();
        let mut rest = &mut buffer[VECT_HEADER_LENGTH..];
        for element in &self.data {
            let (slot, tail) = rest.split_at_mut(width);
            write_element(element, slot);
            rest = tail;
        }
    }
}

impl FromBytes for MaskVect {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let bytes = buffer.as_ref();
        if bytes.len() < VECT_HEADER_LENGTH {
            return Err(anyhow!("mask vector too short: {} bytes", bytes.len()));
        }
        let config =
            MaskConfig::from_byte_slice(&bytes).context("invalid mask vector configuration")?;
        // safe unwrap: the slice is exactly 4 bytes long
        let numbers = u32::from_be_bytes(
            bytes[MASK_CONFIG_LENGTH..VECT_HEADER_LENGTH].try_into().unwrap(),
        ) as usize;

        let width = config.bytes_per_number();
        let data_length = numbers
            .checked_mul(width)
            .ok_or_else(|| anyhow!("invalid mask vector element count"))?;
        let data = bytes
            .get(VECT_HEADER_LENGTH..VECT_HEADER_LENGTH + data_length)
            .ok_or_else(|| anyhow!("mask vector truncated"))?
            .chunks(width)
            .map(BigUint::from_bytes_le)
            .collect();

        MaskVect::new(config, data).context("invalid mask vector elements")
    }
}

impl ToBytes for MaskUnit {
    fn buffer_length(&self) -> usize {
        MASK_CONFIG_LENGTH + self.config.bytes_per_number()
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) {
        let width = self.config.bytes_per_number();
        let buffer = buffer.as_mut();
        self.config.to_bytes(&mut &mut buffer[..MASK_CONFIG_LENGTH]);
        write_element(
            &self.data,
            &mut buffer[MASK_CONFIG_LENGTH..MASK_CONFIG_LENGTH + width],
        );
    }
}

impl FromBytes for MaskUnit {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let bytes = buffer.as_ref();
        let config =
            MaskConfig::from_byte_slice(&bytes).context("invalid mask unit configuration")?;
        let width = config.bytes_per_number();
        let data = bytes
            .get(MASK_CONFIG_LENGTH..MASK_CONFIG_LENGTH + width)
            .map(BigUint::from_bytes_le)
            .ok_or_else(|| anyhow!("mask unit truncated"))?;

        MaskUnit::new(config, data).context("invalid mask unit element")
    }
}

impl ToBytes for MaskObject {
    fn buffer_length(&self) -> usize {
        self.vect.buffer_length() + self.unit.buffer_length()
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) {
        let split = self.vect.buffer_length();
        self.vect.to_bytes(&mut &mut buffer.as_mut()[..split]);
        self.unit.to_bytes(&mut &mut buffer.as_mut()[split..]);
    }
}

impl FromBytes for MaskObject {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let bytes = buffer.as_ref();
        let vect = MaskVect::from_byte_slice(&bytes).context("invalid vector part")?;
        let unit = MaskUnit::from_byte_slice(&&bytes[vect.buffer_length()..])
            .context("invalid unit part")?;
        Ok(Self { vect, unit })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mask::config::{BoundType, DataType, GroupType, MaskConfig, ModelType};

    pub(crate) fn mask_config() -> (Vec<u8>, MaskConfig) {
        // config.order() = 20_000_000_000_021, so 6 bytes per number
        let config = MaskConfig {
            group_type: GroupType::Prime,
            data_type: DataType::F32,
            bound_type: BoundType::B0,
            model_type: ModelType::M3,
        };
        (vec![1, 0, 0, 3], config)
    }

    pub(crate) fn mask_object() -> (Vec<u8>, MaskObject) {
        let (config_bytes, config) = mask_config();

        let mut bytes = vec![];
        // vector part
        bytes.extend(&config_bytes);
        bytes.extend(&2_u32.to_be_bytes());
        bytes.extend(&[
            0x01, 0x02, 0x00, 0x00, 0x00, 0x00, // 513
            0x04, 0x05, 0x00, 0x00, 0x00, 0x00, // 1284
        ]);
        // unit part
        bytes.extend(&config_bytes);
        bytes.extend(&[0x07, 0x00, 0x00, 0x00, 0x00, 0x00]); // 7

        let data = vec![BigUint::from(513_u16), BigUint::from(1284_u16)];
        let vect = MaskVect::new(config, data).unwrap();
        let unit = MaskUnit::new(config, BigUint::from(7_u8)).unwrap();
        (bytes, MaskObject::new_unchecked(vect, unit))
    }

    #[test]
    fn serialize_mask_object() {
        let (bytes, obj) = mask_object();
        assert_eq!(obj.buffer_length(), bytes.len());
        let mut buf = vec![0xff; obj.buffer_length()];
        obj.to_bytes(&mut buf);
        assert_eq!(buf, bytes);
    }

    #[test]
    fn deserialize_mask_object() {
        let (bytes, expected) = mask_object();
        assert_eq!(MaskObject::from_byte_slice(&bytes).unwrap(), expected);
    }

    #[test]
    fn deserialize_mask_object_truncated() {
        let (bytes, _) = mask_object();
        assert!(MaskObject::from_byte_slice(&&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn deserialize_mask_vect_out_of_range_element() {
        let (config_bytes, _) = mask_config();
        let mut bytes = vec![];
        bytes.extend(&config_bytes);
        bytes.extend(&1_u32.to_be_bytes());
        // 0xffff_ffff_ffff exceeds the group order
        bytes.extend(&[0xff; 6]);
        assert!(MaskVect::from_byte_slice(&bytes).is_err());
    }
}
