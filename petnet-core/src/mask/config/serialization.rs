//! Serialization of masking configurations.
//!
//! See the [mask module] documentation since this is a private module anyways.
//!
//! [mask module]: crate::mask

use std::convert::TryInto;

use anyhow::{anyhow, Context};

use crate::{
    mask::config::MaskConfig,
    message::{
        traits::{FromBytes, ToBytes},
        DecodeError,
    },
};

/// The number of bytes of a serialized masking configuration: one byte per
/// enumerated choice, in the order group, data, bound, model type.
pub(crate) const MASK_CONFIG_LENGTH: usize = 4;

impl ToBytes for MaskConfig {
    fn buffer_length(&self) -> usize {
        MASK_CONFIG_LENGTH
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) {
        buffer.as_mut()[..MASK_CONFIG_LENGTH].copy_from_slice(&[
            self.group_type as u8,
            self.data_type as u8,
            self.bound_type as u8,
            self.model_type as u8,
        ]);
    }
}

impl FromBytes for MaskConfig {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        match buffer.as_ref() {
            [group_type, data_type, bound_type, model_type, ..] => Ok(Self {
                group_type: (*group_type).try_into().context("invalid group type")?,
                data_type: (*data_type).try_into().context("invalid data type")?,
                bound_type: (*bound_type).try_into().context("invalid bound type")?,
                model_type: (*model_type).try_into().context("invalid model type")?,
            }),
            short => Err(anyhow!(
                "invalid masking configuration: {} < {} bytes",
                short.len(),
                MASK_CONFIG_LENGTH
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::config::{BoundType, DataType, GroupType, MaskConfig, ModelType};

    fn config() -> MaskConfig {
        MaskConfig {
            group_type: GroupType::Prime,
            data_type: DataType::F64,
            bound_type: BoundType::Bmax,
            model_type: ModelType::M9,
        }
    }

    #[test]
    fn serialize() {
        let mut buf = vec![0xff; 4];
        config().to_bytes(&mut buf);
        assert_eq!(buf, vec![1, 1, 255, 9]);
    }

    #[test]
    fn deserialize() {
        assert_eq!(
            MaskConfig::from_byte_slice(&vec![1, 1, 255, 9]).unwrap(),
            config(),
        );
    }

    #[test]
    fn deserialize_invalid() {
        // unknown group type
        assert!(MaskConfig::from_byte_slice(&vec![7, 1, 255, 9]).is_err());
        // truncated
        assert!(MaskConfig::from_byte_slice(&vec![1, 1, 255]).is_err());
    }
}
