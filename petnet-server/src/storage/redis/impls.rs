//! Conversions between protocol types and Redis values.

use std::convert::TryFrom;

use redis::{ErrorKind, FromRedisValue, RedisError, RedisResult, RedisWrite, ToRedisArgs, Value};

use crate::storage::{
    LocalSeedDictAdd,
    LocalSeedDictAddError,
    MaskScoreIncr,
    MaskScoreIncrError,
    PhaseAdvance,
    PhaseAdvanceError,
    SumPartAdd,
    SumPartAddError,
};
use petnet_core::{
    crypto::{ByteObject, PublicEncryptKey, PublicSigningKey},
    mask::{EncryptedMaskSeed, MaskObject},
    LocalSeedDict,
};

fn redis_type_error(desc: &'static str, details: String) -> RedisError {
    RedisError::from((ErrorKind::TypeError, desc, details))
}

/// Reads a [`ByteObject`] out of a Redis reply.
fn from_data<O: ByteObject>(v: &Value, desc: &'static str) -> RedisResult<O> {
    match v {
        Value::Data(bytes) => O::from_slice(bytes).ok_or_else(|| {
            redis_type_error(desc, format!("invalid length {}", bytes.len()))
        }),
        _ => Err(redis_type_error(
            desc,
            format!("response type {:?} not convertible", v),
        )),
    }
}

/// Declares wrappers around a [`ByteObject`] so it can travel to Redis and
/// back as raw bytes: a `*Write` half for arguments and a `*Read` half for
/// replies. The read-only form skips the write half.
macro_rules! redis_byte_object {
    (@read $object:ty, $read:ident, $desc:expr) => {
        #[derive(Hash, Eq, PartialEq)]
        pub(crate) struct $read($object);

        impl From<$read> for $object {
            fn from(read: $read) -> Self {
                read.0
            }
        }

        impl ToRedisArgs for $read {
            fn write_redis_args<W: ?Sized + RedisWrite>(&self, out: &mut W) {
                self.0.as_slice().write_redis_args(out)
            }
        }

        impl FromRedisValue for $read {
            fn from_redis_value(v: &Value) -> RedisResult<Self> {
                from_data(v, $desc).map(Self)
            }
        }
    };
    ($object:ty, $write:ident, $read:ident, $desc:expr) => {
        pub(crate) struct $write($object);

        impl From<&$object> for $write {
            fn from(object: &$object) -> Self {
                Self(object.clone())
            }
        }

        impl ToRedisArgs for $write {
            fn write_redis_args<W: ?Sized + RedisWrite>(&self, out: &mut W) {
                self.0.as_slice().write_redis_args(out)
            }
        }

        redis_byte_object!(@read $object, $read, $desc);
    };
}

redis_byte_object!(
    PublicSigningKey,
    PublicSigningKeyWrite,
    PublicSigningKeyRead,
    "invalid public signing key"
);
redis_byte_object!(
    PublicEncryptKey,
    PublicEncryptKeyWrite,
    PublicEncryptKeyRead,
    "invalid public encryption key"
);
// seeds are only ever read back out of the per-participant hashes
redis_byte_object!(@read EncryptedMaskSeed, EncryptedMaskSeedRead, "invalid encrypted mask seed");

/// A local seed dictionary flattened into `[sum_pk, seed, sum_pk, seed, ...]` script keys.
pub(crate) struct LocalSeedDictWrite<'a>(&'a LocalSeedDict);

impl<'a> From<&'a LocalSeedDict> for LocalSeedDictWrite<'a> {
    fn from(dict: &'a LocalSeedDict) -> Self {
        Self(dict)
    }
}

impl ToRedisArgs for LocalSeedDictWrite<'_> {
    fn write_redis_args<W: ?Sized + RedisWrite>(&self, out: &mut W) {
        for (sum_pk, seed) in self.0.iter() {
            sum_pk.as_slice().write_redis_args(out);
            seed.as_slice().write_redis_args(out);
        }
    }

    fn is_single_arg(&self) -> bool {
        false
    }
}

/// A mask object on its way into Redis, encoded with bincode.
pub(crate) struct MaskObjectWrite(Vec<u8>);

impl From<&MaskObject> for MaskObjectWrite {
    fn from(mask: &MaskObject) -> Self {
        // safe unwrap: serialization of a mask object never fails
        Self(bincode::serialize(mask).unwrap())
    }
}

impl ToRedisArgs for MaskObjectWrite {
    fn write_redis_args<W: ?Sized + RedisWrite>(&self, out: &mut W) {
        self.0.as_slice().write_redis_args(out)
    }
}

/// A mask object read back from Redis.
pub(crate) struct MaskObjectRead(MaskObject);

impl From<MaskObjectRead> for MaskObject {
    fn from(read: MaskObjectRead) -> Self {
        read.0
    }
}

impl FromRedisValue for MaskObjectRead {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        match v {
            Value::Data(bytes) => bincode::deserialize(bytes).map(Self).map_err(|e| {
                redis_type_error(
                    "invalid mask object",
                    format!("deserialization failed: {}", e),
                )
            }),
            _ => Err(redis_type_error(
                "invalid mask object",
                format!("response type {:?} not convertible", v),
            )),
        }
    }
}

/// Decodes the integer status code of a protocol script into a result
/// wrapper: `0` means success, negative codes map to the typed error.
macro_rules! redis_script_status {
    ($wrapper:ty, $error:ty, $desc:expr) => {
        impl FromRedisValue for $wrapper {
            fn from_redis_value(v: &Value) -> RedisResult<Self> {
                match v {
                    Value::Int(0) => Ok(Self(Ok(()))),
                    Value::Int(code) => <$error>::try_from(*code)
                        .map(|err| Self(Err(err)))
                        .map_err(|_| {
                            redis_type_error($desc, format!("unknown status code {}", code))
                        }),
                    _ => Err(redis_type_error(
                        $desc,
                        format!("response type {:?} not convertible", v),
                    )),
                }
            }
        }
    };
}

redis_script_status!(
    LocalSeedDictAdd,
    LocalSeedDictAddError,
    "invalid local seed dict update status"
);
redis_script_status!(
    MaskScoreIncr,
    MaskScoreIncrError,
    "invalid mask score increment status"
);
redis_script_status!(
    PhaseAdvance,
    PhaseAdvanceError,
    "invalid phase advance status"
);

// HSETNX returns 1 if the field is new, 0 if it already exists.
impl FromRedisValue for SumPartAdd {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        match v {
            Value::Int(1) => Ok(Self(Ok(()))),
            Value::Int(0) => Ok(Self(Err(SumPartAddError::AlreadyExists))),
            _ => Err(redis_type_error(
                "invalid sum participant addition status",
                format!("response type {:?} not convertible", v),
            )),
        }
    }
}
