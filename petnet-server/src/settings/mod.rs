//! Loading and validation of settings.
//!
//! Settings are read from a TOML file; each section corresponds to the
//! identically named field of [`Settings`]. Every value can be overridden
//! with a `PETNET_`-prefixed environment variable, with `__` separating the
//! sections, e.g. `PETNET_PET__SUM__COUNT__MIN=10`.

use std::path::Path;

use config::{Config, ConfigError, Environment};
use redis::{ConnectionInfo, IntoConnectionInfo};
use serde::{de, Deserialize, Deserializer};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use petnet_core::mask::{BoundType, DataType, GroupType, MaskConfig, ModelType};

/// The smallest number of sum participants the protocol can run with.
const SUM_COUNT_MIN: u64 = 1;

/// The smallest number of update participants that still hides an individual
/// contribution inside the aggregate.
const UPDATE_COUNT_MIN: u64 = 3;

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
pub struct Settings {
    /// The transport surface settings, consumed by the external transport.
    pub api: ApiSettings,
    #[validate]
    /// The PET protocol settings.
    pub pet: PetSettings,
    /// The masking settings.
    pub mask: MaskSettings,
    /// The model settings.
    pub model: ModelSettings,
    /// The logging settings.
    pub log: LoggingSettings,
    /// The Redis settings.
    pub redis: RedisSettings,
    #[serde(default)]
    /// The restore settings.
    pub restore: RestoreSettings,
}

impl Settings {
    /// Loads and validates the settings from the configuration file at `path`.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("petnet").separator("__"))?;
        config.try_into()
    }
}

/// The minimal and maximal number of participant messages accepted in a phase.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PetSettingsCount {
    /// The minimal number of messages.
    pub min: u64,
    /// The maximal number of messages.
    pub max: u64,
}

/// The minimal and maximal amount of time (in seconds) reserved for a phase.
///
/// Once the minimal time has passed, the phase ends as soon as its minimal
/// message count is reached; it fails if the count is not reached before the
/// maximal time elapses.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PetSettingsTime {
    /// The minimal amount of time.
    pub min: u64,
    /// The maximal amount of time.
    pub max: u64,
}

/// The sum phase settings.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PetSettingsSum {
    /// The probability of a participant to be selected for the sum task.
    /// Must satisfy `0 < prob < 1`.
    pub prob: f64,
    /// The message count bounds; `count.min` must be at least 1.
    pub count: PetSettingsCount,
    /// The phase duration bounds.
    pub time: PetSettingsTime,
}

/// The update phase settings.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PetSettingsUpdate {
    /// The probability of a participant to be selected for the update task.
    /// Must satisfy `0 < prob <= 1`; `1` expresses that every participant
    /// which is not a sum participant is an update participant.
    pub prob: f64,
    /// The message count bounds; `count.min` must be at least 3.
    pub count: PetSettingsCount,
    /// The phase duration bounds.
    pub time: PetSettingsTime,
}

/// The sum2 phase settings.
///
/// Only registered sum participants can submit in the sum2 phase, so the
/// counts are additionally capped by the sum phase ceiling.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PetSettingsSum2 {
    /// The message count bounds.
    pub count: PetSettingsCount,
    /// The phase duration bounds.
    pub time: PetSettingsTime,
}

/// The PET protocol settings.
#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_pet"))]
pub struct PetSettings {
    /// The settings of the sum phase.
    pub sum: PetSettingsSum,
    /// The settings of the update phase.
    pub update: PetSettingsUpdate,
    /// The settings of the sum2 phase.
    pub sum2: PetSettingsSum2,
}

fn ordered(min: u64, max: u64) -> bool {
    min <= max
}

/// Checks the PET settings: count floors and orderings, time orderings, and
/// the selection probabilities.
fn validate_pet(settings: &PetSettings) -> Result<(), ValidationError> {
    let PetSettings { sum, update, sum2 } = settings;

    let counts_valid = sum.count.min >= SUM_COUNT_MIN
        && update.count.min >= UPDATE_COUNT_MIN
        && sum2.count.min >= SUM_COUNT_MIN
        && ordered(sum.count.min, sum.count.max)
        && ordered(update.count.min, update.count.max)
        && ordered(sum2.count.min, sum2.count.max)
        && sum2.count.max <= sum.count.max;
    if !counts_valid {
        return Err(ValidationError::new("invalid phase count range(s)"));
    }

    if !(ordered(sum.time.min, sum.time.max)
        && ordered(update.time.min, update.time.max)
        && ordered(sum2.time.min, sum2.time.max))
    {
        return Err(ValidationError::new("invalid phase time range(s)"));
    }

    // the chance to be selected for neither task must stay below 1, else the
    // rounds starve
    let neither = (1. - sum.prob) * (1. - update.prob);
    let probs_valid = sum.prob > 0.
        && sum.prob < 1.
        && update.prob > 0.
        && update.prob <= 1.
        && (0. ..1.).contains(&neither);
    if !probs_valid {
        return Err(ValidationError::new("starvation"));
    }

    Ok(())
}

#[derive(Debug, Deserialize, Clone)]
/// The transport surface settings. They are read by the external transport,
/// not by this crate.
pub struct ApiSettings {
    /// The address to which the external transport should be bound, e.g.
    /// `127.0.0.1:8081`.
    pub bind_address: std::net::SocketAddr,
}

#[derive(Debug, Deserialize, Clone, Copy)]
/// Masking settings. Together they determine the finite group and the
/// fixed-point embedding; see the masking documentation for the variants.
pub struct MaskSettings {
    /// The order of the finite group, e.g. `Prime`.
    pub group_type: GroupType,
    /// The data type of the weights to be masked, e.g. `F32`.
    pub data_type: DataType,
    /// The absolute bound of the weights, e.g. `B0`.
    pub bound_type: BoundType,
    /// The maximum number of models to be aggregated, e.g. `M3`.
    pub model_type: ModelType,
}

impl From<MaskSettings> for MaskConfig {
    fn from(settings: MaskSettings) -> Self {
        Self {
            group_type: settings.group_type,
            data_type: settings.data_type,
            bound_type: settings.bound_type,
            model_type: settings.model_type,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
/// Model settings.
pub struct ModelSettings {
    /// The expected number of model weights. Submitted models and masks are
    /// validated against this length.
    pub length: usize,
}

#[derive(Debug, Deserialize)]
/// Redis settings.
pub struct RedisSettings {
    /// The URL of the Redis instance, in the format
    /// `redis://[<username>][:<passwd>@]<hostname>[:port][/<db>]`.
    #[serde(deserialize_with = "deserialize_redis_url")]
    pub url: ConnectionInfo,
}

fn deserialize_redis_url<'de, D>(deserializer: D) -> Result<ConnectionInfo, D::Error>
where
    D: Deserializer<'de>,
{
    let url = String::deserialize(deserializer)?;
    url.as_str().into_connection_info().map_err(|_| {
        de::Error::invalid_value(
            de::Unexpected::Str(&url),
            &"redis://[<username>][:<passwd>@]<hostname>[:port][/<db>]",
        )
    })
}

#[derive(Debug, Deserialize, Clone, Copy)]
/// Restore settings.
pub struct RestoreSettings {
    /// Whether the coordinator state is restored from the store on startup.
    /// With restoring disabled the store is reset and the coordinator starts
    /// with a fresh round.
    pub enable: bool,
}

impl Default for RestoreSettings {
    fn default() -> Self {
        Self { enable: true }
    }
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of tracing filter directives, e.g.
    /// `petnet=debug,info`.
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let directives = String::deserialize(deserializer)?;
    EnvFilter::try_new(&directives).map_err(|_| {
        de::Error::invalid_value(
            de::Unexpected::Str(&directives),
            &"a tracing filter directive",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Default for PetSettings {
        fn default() -> Self {
            Self {
                sum: PetSettingsSum {
                    prob: 0.01,
                    count: PetSettingsCount { min: 10, max: 100 },
                    time: PetSettingsTime {
                        min: 0,
                        max: 604800,
                    },
                },
                update: PetSettingsUpdate {
                    prob: 0.1,
                    count: PetSettingsCount {
                        min: 100,
                        max: 10000,
                    },
                    time: PetSettingsTime {
                        min: 0,
                        max: 604800,
                    },
                },
                sum2: PetSettingsSum2 {
                    count: PetSettingsCount { min: 10, max: 100 },
                    time: PetSettingsTime {
                        min: 0,
                        max: 604800,
                    },
                },
            }
        }
    }

    fn assert_invalid(mutate: impl FnOnce(&mut PetSettings)) {
        let mut pet = PetSettings::default();
        mutate(&mut pet);
        assert!(pet.validate().is_err());
    }

    #[test]
    fn test_settings_new() {
        assert!(Settings::new("../configs/config.toml").is_ok());
        assert!(Settings::new("").is_err());
    }

    #[test]
    fn test_validate_pet() {
        assert!(PetSettings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_pet_counts() {
        assert_invalid(|pet| pet.sum.count.min = 0);
        assert_invalid(|pet| {
            pet.sum.count.min = 11;
            pet.sum.count.max = 10;
        });
        assert_invalid(|pet| pet.update.count.min = 2);
        assert_invalid(|pet| {
            pet.sum2.count.min = 11;
            pet.sum2.count.max = 10;
        });
        // the sum2 ceiling may not exceed the sum ceiling
        assert_invalid(|pet| pet.sum2.count.max = 101);
    }

    #[test]
    fn test_validate_pet_times() {
        assert_invalid(|pet| {
            pet.sum.time.min = 2;
            pet.sum.time.max = 1;
        });
        assert_invalid(|pet| {
            pet.update.time.min = 2;
            pet.update.time.max = 1;
        });
        assert_invalid(|pet| {
            pet.sum2.time.min = 2;
            pet.sum2.time.max = 1;
        });
    }

    #[test]
    fn test_validate_pet_probabilities() {
        assert_invalid(|pet| pet.sum.prob = 0.);
        assert_invalid(|pet| pet.sum.prob = 1.);
        assert_invalid(|pet| pet.update.prob = 0.);
        assert_invalid(|pet| pet.update.prob = 1. + f64::EPSILON);
    }
}
