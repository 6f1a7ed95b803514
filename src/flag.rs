use std::fmt;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::bucket::bucket_scope;
use crate::flag_value::{FlagType, FlagValue, FlagValues, ServedValue};
use crate::targeting::Targeting;

/// The logical identity of a flag, shared by all of its versions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagKey {
    pub platform: String,
    pub environment: String,
    pub flag_key: String,
}

impl FlagKey {
    pub fn new(
        platform: impl Into<String>,
        environment: impl Into<String>,
        flag_key: impl Into<String>,
    ) -> Self {
        FlagKey {
            platform: platform.into(),
            environment: environment.into(),
            flag_key: flag_key.into(),
        }
    }

    /// The bucketing scope, `platform:environment:flagKey`.
    pub fn scope(&self) -> String {
        bucket_scope(&self.platform, &self.environment, &self.flag_key)
    }
}

impl fmt::Display for FlagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.platform, self.environment, self.flag_key)
    }
}

/// One version of an A/B flag.
///
/// Versions are immutable history: an edit produces a new version. Only `enabled` and the
/// rollout fields of the active version are ever changed in place, by
/// [crate::VersionedFlagStore::toggle] and [crate::VersionedFlagStore::update_rollout_settings].
#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    pub platform: String,
    pub environment: String,
    pub flag_key: String,
    #[serde_as(as = "DisplayFromStr")]
    pub version: Version,

    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub enabled: bool,
    #[serde(flatten)]
    pub values: FlagValues,
    #[serde(default)]
    pub targeting: Targeting,
    pub default_value: ServedValue,

    #[serde(default)]
    pub rollout_enabled: bool,
    #[serde(default)]
    pub rollout_percentage_a: u8,
    #[serde(default = "full_percentage")]
    pub rollout_percentage_b: u8,

    #[serde(default = "active_by_default")]
    pub is_active: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

fn full_percentage() -> u8 {
    100
}

fn active_by_default() -> bool {
    true
}

impl Flag {
    pub fn key(&self) -> FlagKey {
        FlagKey::new(&self.platform, &self.environment, &self.flag_key)
    }

    /// The bucketing scope, `platform:environment:flagKey`.
    pub fn scope(&self) -> String {
        self.key().scope()
    }

    pub fn flag_type(&self) -> FlagType {
        self.values.flag_type()
    }

    /// The configured value for the `served` outcome.
    pub fn value_for(&self, served: ServedValue) -> FlagValue {
        self.values.get(served)
    }

    pub fn value_a(&self) -> FlagValue {
        self.value_for(ServedValue::A)
    }

    pub fn value_b(&self) -> FlagValue {
        self.value_for(ServedValue::B)
    }
}
