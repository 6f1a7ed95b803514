use async_trait::async_trait;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use thiserror::Error;

use crate::flag::{Flag, FlagKey};
use crate::flag_value::{FlagValues, ServedValue};
use crate::targeting::Targeting;
use crate::validation::{self, ValidationError};

/// The version every flag starts at.
pub const INITIAL_VERSION: Version = Version::new(1, 0, 0);

/// The version that supersedes `current`: the next major version, e.g. `2.0.0` after `1.0.0`.
pub fn next_version(current: &Version) -> Version {
    Version::new(current.major + 1, 0, 0)
}

/// VersionedFlagStore is the contract a persistence backend implements to serve flags to the
/// evaluator.
///
/// Guarantees every implementation must provide:
///
/// * [create](Self::create) never upserts: it fails with [StoreError::AlreadyExists] if any
///   version of the key exists.
/// * [update](Self::update) swaps the active version atomically. No reader may observe zero or
///   two active versions of a key, and of two concurrent updates of the same key at most one may
///   commit against a given active version; the other fails or is serialized behind it.
/// * [toggle](Self::toggle) and [update_rollout_settings](Self::update_rollout_settings) mutate
///   the active version in place without creating a version. Concurrent calls are
///   last-writer-wins.
/// * Reads may be eventually consistent: shortly after an update a reader may still see the
///   previous active version.
/// * After [delete](Self::delete) every read of every version of the key reports it missing.
///
/// How a backend meets the atomic swap is its own concern. A relational store flips both
/// `is_active` rows in one transaction guarded by a unique partial index on the active row; a
/// document store uses a conditional write on the previously active version; a key-value store
/// keeps an "active version" pointer and moves it with compare-and-swap; an edge key-value store
/// writes the new version before repointing and accepts stale reads until replication converges.
#[async_trait]
pub trait VersionedFlagStore: Send + Sync {
    /// Create version `1.0.0` of a new flag, active.
    async fn create(&self, flag: NewFlag) -> Result<Flag, StoreError>;

    /// Create a new version from the active one with `update` applied, and make it active.
    async fn update(&self, key: &FlagKey, update: FlagUpdate) -> Result<Flag, StoreError>;

    /// Set the kill switch of the active version in place.
    async fn toggle(
        &self,
        key: &FlagKey,
        enabled: bool,
        updated_by: Option<&str>,
    ) -> Result<Flag, StoreError>;

    /// Change the rollout fields of the active version in place. The merged settings are
    /// validated before anything is written.
    async fn update_rollout_settings(
        &self,
        key: &FlagKey,
        rollout: RolloutUpdate,
    ) -> Result<Flag, StoreError>;

    async fn get_active(&self, key: &FlagKey) -> Result<Option<Flag>, StoreError>;

    async fn get_version(&self, key: &FlagKey, version: &Version)
        -> Result<Option<Flag>, StoreError>;

    /// All versions of a flag, newest first. Empty if the flag does not exist.
    async fn list_versions(&self, key: &FlagKey) -> Result<Vec<VersionInfo>, StoreError>;

    /// The active version of every flag in an environment.
    async fn list_active(&self, platform: &str, environment: &str)
        -> Result<Vec<Flag>, StoreError>;

    /// Remove every version of a flag.
    async fn delete(&self, key: &FlagKey) -> Result<(), StoreError>;

    /// Whether any version of the flag exists, without loading it.
    async fn exists(&self, key: &FlagKey) -> Result<bool, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("flag {0} already exists")]
    AlreadyExists(FlagKey),
    #[error("flag {0} not found")]
    NotFound(FlagKey),
    #[error("flag {key} was updated concurrently: expected version {expected}, active is {active}")]
    VersionConflict {
        key: FlagKey,
        expected: Version,
        active: Version,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// The definition of a flag to create.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFlag {
    #[serde(flatten)]
    pub key: FlagKey,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "enabled_by_default")]
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
    #[serde(default)]
    pub created_by: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

fn full_percentage() -> u8 {
    100
}

impl NewFlag {
    /// An enabled flag with no targeting and no rollout, serving `default_value`.
    pub fn new(
        key: FlagKey,
        name: impl Into<String>,
        values: FlagValues,
        default_value: ServedValue,
    ) -> Self {
        NewFlag {
            key,
            name: name.into(),
            description: None,
            enabled: true,
            values,
            targeting: Targeting::default(),
            default_value,
            rollout_enabled: false,
            rollout_percentage_a: 0,
            rollout_percentage_b: 100,
            created_by: None,
        }
    }

    /// Build and validate the first version.
    pub fn into_flag(self, now: DateTime<Utc>) -> Result<Flag, ValidationError> {
        let flag = Flag {
            platform: self.key.platform,
            environment: self.key.environment,
            flag_key: self.key.flag_key,
            version: INITIAL_VERSION,
            name: self.name,
            description: self.description,
            enabled: self.enabled,
            values: self.values,
            targeting: self.targeting,
            default_value: self.default_value,
            rollout_enabled: self.rollout_enabled,
            rollout_percentage_a: self.rollout_percentage_a,
            rollout_percentage_b: self.rollout_percentage_b,
            is_active: true,
            created_at: now,
            updated_at: now,
            created_by: self.created_by.clone(),
            updated_by: self.created_by,
        };
        validation::validate_flag(&flag)?;
        Ok(flag)
    }
}

/// Changes for a new version. Unset fields carry over from the active version.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub values: Option<FlagValues>,
    pub targeting: Option<Targeting>,
    pub default_value: Option<ServedValue>,
    pub rollout_enabled: Option<bool>,
    pub rollout_percentage_a: Option<u8>,
    pub rollout_percentage_b: Option<u8>,
    /// When set, the update only commits if this is still the active version.
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub expected_version: Option<Version>,
    pub updated_by: Option<String>,
}

impl FlagUpdate {
    /// Build and validate the version that supersedes `active`. `active` itself is not changed.
    pub fn apply(&self, active: &Flag, now: DateTime<Utc>) -> Result<Flag, ValidationError> {
        let mut next = active.clone();
        next.version = next_version(&active.version);
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(description) = &self.description {
            next.description = Some(description.clone());
        }
        if let Some(enabled) = self.enabled {
            next.enabled = enabled;
        }
        if let Some(values) = &self.values {
            next.values = values.clone();
        }
        if let Some(targeting) = &self.targeting {
            next.targeting = targeting.clone();
        }
        if let Some(default_value) = self.default_value {
            next.default_value = default_value;
        }
        RolloutUpdate {
            rollout_enabled: self.rollout_enabled,
            rollout_percentage_a: self.rollout_percentage_a,
            rollout_percentage_b: self.rollout_percentage_b,
            updated_by: None,
        }
        .merge_into(&mut next);
        next.is_active = true;
        next.created_at = now;
        next.updated_at = now;
        next.created_by = self.updated_by.clone();
        next.updated_by = self.updated_by.clone();

        validation::validate_flag(&next)?;
        Ok(next)
    }
}

/// A partial change to the rollout fields of the active version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutUpdate {
    pub rollout_enabled: Option<bool>,
    pub rollout_percentage_a: Option<u8>,
    pub rollout_percentage_b: Option<u8>,
    pub updated_by: Option<String>,
}

impl RolloutUpdate {
    /// Merge into `flag` if the merged percentages are valid; otherwise leave `flag` untouched.
    pub fn apply_to(&self, flag: &mut Flag, now: DateTime<Utc>) -> Result<(), ValidationError> {
        let mut merged = flag.clone();
        self.merge_into(&mut merged);
        validation::validate_rollout(merged.rollout_percentage_a, merged.rollout_percentage_b)?;

        flag.rollout_enabled = merged.rollout_enabled;
        flag.rollout_percentage_a = merged.rollout_percentage_a;
        flag.rollout_percentage_b = merged.rollout_percentage_b;
        flag.updated_at = now;
        if self.updated_by.is_some() {
            flag.updated_by = self.updated_by.clone();
        }
        Ok(())
    }

    fn merge_into(&self, flag: &mut Flag) {
        if let Some(enabled) = self.rollout_enabled {
            flag.rollout_enabled = enabled;
        }
        if let Some(a) = self.rollout_percentage_a {
            flag.rollout_percentage_a = a;
        }
        if let Some(b) = self.rollout_percentage_b {
            flag.rollout_percentage_b = b;
        }
    }
}

/// Summary of one stored version.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde_as(as = "DisplayFromStr")]
    pub version: Version,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl From<&Flag> for VersionInfo {
    fn from(flag: &Flag) -> Self {
        VersionInfo {
            version: flag.version.clone(),
            is_active: flag.is_active,
            created_at: flag.created_at,
            created_by: flag.created_by.clone(),
        }
    }
}
