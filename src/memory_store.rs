use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use semver::Version;

use crate::flag::{Flag, FlagKey};
use crate::store::{
    FlagUpdate, NewFlag, RolloutUpdate, StoreError, VersionInfo, VersionedFlagStore,
};

/// Process-local [VersionedFlagStore].
///
/// All writes take one lock, so every version swap is serialized and readers always see exactly
/// one active version per key. Reads are strongly consistent.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    flags: RwLock<HashMap<FlagKey, FlagHistory>>,
}

#[derive(Debug)]
struct FlagHistory {
    // oldest first
    versions: Vec<Flag>,
    active: usize,
}

impl FlagHistory {
    fn active(&self) -> &Flag {
        &self.versions[self.active]
    }

    fn active_mut(&mut self) -> &mut Flag {
        &mut self.versions[self.active]
    }

    fn swap_active(&mut self, next: Flag) -> &Flag {
        self.versions[self.active].is_active = false;
        self.versions.push(next);
        self.active = self.versions.len() - 1;
        self.active()
    }
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing active flags, e.g. from a JSON export.
    pub fn with_flags(flags: impl IntoIterator<Item = Flag>) -> Self {
        let flags = flags
            .into_iter()
            .map(|mut flag| {
                flag.is_active = true;
                (
                    flag.key(),
                    FlagHistory {
                        versions: vec![flag],
                        active: 0,
                    },
                )
            })
            .collect();
        MemoryFlagStore {
            flags: RwLock::new(flags),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<FlagKey, FlagHistory>>, StoreError> {
        self.flags
            .read()
            .map_err(|e| StoreError::Backend(format!("flag store lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<FlagKey, FlagHistory>>, StoreError> {
        self.flags
            .write()
            .map_err(|e| StoreError::Backend(format!("flag store lock poisoned: {}", e)))
    }
}

#[async_trait]
impl VersionedFlagStore for MemoryFlagStore {
    async fn create(&self, flag: NewFlag) -> Result<Flag, StoreError> {
        let key = flag.key.clone();
        let flag = flag.into_flag(Utc::now())?;

        let mut flags = self.write()?;
        if flags.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        flags.insert(
            key.clone(),
            FlagHistory {
                versions: vec![flag.clone()],
                active: 0,
            },
        );
        info!("created flag {} at version {}", key, flag.version);
        Ok(flag)
    }

    async fn update(&self, key: &FlagKey, update: FlagUpdate) -> Result<Flag, StoreError> {
        let mut flags = self.write()?;
        let history = flags
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if let Some(expected) = &update.expected_version {
            if *expected != history.active().version {
                return Err(StoreError::VersionConflict {
                    key: key.clone(),
                    expected: expected.clone(),
                    active: history.active().version.clone(),
                });
            }
        }

        let next = update.apply(history.active(), Utc::now())?;
        let flag = history.swap_active(next).clone();
        info!("updated flag {} to version {}", key, flag.version);
        Ok(flag)
    }

    async fn toggle(
        &self,
        key: &FlagKey,
        enabled: bool,
        updated_by: Option<&str>,
    ) -> Result<Flag, StoreError> {
        let mut flags = self.write()?;
        let flag = flags
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?
            .active_mut();

        flag.enabled = enabled;
        flag.updated_at = Utc::now();
        if let Some(updated_by) = updated_by {
            flag.updated_by = Some(updated_by.to_string());
        }
        info!("flag {} {}", key, if enabled { "enabled" } else { "disabled" });
        Ok(flag.clone())
    }

    async fn update_rollout_settings(
        &self,
        key: &FlagKey,
        rollout: RolloutUpdate,
    ) -> Result<Flag, StoreError> {
        let mut flags = self.write()?;
        let flag = flags
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?
            .active_mut();

        rollout.apply_to(flag, Utc::now())?;
        info!(
            "flag {} rollout {} at {}/{}",
            key,
            if flag.rollout_enabled { "on" } else { "off" },
            flag.rollout_percentage_a,
            flag.rollout_percentage_b
        );
        Ok(flag.clone())
    }

    async fn get_active(&self, key: &FlagKey) -> Result<Option<Flag>, StoreError> {
        Ok(self.read()?.get(key).map(|history| history.active().clone()))
    }

    async fn get_version(
        &self,
        key: &FlagKey,
        version: &Version,
    ) -> Result<Option<Flag>, StoreError> {
        Ok(self.read()?.get(key).and_then(|history| {
            history
                .versions
                .iter()
                .find(|flag| flag.version == *version)
                .cloned()
        }))
    }

    async fn list_versions(&self, key: &FlagKey) -> Result<Vec<VersionInfo>, StoreError> {
        Ok(self
            .read()?
            .get(key)
            .map(|history| history.versions.iter().rev().map(VersionInfo::from).collect())
            .unwrap_or_default())
    }

    async fn list_active(
        &self,
        platform: &str,
        environment: &str,
    ) -> Result<Vec<Flag>, StoreError> {
        let mut active: Vec<Flag> = self
            .read()?
            .iter()
            .filter(|(key, _)| key.platform == platform && key.environment == environment)
            .map(|(_, history)| history.active().clone())
            .collect();
        active.sort_by(|a, b| a.flag_key.cmp(&b.flag_key));
        Ok(active)
    }

    async fn delete(&self, key: &FlagKey) -> Result<(), StoreError> {
        match self.write()?.remove(key) {
            Some(history) => {
                debug!("deleted {} versions of flag {}", history.versions.len(), key);
                Ok(())
            }
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    async fn exists(&self, key: &FlagKey) -> Result<bool, StoreError> {
        Ok(self.read()?.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{evaluate_many, Reason};
    use crate::flag_value::FlagValues;
    use crate::store::INITIAL_VERSION;
    use crate::test_common::TestFlags;
    use crate::validation::ValidationError;
    use crate::EvaluationContext;
    use spectral::prelude::*;
    use std::sync::Arc;

    fn key(flag_key: &str) -> FlagKey {
        FlagKey::new("web", "production", flag_key)
    }

    fn active_count(store: &MemoryFlagStore, key: &FlagKey) -> usize {
        store.flags.read().unwrap()[key]
            .versions
            .iter()
            .filter(|flag| flag.is_active)
            .count()
    }

    #[tokio::test]
    async fn create_starts_at_first_version() {
        let store = MemoryFlagStore::new();
        let flag = store.create(TestFlags::new_flag("checkout")).await.unwrap();

        assert_that!(flag.version).is_equal_to(INITIAL_VERSION);
        assert_that!(flag.is_active).is_true();
        assert_that!(store.exists(&key("checkout")).await.unwrap()).is_true();
        assert_that!(store.get_active(&key("checkout")).await.unwrap()).contains_value(flag);
    }

    #[tokio::test]
    async fn create_is_not_an_upsert() {
        let store = MemoryFlagStore::new();
        store.create(TestFlags::new_flag("checkout")).await.unwrap();

        let result = store.create(TestFlags::new_flag("checkout")).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(k)) if k == key("checkout")));
    }

    #[tokio::test]
    async fn create_rejects_invalid_definition() {
        let store = MemoryFlagStore::new();
        let mut new_flag = TestFlags::new_flag("checkout");
        new_flag.rollout_percentage_a = 10;

        let result = store.create(new_flag).await;
        assert!(matches!(
            result,
            Err(StoreError::Validation(ValidationError::RolloutSum { a: 10, b: 100 }))
        ));
        assert_that!(store.exists(&key("checkout")).await.unwrap()).is_false();
    }

    #[tokio::test]
    async fn update_swaps_active_version() {
        let store = MemoryFlagStore::new();
        store.create(TestFlags::new_flag("checkout")).await.unwrap();

        let updated = store
            .update(
                &key("checkout"),
                FlagUpdate {
                    description: Some("second take".into()),
                    ..FlagUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_that!(updated.version).is_equal_to(Version::new(2, 0, 0));
        assert_that!(active_count(&store, &key("checkout"))).is_equal_to(1);

        let first = store
            .get_version(&key("checkout"), &INITIAL_VERSION)
            .await
            .unwrap()
            .unwrap();
        assert_that!(first.is_active).is_false();
        assert_that!(first.description).is_none();

        let versions = store.list_versions(&key("checkout")).await.unwrap();
        let listed: Vec<(String, bool)> = versions
            .iter()
            .map(|v| (v.version.to_string(), v.is_active))
            .collect();
        assert_that!(listed).is_equal_to(vec![
            ("2.0.0".to_string(), true),
            ("1.0.0".to_string(), false),
        ]);
    }

    #[tokio::test]
    async fn update_rejects_stale_expected_version() {
        let store = MemoryFlagStore::new();
        store.create(TestFlags::new_flag("checkout")).await.unwrap();
        store
            .update(&key("checkout"), FlagUpdate::default())
            .await
            .unwrap();

        let stale = FlagUpdate {
            expected_version: Some(INITIAL_VERSION),
            ..FlagUpdate::default()
        };
        let result = store.update(&key("checkout"), stale).await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
        assert_that!(store.list_versions(&key("checkout")).await.unwrap()).has_length(2);
    }

    #[tokio::test]
    async fn update_rejects_type_change_to_invalid_flag() {
        let store = MemoryFlagStore::new();
        store.create(TestFlags::new_flag("checkout")).await.unwrap();

        let update = FlagUpdate {
            values: Some(FlagValues::string("a", "b")),
            rollout_percentage_a: Some(60),
            ..FlagUpdate::default()
        };
        let result = store.update(&key("checkout"), update).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));

        let active = store.get_active(&key("checkout")).await.unwrap().unwrap();
        assert_that!(active.version).is_equal_to(INITIAL_VERSION);
        assert_that!(active.values).is_equal_to(FlagValues::boolean(true, false));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_keep_one_active_version() {
        let store = Arc::new(MemoryFlagStore::new());
        store.create(TestFlags::new_flag("checkout")).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .update(
                            &key("checkout"),
                            FlagUpdate {
                                expected_version: Some(INITIAL_VERSION),
                                ..FlagUpdate::default()
                            },
                        )
                        .await
                })
            })
            .collect();

        let mut committed = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                committed += 1;
            }
        }
        assert_that!(committed).is_equal_to(1);
        assert_that!(active_count(&store, &key("checkout"))).is_equal_to(1);
    }

    #[tokio::test]
    async fn toggle_mutates_in_place() {
        let store = MemoryFlagStore::new();
        store.create(TestFlags::new_flag("checkout")).await.unwrap();

        let flag = store
            .toggle(&key("checkout"), false, Some("oncall"))
            .await
            .unwrap();
        assert_that!(flag.enabled).is_false();
        assert_that!(flag.version).is_equal_to(INITIAL_VERSION);
        assert_that!(flag.updated_by).contains_value("oncall".to_string());
        assert_that!(store.list_versions(&key("checkout")).await.unwrap()).has_length(1);
    }

    #[tokio::test]
    async fn rollout_update_is_validated_before_commit() {
        let store = MemoryFlagStore::new();
        store.create(TestFlags::new_flag("checkout")).await.unwrap();

        let result = store
            .update_rollout_settings(
                &key("checkout"),
                RolloutUpdate {
                    rollout_enabled: Some(true),
                    rollout_percentage_a: Some(25),
                    ..RolloutUpdate::default()
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
        let active = store.get_active(&key("checkout")).await.unwrap().unwrap();
        assert_that!(active.rollout_enabled).is_false();

        let flag = store
            .update_rollout_settings(
                &key("checkout"),
                RolloutUpdate {
                    rollout_enabled: Some(true),
                    rollout_percentage_a: Some(25),
                    rollout_percentage_b: Some(75),
                    updated_by: None,
                },
            )
            .await
            .unwrap();
        assert_that!(flag.rollout_percentage_a).is_equal_to(25);
        assert_that!(flag.version).is_equal_to(INITIAL_VERSION);
    }

    #[tokio::test]
    async fn delete_removes_every_version() {
        let store = MemoryFlagStore::new();
        store.create(TestFlags::new_flag("checkout")).await.unwrap();
        store
            .update(&key("checkout"), FlagUpdate::default())
            .await
            .unwrap();

        store.delete(&key("checkout")).await.unwrap();
        assert_that!(store.exists(&key("checkout")).await.unwrap()).is_false();
        assert_that!(store.get_active(&key("checkout")).await.unwrap()).is_none();
        assert_that!(store
            .get_version(&key("checkout"), &INITIAL_VERSION)
            .await
            .unwrap())
        .is_none();
        assert_that!(store.list_versions(&key("checkout")).await.unwrap()).is_empty();
        assert!(matches!(
            store.delete(&key("checkout")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_flag_operations_report_not_found() {
        let store = MemoryFlagStore::new();
        assert!(matches!(
            store.toggle(&key("ghost"), true, None).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.update(&key("ghost"), FlagUpdate::default()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_active_feeds_batch_evaluation() {
        let fixtures = TestFlags::new();
        let store = MemoryFlagStore::with_flags(vec![
            fixtures.flag("plain"),
            fixtures.flag("targeted"),
            fixtures.flag("rollout"),
        ]);
        store
            .create(NewFlag {
                key: FlagKey::new("web", "staging", "plain"),
                ..TestFlags::new_flag("plain")
            })
            .await
            .unwrap();

        let flags = store.list_active("web", "production").await.unwrap();
        let keys: Vec<&str> = flags.iter().map(|f| f.flag_key.as_str()).collect();
        assert_that!(keys).is_equal_to(vec!["plain", "rollout-flag", "targeted"]);

        let results = evaluate_many(&flags, &EvaluationContext::new().with_country("US"));
        assert_that!(results["targeted"].reason).is_equal_to(Reason::CountryMatch);
        assert_that!(results["plain"].reason).is_equal_to(Reason::Default);
    }
}
