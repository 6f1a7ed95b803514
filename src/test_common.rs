#![cfg(test)]

use crate::flag::{Flag, FlagKey};
use crate::flag_value::{FlagValues, ServedValue};
use crate::legacy::LegacyFlag;
use crate::store::NewFlag;
use maplit::hashmap;
use std::collections::HashMap;

pub struct TestFlags {
    flags: HashMap<String, Flag>,
    legacy_flags: HashMap<String, LegacyFlag>,
}

impl TestFlags {
    pub fn new() -> Self {
        Self {
            flags: hashmap! {
                "plain".to_string() => serde_json::from_str(r#"{
                        "platform": "web",
                        "environment": "production",
                        "flagKey": "plain",
                        "version": "1.0.0",
                        "name": "Plain boolean flag",
                        "enabled": true,
                        "flagType": "boolean",
                        "valueA": true,
                        "valueB": false,
                        "defaultValue": "B"
                    }"#).unwrap(),
                "disabled".to_string() => serde_json::from_str(r#"{
                        "platform": "web",
                        "environment": "production",
                        "flagKey": "disabled",
                        "version": "4.0.0",
                        "name": "Switched off",
                        "enabled": false,
                        "flagType": "number",
                        "valueA": 10,
                        "valueB": 20,
                        "defaultValue": "A",
                        "rolloutEnabled": true,
                        "rolloutPercentageA": 50,
                        "rolloutPercentageB": 50
                    }"#).unwrap(),
                "targeted".to_string() => serde_json::from_str(r#"{
                        "platform": "web",
                        "environment": "production",
                        "flagKey": "targeted",
                        "version": "2.0.0",
                        "name": "Geo targeted copy",
                        "description": "New copy for US, old copy for Spanish speakers",
                        "enabled": true,
                        "flagType": "string",
                        "valueA": "new",
                        "valueB": "old",
                        "targeting": {
                            "countries": [
                                {
                                    "country": "US",
                                    "serveValue": "A",
                                    "languages": [{"language": "es", "serveValue": "B"}]
                                }
                            ],
                            "forceIncludeUsers": ["qa-tester"],
                            "forceExcludeUsers": ["blocked"]
                        },
                        "defaultValue": "B",
                        "isActive": true,
                        "createdAt": "2024-01-15T08:00:00Z",
                        "updatedAt": "2024-01-15T08:00:00Z"
                    }"#).unwrap(),
                "rollout".to_string() => serde_json::from_str(r#"{
                        "platform": "web",
                        "environment": "production",
                        "flagKey": "rollout-flag",
                        "version": "1.0.0",
                        "name": "Thirty percent rollout",
                        "enabled": true,
                        "flagType": "boolean",
                        "valueA": true,
                        "valueB": false,
                        "defaultValue": "B",
                        "rolloutEnabled": true,
                        "rolloutPercentageA": 30,
                        "rolloutPercentageB": 70
                    }"#).unwrap(),
            },
            legacy_flags: hashmap! {
                "legacy".to_string() => serde_json::from_str(r#"{
                        "platform": "web",
                        "environment": "production",
                        "flagKey": "legacy-flag",
                        "enabled": true,
                        "targetCountries": ["US"],
                        "targetLanguages": ["en"],
                        "targetUserIds": ["vip"],
                        "excludeUserIds": ["banned"],
                        "rolloutPercentage": 50
                    }"#).unwrap(),
            },
        }
    }

    pub fn flag(&self, key: &str) -> Flag {
        self.flags
            .get(key)
            .cloned()
            .unwrap_or_else(|| panic!("no test flag {}", key))
    }

    pub fn legacy_flag(&self, key: &str) -> LegacyFlag {
        self.legacy_flags
            .get(key)
            .cloned()
            .unwrap_or_else(|| panic!("no legacy test flag {}", key))
    }

    /// A valid boolean flag definition in web/production.
    pub fn new_flag(flag_key: &str) -> NewFlag {
        let mut name = flag_key.to_string();
        if let Some(first) = name.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        NewFlag::new(
            FlagKey::new("web", "production", flag_key),
            name,
            FlagValues::boolean(true, false),
            ServedValue::B,
        )
    }
}

#[cfg(feature = "tracking")]
pub use self::trackers::*;

#[cfg(feature = "tracking")]
mod trackers {
    use crate::tracking::{EvaluationEvent, EvaluationTracker, TrackingError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Forwards every recorded event to a channel, optionally after a delay.
    pub struct RecordingTracker {
        events: mpsc::UnboundedSender<EvaluationEvent>,
        delay: Option<Duration>,
    }

    impl RecordingTracker {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<EvaluationEvent>) {
            let (events, receiver) = mpsc::unbounded_channel();
            (
                RecordingTracker {
                    events,
                    delay: None,
                },
                receiver,
            )
        }

        pub fn with_delay(delay: Duration) -> (Self, mpsc::UnboundedReceiver<EvaluationEvent>) {
            let (mut tracker, receiver) = Self::new();
            tracker.delay = Some(delay);
            (tracker, receiver)
        }
    }

    #[async_trait]
    impl EvaluationTracker for RecordingTracker {
        async fn record_evaluation(&self, event: EvaluationEvent) -> Result<(), TrackingError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.events
                .send(event)
                .map_err(|e| TrackingError::Unavailable(e.to_string()))
        }
    }

    /// Fails every write and counts the attempts.
    #[derive(Default)]
    pub struct FailingTracker {
        attempts: AtomicUsize,
    }

    impl FailingTracker {
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EvaluationTracker for FailingTracker {
        async fn record_evaluation(&self, _event: EvaluationEvent) -> Result<(), TrackingError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TrackingError::Unavailable("analytics table offline".into()))
        }
    }
}
