use std::collections::HashMap;
use std::fmt;
#[cfg(feature = "tracking")]
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bucket::bucket;
use crate::context::EvaluationContext;
use crate::flag::Flag;
use crate::flag_value::{FlagType, FlagValue, ServedValue};
use crate::targeting::GeoMatch;
#[cfg(feature = "tracking")]
use crate::tracking::{self, EvaluationEvent, EvaluationTracker};

/// Evaluate a flag for the given [EvaluationContext].
///
/// Rules are checked in a fixed order and the first one that applies decides the outcome:
/// the kill switch, force-exclude, force-include, country (refined by language), percentage
/// rollout, and finally the flag's default. The evaluator is pure; it performs no I/O and assumes
/// the flag was validated when it was written.
pub fn evaluate(flag: &Flag, context: &EvaluationContext) -> EvaluationResult {
    let (served_value, reason) = decide(flag, context);
    EvaluationResult {
        flag_key: flag.flag_key.clone(),
        value: flag.value_for(served_value),
        served_value,
        reason,
    }
}

fn decide(flag: &Flag, context: &EvaluationContext) -> (ServedValue, Reason) {
    if !flag.enabled {
        return (flag.default_value, Reason::FlagDisabled);
    }

    let user_id = context.user_id();

    if let Some(user_id) = user_id {
        if flag.targeting.is_force_excluded(user_id) {
            return (ServedValue::B, Reason::ForceExcluded);
        }
        if flag.targeting.is_force_included(user_id) {
            return (ServedValue::A, Reason::ForceIncluded);
        }
    }

    if let Some(country) = context.country() {
        match flag.targeting.match_geo(country, context.language()) {
            Some(GeoMatch::CountryLanguage(_, language)) => {
                return (language.serve_value, Reason::CountryLanguageMatch);
            }
            Some(GeoMatch::Country(country)) => {
                return (country.serve_value, Reason::CountryMatch);
            }
            None => (),
        }
    }

    if flag.rollout_enabled {
        match user_id {
            Some(user_id) => {
                let served = if bucket(&flag.scope(), user_id) < u32::from(flag.rollout_percentage_a)
                {
                    ServedValue::A
                } else {
                    ServedValue::B
                };
                return (served, Reason::RolloutPercentage);
            }
            None => debug!(
                "skipping rollout for flag {}: context has no userId",
                flag.flag_key
            ),
        }
    }

    (flag.default_value, Reason::Default)
}

/// Evaluate each flag independently against the same context, keyed by flag key.
pub fn evaluate_many<'a, I>(flags: I, context: &EvaluationContext) -> HashMap<String, EvaluationResult>
where
    I: IntoIterator<Item = &'a Flag>,
{
    flags
        .into_iter()
        .map(|flag| (flag.flag_key.clone(), evaluate(flag, context)))
        .collect()
}

/// Evaluate a boolean flag and return its served value.
///
/// Calling this on a string or number flag is a caller error and is reported rather than
/// coerced.
pub fn is_enabled(flag: &Flag, context: &EvaluationContext) -> Result<bool, ConfigurationError> {
    match evaluate(flag, context).value {
        FlagValue::Bool(b) => Ok(b),
        _ => Err(ConfigurationError::NotBoolean {
            flag_key: flag.flag_key.clone(),
            flag_type: flag.flag_type(),
        }),
    }
}

/// Evaluate a flag and hand the outcome to `tracker` without waiting for it to be recorded.
///
/// The result is identical to [evaluate]. Recording runs on a detached task; its failures are
/// logged and never reach the caller.
#[cfg(feature = "tracking")]
pub async fn evaluate_with_tracking(
    flag: &Flag,
    context: &EvaluationContext,
    tracker: Option<&Arc<dyn EvaluationTracker>>,
) -> EvaluationResult {
    let result = evaluate(flag, context);

    if let Some(tracker) = tracker {
        match EvaluationEvent::from_evaluation(flag, context, &result) {
            Some(event) => tracking::dispatch(Arc::clone(tracker), event),
            None => debug!(
                "not tracking evaluation of {}: context has no userId",
                flag.flag_key
            ),
        }
    }

    result
}

/// Stateless evaluation service with an optional telemetry sink.
#[derive(Clone, Default)]
pub struct Evaluator {
    #[cfg(feature = "tracking")]
    tracker: Option<Arc<dyn EvaluationTracker>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "tracking")]
    pub fn with_tracker(tracker: Arc<dyn EvaluationTracker>) -> Self {
        Evaluator {
            tracker: Some(tracker),
        }
    }

    pub fn evaluate(&self, flag: &Flag, context: &EvaluationContext) -> EvaluationResult {
        evaluate(flag, context)
    }

    pub fn evaluate_many<'a, I>(
        &self,
        flags: I,
        context: &EvaluationContext,
    ) -> HashMap<String, EvaluationResult>
    where
        I: IntoIterator<Item = &'a Flag>,
    {
        evaluate_many(flags, context)
    }

    pub fn is_enabled(
        &self,
        flag: &Flag,
        context: &EvaluationContext,
    ) -> Result<bool, ConfigurationError> {
        is_enabled(flag, context)
    }

    #[cfg(feature = "tracking")]
    pub async fn evaluate_with_tracking(
        &self,
        flag: &Flag,
        context: &EvaluationContext,
    ) -> EvaluationResult {
        evaluate_with_tracking(flag, context, self.tracker.as_ref()).await
    }
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Evaluator");
        #[cfg(feature = "tracking")]
        debug.field("tracking", &self.tracker.is_some());
        debug.finish()
    }
}

/// The outcome of evaluating one flag, serialized as `{flagKey, value, servedValue, reason}`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub flag_key: String,
    pub value: FlagValue,
    pub served_value: ServedValue,
    pub reason: Reason,
}

/// Reason describes which rule decided the served value. The serialized strings are stable and
/// callers match on them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// The flag's kill switch is off; the default value was served.
    FlagDisabled,
    /// The user is on the force-exclude list and was served B.
    ForceExcluded,
    /// The user is on the force-include list and was served A.
    ForceIncluded,
    /// Both the country and a language override under it matched.
    CountryLanguageMatch,
    /// The country matched and no language override applied.
    CountryMatch,
    /// The user's bucket decided the outcome.
    RolloutPercentage,
    /// No rule applied.
    Default,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::FlagDisabled => "FLAG_DISABLED",
            Reason::ForceExcluded => "FORCE_EXCLUDED",
            Reason::ForceIncluded => "FORCE_INCLUDED",
            Reason::CountryLanguageMatch => "COUNTRY_LANGUAGE_MATCH",
            Reason::CountryMatch => "COUNTRY_MATCH",
            Reason::RolloutPercentage => "ROLLOUT_PERCENTAGE",
            Reason::Default => "DEFAULT",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flag was used in a way its definition does not support.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("flag {flag_key} is a {flag_type} flag, not a boolean flag")]
    NotBoolean {
        flag_key: String,
        flag_type: FlagType,
    },
}
