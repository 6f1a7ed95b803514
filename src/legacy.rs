use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use crate::bucket::{bucket, bucket_scope};
use crate::context::EvaluationContext;
use crate::util::iso_code_eq;

/// A single-value flag from before the A/B model. It is on or off for a user; there are no
/// values to choose between.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyFlag {
    pub platform: String,
    pub environment: String,
    pub flag_key: String,
    pub enabled: bool,
    #[serde(default)]
    pub target_countries: Vec<String>,
    #[serde(default)]
    pub target_languages: Vec<String>,
    #[serde(default)]
    pub target_user_ids: Vec<String>,
    #[serde(default)]
    pub exclude_user_ids: Vec<String>,
    #[serde(default = "full_rollout")]
    pub rollout_percentage: u8,
}

fn full_rollout() -> u8 {
    100
}

impl LegacyFlag {
    /// Whether any rule depends on the user, so that a user id is needed to evaluate it.
    pub fn is_targeted(&self) -> bool {
        !self.target_countries.is_empty()
            || !self.target_languages.is_empty()
            || !self.target_user_ids.is_empty()
            || !self.exclude_user_ids.is_empty()
            || self.rollout_percentage < 100
    }

    pub fn scope(&self) -> String {
        bucket_scope(&self.platform, &self.environment, &self.flag_key)
    }
}

/// Why a legacy flag came out on or off. Serialized as the human-readable diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LegacyReason {
    FlagDisabled,
    UserIdRequired,
    UserTargeted,
    UserExcluded,
    CountryRequired,
    CountryNotTargeted,
    LanguageRequired,
    LanguageNotTargeted,
    InRollout,
    NotInRollout,
    FlagEnabled,
}

impl LegacyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegacyReason::FlagDisabled => "flag disabled",
            LegacyReason::UserIdRequired => "userId required for evaluation",
            LegacyReason::UserTargeted => "user explicitly targeted",
            LegacyReason::UserExcluded => "user explicitly excluded",
            LegacyReason::CountryRequired => "country required for evaluation",
            LegacyReason::CountryNotTargeted => "country not targeted",
            LegacyReason::LanguageRequired => "language required for evaluation",
            LegacyReason::LanguageNotTargeted => "language not targeted",
            LegacyReason::InRollout => "user in rollout percentage",
            LegacyReason::NotInRollout => "user not in rollout percentage",
            LegacyReason::FlagEnabled => "flag enabled",
        }
    }
}

impl fmt::Display for LegacyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LegacyReason {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyEvaluation {
    pub flag_key: String,
    pub enabled: bool,
    pub reason: LegacyReason,
}

/// Evaluate a legacy single-value flag.
///
/// Unlike [crate::evaluate], a targeted flag evaluated without the context it needs reports which
/// field was missing instead of falling through. The include list is checked before the exclude
/// list, the reverse of the A/B evaluator.
pub fn evaluate_legacy(flag: &LegacyFlag, context: &EvaluationContext) -> LegacyEvaluation {
    let (enabled, reason) = decide_legacy(flag, context);
    LegacyEvaluation {
        flag_key: flag.flag_key.clone(),
        enabled,
        reason,
    }
}

fn decide_legacy(flag: &LegacyFlag, context: &EvaluationContext) -> (bool, LegacyReason) {
    if !flag.enabled {
        return (false, LegacyReason::FlagDisabled);
    }

    if !flag.is_targeted() {
        return (true, LegacyReason::FlagEnabled);
    }

    let user_id = match context.user_id() {
        Some(user_id) => user_id,
        None => return (false, LegacyReason::UserIdRequired),
    };

    if flag.target_user_ids.iter().any(|u| u == user_id) {
        return (true, LegacyReason::UserTargeted);
    }
    if flag.exclude_user_ids.iter().any(|u| u == user_id) {
        return (false, LegacyReason::UserExcluded);
    }

    if !flag.target_countries.is_empty() {
        match context.country() {
            None => return (false, LegacyReason::CountryRequired),
            Some(country) if !contains_code(&flag.target_countries, country) => {
                return (false, LegacyReason::CountryNotTargeted);
            }
            Some(_) => (),
        }
    }

    if !flag.target_languages.is_empty() {
        match context.language() {
            None => return (false, LegacyReason::LanguageRequired),
            Some(language) if !contains_code(&flag.target_languages, language) => {
                return (false, LegacyReason::LanguageNotTargeted);
            }
            Some(_) => (),
        }
    }

    if flag.rollout_percentage < 100 {
        return if bucket(&flag.scope(), user_id) < u32::from(flag.rollout_percentage) {
            (true, LegacyReason::InRollout)
        } else {
            (false, LegacyReason::NotInRollout)
        };
    }

    (true, LegacyReason::FlagEnabled)
}

fn contains_code(codes: &[String], code: &str) -> bool {
    codes.iter().any(|c| iso_code_eq(c, code))
}
