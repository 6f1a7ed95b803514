use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::flag::Flag;
use crate::flag_value::{FlagType, ServedValue};
use crate::legacy::LegacyFlag;
use crate::targeting::Targeting;

lazy_static! {
    static ref ISO_ALPHA2_REGEX: Regex = Regex::new(r"^[A-Za-z]{2}$").unwrap();
}

/// A flag definition was rejected on the write path. The evaluator never produces these.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("invalid country code {0:?}: expected an ISO-3166 alpha-2 code")]
    InvalidCountryCode(String),
    #[error("invalid language code {0:?}: expected an ISO-639 alpha-2 code")]
    InvalidLanguageCode(String),
    #[error("country {0} is targeted more than once")]
    DuplicateCountry(String),
    #[error("language {language} is targeted more than once for country {country}")]
    DuplicateLanguage { country: String, language: String },
    #[error("user {0} is both force-included and force-excluded")]
    ConflictingUserLists(String),
    #[error("rollout percentage for {served} is {value}, must be between 0 and 100")]
    PercentageOutOfRange { served: ServedValue, value: u8 },
    #[error("rollout percentages must sum to 100, got {a} + {b}")]
    RolloutSum { a: u8, b: u8 },
    #[error("value {served} must be a {expected}, got a {actual}")]
    ValueTypeMismatch {
        served: ServedValue,
        expected: FlagType,
        actual: FlagType,
    },
    #[error("legacy rollout percentage {0} must be between 0 and 100")]
    LegacyRolloutOutOfRange(u8),
}

/// Check every write-time invariant of an A/B flag.
pub fn validate_flag(flag: &Flag) -> Result<(), ValidationError> {
    require_non_empty("platform", &flag.platform)?;
    require_non_empty("environment", &flag.environment)?;
    require_non_empty("flagKey", &flag.flag_key)?;
    require_non_empty("name", &flag.name)?;
    validate_targeting(&flag.targeting)?;
    validate_rollout(flag.rollout_percentage_a, flag.rollout_percentage_b)
}

pub fn validate_targeting(targeting: &Targeting) -> Result<(), ValidationError> {
    for target in &targeting.countries {
        validate_country_code(&target.country)?;
        for language in &target.languages {
            validate_language_code(&language.language)?;
        }
        if let Some(language) = target
            .languages
            .iter()
            .map(|l| l.language.to_ascii_lowercase())
            .duplicates()
            .next()
        {
            return Err(ValidationError::DuplicateLanguage {
                country: target.country.to_ascii_uppercase(),
                language,
            });
        }
    }

    if let Some(country) = targeting
        .countries
        .iter()
        .map(|c| c.country.to_ascii_uppercase())
        .duplicates()
        .next()
    {
        return Err(ValidationError::DuplicateCountry(country));
    }

    if let Some(user) = targeting
        .force_include_users
        .iter()
        .find(|user| targeting.force_exclude_users.contains(user))
    {
        return Err(ValidationError::ConflictingUserLists(user.clone()));
    }

    Ok(())
}

/// Both percentages must lie in `0..=100` and sum to exactly 100.
pub fn validate_rollout(percentage_a: u8, percentage_b: u8) -> Result<(), ValidationError> {
    for (served, value) in [(ServedValue::A, percentage_a), (ServedValue::B, percentage_b)] {
        if value > 100 {
            return Err(ValidationError::PercentageOutOfRange { served, value });
        }
    }
    if u16::from(percentage_a) + u16::from(percentage_b) != 100 {
        return Err(ValidationError::RolloutSum {
            a: percentage_a,
            b: percentage_b,
        });
    }
    Ok(())
}

pub fn validate_legacy_flag(flag: &LegacyFlag) -> Result<(), ValidationError> {
    require_non_empty("platform", &flag.platform)?;
    require_non_empty("environment", &flag.environment)?;
    require_non_empty("flagKey", &flag.flag_key)?;
    for country in &flag.target_countries {
        validate_country_code(country)?;
    }
    for language in &flag.target_languages {
        validate_language_code(language)?;
    }
    if flag.rollout_percentage > 100 {
        return Err(ValidationError::LegacyRolloutOutOfRange(
            flag.rollout_percentage,
        ));
    }
    Ok(())
}

pub fn validate_country_code(code: &str) -> Result<(), ValidationError> {
    if ISO_ALPHA2_REGEX.is_match(code) {
        Ok(())
    } else {
        Err(ValidationError::InvalidCountryCode(code.to_string()))
    }
}

pub fn validate_language_code(code: &str) -> Result<(), ValidationError> {
    if ISO_ALPHA2_REGEX.is_match(code) {
        Ok(())
    } else {
        Err(ValidationError::InvalidLanguageCode(code.to_string()))
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targeting::CountryTarget;
    use crate::test_common::TestFlags;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test]
    fn fixtures_are_valid() {
        let flags = TestFlags::new();
        for key in ["plain", "disabled", "targeted", "rollout"] {
            assert_that!(validate_flag(&flags.flag(key))).is_ok();
        }
    }

    #[test_case(30, 70)]
    #[test_case(0, 100)]
    #[test_case(100, 0)]
    fn rollout_accepts_complementary_split(a: u8, b: u8) {
        assert_that!(validate_rollout(a, b)).is_ok();
    }

    #[test_case(30, 60, ValidationError::RolloutSum { a: 30, b: 60 })]
    #[test_case(50, 51, ValidationError::RolloutSum { a: 50, b: 51 })]
    #[test_case(150, 0, ValidationError::PercentageOutOfRange { served: ServedValue::A, value: 150 })]
    #[test_case(0, 200, ValidationError::PercentageOutOfRange { served: ServedValue::B, value: 200 })]
    fn rollout_rejects(a: u8, b: u8, expected: ValidationError) {
        assert_that!(validate_rollout(a, b)).is_err_containing(expected);
    }

    #[test_case("US", true)]
    #[test_case("gb", true)]
    #[test_case("USA", false)]
    #[test_case("U1", false)]
    #[test_case("", false)]
    fn country_codes(code: &str, valid: bool) {
        assert_that!(validate_country_code(code).is_ok()).is_equal_to(valid);
    }

    #[test]
    fn rejects_bad_language_code() {
        let targeting = Targeting {
            countries: vec![CountryTarget::new("US", ServedValue::A).with_language("eng", ServedValue::B)],
            ..Targeting::default()
        };
        assert_that!(validate_targeting(&targeting))
            .is_err_containing(ValidationError::InvalidLanguageCode("eng".into()));
    }

    #[test]
    fn rejects_duplicate_countries_case_insensitively() {
        let targeting = Targeting {
            countries: vec![
                CountryTarget::new("US", ServedValue::A),
                CountryTarget::new("us", ServedValue::B),
            ],
            ..Targeting::default()
        };
        assert_that!(validate_targeting(&targeting))
            .is_err_containing(ValidationError::DuplicateCountry("US".into()));
    }

    #[test]
    fn rejects_duplicate_languages() {
        let targeting = Targeting {
            countries: vec![CountryTarget::new("CA", ServedValue::A)
                .with_language("fr", ServedValue::B)
                .with_language("FR", ServedValue::A)],
            ..Targeting::default()
        };
        assert_that!(validate_targeting(&targeting)).is_err_containing(
            ValidationError::DuplicateLanguage {
                country: "CA".into(),
                language: "fr".into(),
            },
        );
    }

    #[test]
    fn rejects_user_on_both_lists() {
        let targeting = Targeting {
            force_include_users: vec!["u1".into(), "u2".into()],
            force_exclude_users: vec!["u2".into()],
            ..Targeting::default()
        };
        assert_that!(validate_targeting(&targeting))
            .is_err_containing(ValidationError::ConflictingUserLists("u2".into()));
    }

    #[test]
    fn rejects_empty_identity() {
        let mut flag = TestFlags::new().flag("plain");
        flag.flag_key = " ".into();
        assert_that!(validate_flag(&flag))
            .is_err_containing(ValidationError::EmptyField("flagKey"));
    }

    #[test]
    fn validates_legacy_flags() {
        let flags = TestFlags::new();
        let mut flag = flags.legacy_flag("legacy");
        assert_that!(validate_legacy_flag(&flag)).is_ok();

        flag.rollout_percentage = 101;
        assert_that!(validate_legacy_flag(&flag))
            .is_err_containing(ValidationError::LegacyRolloutOutOfRange(101));

        flag.rollout_percentage = 50;
        flag.target_languages.push("english".into());
        assert_that!(validate_legacy_flag(&flag))
            .is_err_containing(ValidationError::InvalidLanguageCode("english".into()));
    }
}
