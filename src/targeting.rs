use serde::{Deserialize, Serialize};

use crate::flag_value::ServedValue;
use crate::util::iso_code_eq;

/// Opt-in rules that take precedence over percentage rollout.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Targeting {
    #[serde(default)]
    pub countries: Vec<CountryTarget>,
    #[serde(default)]
    pub force_include_users: Vec<String>,
    #[serde(default)]
    pub force_exclude_users: Vec<String>,
}

/// Serves a fixed outcome to requests from a country, optionally refined per language.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryTarget {
    /// ISO-3166 alpha-2 code.
    pub country: String,
    pub serve_value: ServedValue,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<LanguageTarget>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageTarget {
    /// ISO-639 alpha-2 code.
    pub language: String,
    pub serve_value: ServedValue,
}

/// Outcome of matching a request's geography against [Targeting::countries].
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum GeoMatch<'a> {
    Country(&'a CountryTarget),
    CountryLanguage(&'a CountryTarget, &'a LanguageTarget),
}

impl Targeting {
    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
            && self.force_include_users.is_empty()
            && self.force_exclude_users.is_empty()
    }

    pub fn is_force_excluded(&self, user_id: &str) -> bool {
        self.force_exclude_users.iter().any(|u| u == user_id)
    }

    pub fn is_force_included(&self, user_id: &str) -> bool {
        self.force_include_users.iter().any(|u| u == user_id)
    }

    /// The first country entry matching `country`, refined by `language` when the entry has a
    /// matching language override.
    pub(crate) fn match_geo(&self, country: &str, language: Option<&str>) -> Option<GeoMatch<'_>> {
        let target = self
            .countries
            .iter()
            .find(|target| iso_code_eq(&target.country, country))?;

        match language.and_then(|language| target.language_match(language)) {
            Some(language_target) => Some(GeoMatch::CountryLanguage(target, language_target)),
            None => Some(GeoMatch::Country(target)),
        }
    }
}

impl CountryTarget {
    pub fn new(country: impl Into<String>, serve_value: ServedValue) -> Self {
        CountryTarget {
            country: country.into(),
            serve_value,
            languages: Vec::new(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>, serve_value: ServedValue) -> Self {
        self.languages.push(LanguageTarget {
            language: language.into(),
            serve_value,
        });
        self
    }

    fn language_match(&self, language: &str) -> Option<&LanguageTarget> {
        self.languages
            .iter()
            .find(|target| iso_code_eq(&target.language, language))
    }
}
