use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::util::f64_to_i64_safe;
use crate::validation::ValidationError;

/// The declared type of both of a flag's values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    Boolean,
    String,
    Number,
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlagType::Boolean => "boolean",
            FlagType::String => "string",
            FlagType::Number => "number",
        })
    }
}

/// Which of the two configured outcomes was served.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ServedValue {
    A,
    B,
}

impl fmt::Display for ServedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServedValue::A => "A",
            ServedValue::B => "B",
        })
    }
}

/// A single served value.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
    Number(f64),
}

impl From<bool> for FlagValue {
    fn from(b: bool) -> FlagValue {
        FlagValue::Bool(b)
    }
}

impl From<String> for FlagValue {
    fn from(s: String) -> FlagValue {
        FlagValue::Str(s)
    }
}

impl From<&str> for FlagValue {
    fn from(s: &str) -> FlagValue {
        FlagValue::Str(s.to_owned())
    }
}

impl From<f64> for FlagValue {
    fn from(f: f64) -> FlagValue {
        FlagValue::Number(f)
    }
}

impl From<i64> for FlagValue {
    fn from(i: i64) -> FlagValue {
        FlagValue::Number(i as f64)
    }
}

impl FlagValue {
    pub fn flag_type(&self) -> FlagType {
        match self {
            FlagValue::Bool(_) => FlagType::Boolean,
            FlagValue::Str(_) => FlagType::String,
            FlagValue::Number(_) => FlagType::Number,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => {
                warn!("flag value type is not bool but {:?}", self);
                None
            }
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            FlagValue::Str(s) => Some(s.clone()),
            _ => {
                warn!("flag value type is not str but {:?}", self);
                None
            }
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FlagValue::Number(f) => Some(*f),
            _ => {
                warn!("flag value type is not number but {:?}", self);
                None
            }
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FlagValue::Number(f) => f64_to_i64_safe(*f),
            _ => None,
        }
    }

    pub fn as_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FlagValue::Bool(b) => Value::from(*b),
            FlagValue::Str(s) => Value::from(s.as_str()),
            FlagValue::Number(f) => Value::from(*f),
        }
    }
}

/// The A and B values of a flag, bound to their declared [FlagType].
///
/// Both values always share one type; a mismatched pair cannot be constructed. On the wire the
/// pair is spread over the `flagType`, `valueA` and `valueB` fields of the flag document, and a
/// document whose values disagree with `flagType` fails to deserialize.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "RawFlagValues", into = "RawFlagValues")]
pub enum FlagValues {
    Boolean { a: bool, b: bool },
    String { a: String, b: String },
    Number { a: f64, b: f64 },
}

impl FlagValues {
    pub fn boolean(a: bool, b: bool) -> Self {
        FlagValues::Boolean { a, b }
    }

    pub fn string(a: impl Into<String>, b: impl Into<String>) -> Self {
        FlagValues::String {
            a: a.into(),
            b: b.into(),
        }
    }

    pub fn number(a: f64, b: f64) -> Self {
        FlagValues::Number { a, b }
    }

    /// Build a pair from two untyped values, rejecting any value that is not of `flag_type`.
    pub fn typed(
        flag_type: FlagType,
        value_a: FlagValue,
        value_b: FlagValue,
    ) -> Result<Self, ValidationError> {
        let mismatch = |served: ServedValue, actual: &FlagValue| ValidationError::ValueTypeMismatch {
            served,
            expected: flag_type,
            actual: actual.flag_type(),
        };

        match (flag_type, value_a, value_b) {
            (FlagType::Boolean, FlagValue::Bool(a), FlagValue::Bool(b)) => Ok(Self::boolean(a, b)),
            (FlagType::String, FlagValue::Str(a), FlagValue::Str(b)) => Ok(Self::string(a, b)),
            (FlagType::Number, FlagValue::Number(a), FlagValue::Number(b)) => {
                Ok(Self::number(a, b))
            }
            (_, a, _) if a.flag_type() != flag_type => Err(mismatch(ServedValue::A, &a)),
            (_, _, b) => Err(mismatch(ServedValue::B, &b)),
        }
    }

    pub fn flag_type(&self) -> FlagType {
        match self {
            FlagValues::Boolean { .. } => FlagType::Boolean,
            FlagValues::String { .. } => FlagType::String,
            FlagValues::Number { .. } => FlagType::Number,
        }
    }

    /// The value configured for `served`.
    pub fn get(&self, served: ServedValue) -> FlagValue {
        match (self, served) {
            (FlagValues::Boolean { a, .. }, ServedValue::A) => FlagValue::Bool(*a),
            (FlagValues::Boolean { b, .. }, ServedValue::B) => FlagValue::Bool(*b),
            (FlagValues::String { a, .. }, ServedValue::A) => FlagValue::Str(a.clone()),
            (FlagValues::String { b, .. }, ServedValue::B) => FlagValue::Str(b.clone()),
            (FlagValues::Number { a, .. }, ServedValue::A) => FlagValue::Number(*a),
            (FlagValues::Number { b, .. }, ServedValue::B) => FlagValue::Number(*b),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct RawFlagValues {
    flag_type: FlagType,
    value_a: FlagValue,
    value_b: FlagValue,
}

impl TryFrom<RawFlagValues> for FlagValues {
    type Error = ValidationError;

    fn try_from(raw: RawFlagValues) -> Result<Self, Self::Error> {
        FlagValues::typed(raw.flag_type, raw.value_a, raw.value_b)
    }
}

impl From<FlagValues> for RawFlagValues {
    fn from(values: FlagValues) -> Self {
        RawFlagValues {
            flag_type: values.flag_type(),
            value_a: values.get(ServedValue::A),
            value_b: values.get(ServedValue::B),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test]
    fn float_bounds() {
        let test_cases = vec![
            (1.99, Some(1)),
            (9007199254740991.0, Some(9007199254740991)),
            (9007199254740992.0, None),
            (-1.99, Some(-1)),
            (-9007199254740991.0, Some(-9007199254740991)),
            (-9007199254740992.0, None),
        ];
        for (have, expect) in test_cases {
            assert_that!(FlagValue::Number(have).as_int()).is_equal_to(expect);
        }
    }

    #[test]
    fn accessors_reject_other_types() {
        assert_that!(FlagValue::Str("on".into()).as_bool()).is_none();
        assert_that!(FlagValue::Bool(true).as_string()).is_none();
        assert_that!(FlagValue::Bool(true).as_float()).is_none();
        assert_that!(FlagValue::Bool(true).as_bool()).contains_value(true);
    }

    #[test_case(r#"{"flagType":"boolean","valueA":true,"valueB":false}"#, FlagValues::boolean(true, false))]
    #[test_case(r#"{"flagType":"string","valueA":"red","valueB":"blue"}"#, FlagValues::string("red", "blue"))]
    #[test_case(r#"{"flagType":"number","valueA":1,"valueB":2.5}"#, FlagValues::number(1.0, 2.5))]
    fn parses_matching_values(json: &str, expected: FlagValues) {
        let values: FlagValues = serde_json::from_str(json).expect("should parse");
        assert_that!(values).is_equal_to(expected);
    }

    #[test_case(r#"{"flagType":"boolean","valueA":"true","valueB":false}"#)]
    #[test_case(r#"{"flagType":"string","valueA":"red","valueB":7}"#)]
    #[test_case(r#"{"flagType":"number","valueA":false,"valueB":2}"#)]
    fn rejects_mismatched_values(json: &str) {
        let result = serde_json::from_str::<FlagValues>(json);
        assert_that!(result.is_err()).is_true();
    }

    #[test]
    fn typed_reports_offending_slot() {
        let err = FlagValues::typed(FlagType::Number, FlagValue::Number(1.0), "2".into())
            .unwrap_err();
        assert_that!(err).is_equal_to(ValidationError::ValueTypeMismatch {
            served: ServedValue::B,
            expected: FlagType::Number,
            actual: FlagType::String,
        });
    }

    #[test]
    fn get_selects_slot() {
        let values = FlagValues::string("control", "treatment");
        assert_that!(values.get(ServedValue::A)).is_equal_to(FlagValue::from("control"));
        assert_that!(values.get(ServedValue::B)).is_equal_to(FlagValue::from("treatment"));
    }
}
