//! Parameter extraction, validation and type coercion.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;

use crate::catalog::QueryDefinition;
use crate::value::{ParamType, ParamValue, DATETIME_FORMAT, DATE_FORMAT};

/// Parameter name → coerced value, for every parameter that resolved.
pub type ResolvedParams = BTreeMap<String, ParamValue>;

/// Collected per-parameter validation failures (name → message).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn insert(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.0.insert(name.into(), message.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Boolean literals accepted for `boolean` parameters
fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(format!("invalid boolean literal {raw:?}")),
    }
}

/// Coerce one raw string into the declared type.
pub fn coerce_value(raw: &str, param_type: &ParamType) -> Result<ParamValue, String> {
    match param_type {
        ParamType::String | ParamType::Other(_) => Ok(ParamValue::String(raw.to_string())),
        ParamType::Integer => raw
            .parse::<i64>()
            .map(ParamValue::Integer)
            .map_err(|e| e.to_string()),
        ParamType::Number => {
            let n = raw.parse::<f64>().map_err(|e| e.to_string())?;
            if n.is_finite() {
                Ok(ParamValue::Number(n))
            } else {
                Err(format!("{raw:?} is not a finite number"))
            }
        }
        ParamType::Boolean => parse_bool(raw).map(ParamValue::Boolean),
        ParamType::Date => {
            if !date_shape().is_match(raw) {
                return Err(format!("{raw:?} does not match YYYY-MM-DD"));
            }
            NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map(ParamValue::Date)
                .map_err(|e| format!("{e} (want YYYY-MM-DD)"))
        }
        ParamType::DateTime => {
            if !datetime_shape().is_match(raw) {
                return Err(format!("{raw:?} does not match YYYY-MM-DD HH:MM:SS"));
            }
            let dt = NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
                .map_err(|e| format!("{e} (want YYYY-MM-DD HH:MM:SS)"))?;
            // chrono represents second 60 as a leap-second nanosecond overflow
            if dt.nanosecond() >= 1_000_000_000 {
                return Err("second out of range".to_string());
            }
            Ok(ParamValue::DateTime(dt))
        }
    }
}

// chrono's parser accepts short fields and signed years; the wire format is fixed-width.
fn date_shape() -> &'static Regex {
    static DATE: OnceLock<Regex> = OnceLock::new();
    DATE.get_or_init(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("valid date pattern"))
}

fn datetime_shape() -> &'static Regex {
    static DATETIME: OnceLock<Regex> = OnceLock::new();
    DATETIME.get_or_init(|| {
        Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2}$").expect("valid datetime pattern")
    })
}

/// Resolve every declared parameter of `definition` from the raw query string.
///
/// Failures are collected across all parameters rather than stopping at the
/// first. An empty raw value counts as absent.
pub fn resolve_parameters(
    definition: &QueryDefinition,
    raw: &HashMap<String, String>,
) -> Result<ResolvedParams, ValidationErrors> {
    let mut resolved = ResolvedParams::new();
    let mut errors = ValidationErrors::default();

    for param in &definition.parameters {
        let supplied = raw.get(&param.name).map(String::as_str).filter(|v| !v.is_empty());

        let value = match (supplied, &param.default_value) {
            (Some(value), _) => value,
            (None, _) if param.required => {
                errors.insert(&param.name, "required parameter not provided");
                continue;
            }
            (None, Some(default)) => default.as_str(),
            (None, None) => continue,
        };

        match coerce_value(value, &param.param_type) {
            Ok(coerced) => {
                resolved.insert(param.name.clone(), coerced);
            }
            Err(e) => errors.insert(
                &param.name,
                format!("invalid type: expected {}, error: {e}", param.param_type),
            ),
        }
    }

    if errors.is_empty() {
        Ok(resolved)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_integer_coercion() {
        assert_eq!(
            coerce_value("42", &ParamType::Integer),
            Ok(ParamValue::Integer(42))
        );
        assert_eq!(
            coerce_value("-7", &ParamType::Integer),
            Ok(ParamValue::Integer(-7))
        );
        assert!(coerce_value("4.2", &ParamType::Integer).is_err());
        assert!(coerce_value("abc", &ParamType::Integer).is_err());
    }

    #[test]
    fn test_number_coercion_rejects_non_finite() {
        assert_eq!(
            coerce_value("2.5", &ParamType::Number),
            Ok(ParamValue::Number(2.5))
        );
        assert!(coerce_value("NaN", &ParamType::Number).is_err());
        assert!(coerce_value("inf", &ParamType::Number).is_err());
    }

    #[test]
    fn test_boolean_literals() {
        for lit in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(
                coerce_value(lit, &ParamType::Boolean),
                Ok(ParamValue::Boolean(true))
            );
        }
        for lit in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(
                coerce_value(lit, &ParamType::Boolean),
                Ok(ParamValue::Boolean(false))
            );
        }
        assert!(coerce_value("yes", &ParamType::Boolean).is_err());
        assert!(coerce_value("tRuE", &ParamType::Boolean).is_err());
    }

    #[test]
    fn test_date_and_datetime_patterns() {
        let d = coerce_value("2024-02-29", &ParamType::Date).unwrap();
        assert_eq!(d.to_string(), "2024-02-29");
        assert!(coerce_value("2023-02-29", &ParamType::Date).is_err());
        assert!(coerce_value("29/02/2024", &ParamType::Date).is_err());

        let dt = coerce_value("2024-02-29 13:45:00", &ParamType::DateTime).unwrap();
        assert_eq!(dt.to_string(), "2024-02-29 13:45:00");
        assert!(coerce_value("2024-02-29T13:45:00", &ParamType::DateTime).is_err());
    }

    #[test]
    fn test_date_fields_must_be_fixed_width() {
        for raw in ["2024-1-5", "24-01-05", "+2024-01-05", "2024-01-05 ", "02024-01-05"] {
            assert!(
                coerce_value(raw, &ParamType::Date).is_err(),
                "{raw:?} should be rejected"
            );
        }
        for raw in [
            "2024-01-05 1:2:3",
            "2024-1-05 01:02:03",
            "2024-01-05 23:59:60",
            "2024-01-05  01:02:03",
        ] {
            assert!(
                coerce_value(raw, &ParamType::DateTime).is_err(),
                "{raw:?} should be rejected"
            );
        }
        assert!(coerce_value("2024-01-05 23:59:59", &ParamType::DateTime).is_ok());
    }

    #[test]
    fn test_unknown_type_falls_back_to_string() {
        let ty = ParamType::parse("uuid");
        assert_eq!(
            coerce_value("abc", &ty),
            Ok(ParamValue::String("abc".to_string()))
        );
    }

    #[test]
    fn test_required_missing_is_reported() {
        let def = definition(
            "employees-by-department",
            vec![param("department", "integer", 1, true)],
        );
        let errors = resolve_parameters(&def, &raw(&[])).unwrap_err();
        assert!(errors.contains("department"));
        assert_eq!(
            errors.get("department"),
            Some("required parameter not provided")
        );
    }

    #[test]
    fn test_empty_value_counts_as_absent() {
        let def = definition("q", vec![param("department", "integer", 1, true)]);
        let errors = resolve_parameters(&def, &raw(&[("department", "")])).unwrap_err();
        assert!(errors.contains("department"));
    }

    #[test]
    fn test_invalid_integer_cites_type() {
        let def = definition("q", vec![param("department", "integer", 1, true)]);
        let errors = resolve_parameters(&def, &raw(&[("department", "abc")])).unwrap_err();
        let message = errors.get("department").unwrap();
        assert!(message.contains("integer"), "got: {message}");
    }

    #[test]
    fn test_errors_are_collected_not_fail_fast() {
        let def = definition(
            "q",
            vec![
                param("a", "integer", 1, true),
                param("b", "date", 2, true),
                param("c", "boolean", 3, false),
            ],
        );
        let errors =
            resolve_parameters(&def, &raw(&[("b", "not-a-date"), ("c", "maybe")])).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains("a"));
        assert!(errors.contains("b"));
        assert!(errors.contains("c"));
    }

    #[test]
    fn test_optional_without_default_is_unset() {
        let def = definition(
            "q",
            vec![param("a", "integer", 1, true), param("b", "string", 2, false)],
        );
        let resolved = resolve_parameters(&def, &raw(&[("a", "1")])).unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(!resolved.contains_key("b"));
    }

    #[test]
    fn test_default_is_coerced_like_input() {
        let mut p = param("limit", "integer", 1, false);
        p.default_value = Some("100".to_string());
        let def = definition("q", vec![p]);

        let resolved = resolve_parameters(&def, &raw(&[])).unwrap();
        assert_eq!(resolved["limit"], ParamValue::Integer(100));

        let resolved = resolve_parameters(&def, &raw(&[("limit", "5")])).unwrap();
        assert_eq!(resolved["limit"], ParamValue::Integer(5));
    }

    #[test]
    fn test_bad_default_is_validation_error() {
        let mut p = param("limit", "integer", 1, false);
        p.default_value = Some("lots".to_string());
        let def = definition("q", vec![p]);
        assert!(resolve_parameters(&def, &raw(&[])).unwrap_err().contains("limit"));
    }

    #[test]
    fn test_required_ignores_default() {
        let mut p = param("a", "integer", 1, true);
        p.default_value = Some("1".to_string());
        let def = definition("q", vec![p]);
        assert!(resolve_parameters(&def, &raw(&[])).is_err());
    }

    #[test]
    fn test_undeclared_params_are_ignored() {
        let def = definition("q", vec![param("a", "integer", 1, true)]);
        let resolved =
            resolve_parameters(&def, &raw(&[("a", "3"), ("utm_source", "mail")])).unwrap();
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn test_validation_errors_display() {
        let mut errors = ValidationErrors::default();
        errors.insert("b", "bad");
        errors.insert("a", "missing");
        assert_eq!(errors.to_string(), "a: missing; b: bad");
    }
}
