//! Parameter Value Types
//!
//! Typed values flowing from the HTTP query string into cache keys, positional
//! arguments and response metadata.
//!
//! ## Design
//!
//! Request parameters arrive as raw strings. Coercion produces a [`ParamValue`],
//! a tagged variant that keeps the declared type through every later stage
//! instead of erasing it into a dynamically-typed container.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Pattern for `date` parameters.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Pattern for `datetime` parameters.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One result row: column name → value, in result-set column order.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Declared type of a catalog parameter.
///
/// Unrecognized labels are preserved verbatim in `Other` and coerced as
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    DateTime,
    Other(String),
}

impl ParamType {
    /// Parse a catalog type label. Labels match exactly.
    pub fn parse(label: &str) -> Self {
        match label {
            "string" => ParamType::String,
            "integer" => ParamType::Integer,
            "number" => ParamType::Number,
            "boolean" => ParamType::Boolean,
            "date" => ParamType::Date,
            "datetime" => ParamType::DateTime,
            _ => ParamType::Other(label.to_string()),
        }
    }

    /// Catalog label for this type
    pub fn as_str(&self) -> &str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Date => "date",
            ParamType::DateTime => "datetime",
            ParamType::Other(label) => label,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ParamType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ParamType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(ParamType::parse(&label))
    }
}

/// A coerced parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl ParamValue {
    /// Type tag of this value
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::String(_) => ParamType::String,
            ParamValue::Integer(_) => ParamType::Integer,
            ParamValue::Number(_) => ParamType::Number,
            ParamValue::Boolean(_) => ParamType::Boolean,
            ParamValue::Date(_) => ParamType::Date,
            ParamValue::DateTime(_) => ParamType::DateTime,
        }
    }

    /// JSON representation used in response metadata and audit records.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::String(s) => serde_json::Value::String(s.clone()),
            ParamValue::Integer(i) => serde_json::json!(i),
            ParamValue::Number(n) => serde_json::json!(n),
            ParamValue::Boolean(b) => serde_json::Value::Bool(*b),
            ParamValue::Date(d) => serde_json::Value::String(d.format(DATE_FORMAT).to_string()),
            ParamValue::DateTime(dt) => {
                serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string())
            }
        }
    }
}

/// Canonical text form, used for cache keys.
impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => f.write_str(s),
            ParamValue::Integer(i) => write!(f, "{i}"),
            ParamValue::Number(n) => write!(f, "{n}"),
            ParamValue::Boolean(b) => write!(f, "{b}"),
            ParamValue::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            ParamValue::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_type_parse_known_labels() {
        assert_eq!(ParamType::parse("integer"), ParamType::Integer);
        assert_eq!(ParamType::parse("datetime"), ParamType::DateTime);
        assert_eq!(ParamType::parse("boolean"), ParamType::Boolean);
    }

    #[test]
    fn test_param_type_labels_match_exactly() {
        assert_eq!(ParamType::parse("Integer"), ParamType::Other("Integer".to_string()));
        assert_eq!(ParamType::parse(" integer "), ParamType::Other(" integer ".to_string()));
        assert_eq!(ParamType::parse("DATE"), ParamType::Other("DATE".to_string()));
    }

    #[test]
    fn test_param_type_unknown_label_is_preserved() {
        let ty = ParamType::parse("uuid");
        assert_eq!(ty, ParamType::Other("uuid".to_string()));
        assert_eq!(ty.to_string(), "uuid");
    }

    #[test]
    fn test_param_type_serde_uses_label() {
        let json = serde_json::to_string(&ParamType::Number).unwrap();
        assert_eq!(json, "\"number\"");
        let back: ParamType = serde_json::from_str("\"date\"").unwrap();
        assert_eq!(back, ParamType::Date);
    }

    #[test]
    fn test_display_for_cache_keys() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(ParamValue::Date(date).to_string(), "2024-03-09");

        let dt = date.and_hms_opt(7, 5, 0).unwrap();
        assert_eq!(ParamValue::DateTime(dt).to_string(), "2024-03-09 07:05:00");

        assert_eq!(ParamValue::Number(2.5).to_string(), "2.5");
        assert_eq!(ParamValue::Boolean(false).to_string(), "false");
    }

    #[test]
    fn test_serialize_as_bare_json() {
        let values = vec![
            ParamValue::Integer(10),
            ParamValue::String("x".to_string()),
            ParamValue::Boolean(true),
            ParamValue::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()),
        ];
        let json = serde_json::to_value(&values).unwrap();
        assert_eq!(json, serde_json::json!([10, "x", true, "2024-01-31"]));
    }

    #[test]
    fn test_param_type_of_value() {
        assert_eq!(ParamValue::Integer(1).param_type(), ParamType::Integer);
        assert_eq!(
            ParamValue::String(String::new()).param_type(),
            ParamType::String
        );
    }
}
