//! Dynamic value type that flows along data pins
//!
//! Values are stored exactly as received. The `as_*` accessors apply the
//! runtime coercions the engine relies on and never panic: every accessor
//! returns either a value of the requested type or a conversion error.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A dynamic value carried by a data pin, a variable or a property.
///
/// Integers and floats are kept apart so that literals survive a round trip
/// unchanged; numeric coercion treats them as the same number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / null value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Ordered array of values
    Array(Vec<Value>),
    /// Object with string keys
    Object(BTreeMap<String, Value>),
}

/// Error when coercing a value to a requested type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueConversionError {
    #[error("Expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Cannot parse '{0}' as a number")]
    InvalidNumber(String),
    #[error("Number is not finite")]
    NonFinite,
    #[error("Cannot parse '{0}' as a boolean")]
    InvalidBoolean(String),
    #[error("Cannot parse '{0}' as a date")]
    InvalidDate(String),
    #[error("Integer overflow")]
    IntegerOverflow,
}

impl Value {
    /// Name of the dynamic type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Borrow as a string slice without coercion
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view without string parsing (int widened to float)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get a field from an object
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    /// Resolve a dotted property path (`a.b.0.c`) through objects and arrays
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |current, segment| match current {
            Value::Object(fields) => fields.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Rough byte footprint, used by the resource monitor's memory sampling
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Null | Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 8,
            Value::String(s) => s.len(),
            Value::Array(items) => 8 + items.iter().map(Value::approx_size).sum::<usize>(),
            Value::Object(fields) => {
                8 + fields
                    .iter()
                    .map(|(k, v)| k.len() + v.approx_size())
                    .sum::<usize>()
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coercing Accessors
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    fn mismatch(&self, expected: &'static str) -> ValueConversionError {
        ValueConversionError::TypeMismatch {
            expected,
            actual: self.type_name(),
        }
    }

    /// Coerce to a string. Numbers are formatted as decimals.
    pub fn as_string(&self) -> Result<String, ValueConversionError> {
        match self {
            Value::String(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(format_number(*f)),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(self.mismatch("string")),
        }
    }

    /// Coerce to a finite number. Strings are parsed as decimals.
    pub fn as_number(&self) -> Result<f64, ValueConversionError> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) if f.is_finite() => Ok(*f),
            Value::Float(_) => Err(ValueConversionError::NonFinite),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => parse_number(s),
            _ => Err(self.mismatch("number")),
        }
    }

    /// Coerce to an integer; floats must have no fractional part
    pub fn as_integer(&self) -> Result<i64, ValueConversionError> {
        match self {
            Value::Int(i) => Ok(*i),
            _ => {
                let n = self.as_number()?;
                if n.fract() != 0.0 {
                    return Err(self.mismatch("integer"));
                }
                if n < i64::MIN as f64 || n > i64::MAX as f64 {
                    return Err(ValueConversionError::IntegerOverflow);
                }
                Ok(n as i64)
            }
        }
    }

    /// Coerce to a boolean.
    ///
    /// Strings accept `true/yes/1/on` and `false/no/0/off/""` case-insensitively;
    /// numbers are false only when zero.
    pub fn as_boolean(&self) -> Result<bool, ValueConversionError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Float(f) => Ok(*f != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" | "" => Ok(false),
                _ => Err(ValueConversionError::InvalidBoolean(s.clone())),
            },
            _ => Err(self.mismatch("boolean")),
        }
    }

    /// Coerce to an array. Objects yield their values; iteration order of
    /// object values is not part of the contract.
    pub fn as_array(&self) -> Result<Vec<Value>, ValueConversionError> {
        match self {
            Value::Array(items) => Ok(items.clone()),
            Value::Object(fields) => Ok(fields.values().cloned().collect()),
            _ => Err(self.mismatch("array")),
        }
    }

    /// Coerce to an object. Arrays become objects keyed `"0"`, `"1"`, ...
    pub fn as_object(&self) -> Result<BTreeMap<String, Value>, ValueConversionError> {
        match self {
            Value::Object(fields) => Ok(fields.clone()),
            Value::Array(items) => Ok(items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect()),
            _ => Err(self.mismatch("object")),
        }
    }

    /// Coerce to a UTC timestamp.
    ///
    /// Accepts RFC3339, RFC2822, a few common layouts, or integer Unix time
    /// (ten digits or fewer are seconds, longer values are milliseconds).
    pub fn as_date(&self) -> Result<DateTime<Utc>, ValueConversionError> {
        match self {
            Value::Int(i) => unix_to_date(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => unix_to_date(*f as i64),
            Value::String(s) => parse_date(s.trim()),
            _ => Err(self.mismatch("date")),
        }
    }
}

fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

fn parse_number(s: &str) -> Result<f64, ValueConversionError> {
    let n: f64 = s
        .trim()
        .parse()
        .map_err(|_| ValueConversionError::InvalidNumber(s.to_string()))?;
    if n.is_finite() {
        Ok(n)
    } else {
        Err(ValueConversionError::NonFinite)
    }
}

const DATE_TIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

fn parse_date(s: &str) -> Result<DateTime<Utc>, ValueConversionError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for layout in DATE_TIME_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    for layout in DATE_LAYOUTS {
        if let Ok(date) = NaiveDate::parse_from_str(s, layout) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&naive));
            }
        }
    }
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = s.parse::<i64>() {
            return unix_to_date(i);
        }
    }
    Err(ValueConversionError::InvalidDate(s.to_string()))
}

fn unix_to_date(i: i64) -> Result<DateTime<Utc>, ValueConversionError> {
    let digits = i.unsigned_abs().to_string().len();
    let parsed = if digits <= 10 {
        Utc.timestamp_opt(i, 0).single()
    } else {
        Utc.timestamp_millis_opt(i).single()
    };
    parsed.ok_or_else(|| ValueConversionError::InvalidDate(i.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Comparison
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    /// Equality used by switch-style comparisons.
    ///
    /// Same dynamic types compare by value (deeply for arrays and objects);
    /// ints and floats compare numerically; all other cross-type pairs are
    /// unequal. String representations are never compared across types.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.as_f64() == b.as_f64(),
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.loose_eq(other)))
            }
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Value::Object(fields)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(fields: HashMap<String, Value>) -> Self {
        Value::Object(fields.into_iter().collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// serde_json::Value Interop
// ─────────────────────────────────────────────────────────────────────────────

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_string_number_coercion() {
        assert_eq!(Value::from("42.5").as_number(), Ok(42.5));
        assert_eq!(Value::from(8.0).as_string(), Ok("8".to_string()));
        assert_eq!(Value::from(2.5).as_string(), Ok("2.5".to_string()));
        assert!(Value::from("NaN").as_number().is_err());
        assert!(Value::from("inf").as_number().is_err());
        assert!(Value::from("abc").as_number().is_err());
    }

    #[test]
    fn test_boolean_coercion() {
        for s in ["true", "YES", "1", "On"] {
            assert_eq!(Value::from(s).as_boolean(), Ok(true), "{s}");
        }
        for s in ["false", "No", "0", "off", ""] {
            assert_eq!(Value::from(s).as_boolean(), Ok(false), "{s}");
        }
        assert!(Value::from("maybe").as_boolean().is_err());
        assert_eq!(Value::from(0).as_boolean(), Ok(false));
        assert_eq!(Value::from(-3.0).as_boolean(), Ok(true));
    }

    #[test]
    fn test_array_object_coercion() {
        let arr = Value::from(vec![10, 20]);
        let obj = arr.as_object().unwrap();
        assert_eq!(obj.get("0"), Some(&Value::Int(10)));
        assert_eq!(obj.get("1"), Some(&Value::Int(20)));

        let back = Value::Object(obj).as_array().unwrap();
        assert_eq!(back.len(), 2);
        assert!(Value::from(3).as_array().is_err());
    }

    #[test]
    fn test_date_coercion() {
        let d = Value::from("2024-03-01T12:00:00Z").as_date().unwrap();
        assert_eq!(d.year(), 2024);
        let d = Value::from("2024-03-01").as_date().unwrap();
        assert_eq!(d.month(), 3);
        let secs = Value::from(1_700_000_000i64).as_date().unwrap();
        let millis = Value::from(1_700_000_000_000i64).as_date().unwrap();
        assert_eq!(secs, millis);
        assert!(Value::from("not a date").as_date().is_err());
    }

    #[test]
    fn test_accessors_never_return_both() {
        let samples = vec![
            Value::Null,
            Value::from(true),
            Value::from(1),
            Value::from(1.5),
            Value::from("x"),
            Value::from(vec![1]),
            Value::Object(BTreeMap::new()),
        ];
        for v in samples {
            // Result makes "both" unrepresentable; this checks none of them panic.
            let _ = v.as_string();
            let _ = v.as_number();
            let _ = v.as_boolean();
            let _ = v.as_array();
            let _ = v.as_object();
            let _ = v.as_date();
        }
    }

    #[test]
    fn test_loose_eq() {
        assert!(Value::Null.loose_eq(&Value::Null));
        assert!(Value::Int(8).loose_eq(&Value::Float(8.0)));
        assert!(!Value::from("8").loose_eq(&Value::Int(8)));
        assert!(!Value::from(true).loose_eq(&Value::Int(1)));
        assert!(Value::from(vec![1, 2]).loose_eq(&Value::from(vec![1.0, 2.0])));
    }

    #[test]
    fn test_get_path() {
        let v: Value = serde_json::json!({"a": {"b": [{"c": 3}]}}).into();
        assert_eq!(v.get_path("a.b.0.c"), Some(&Value::Int(3)));
        assert_eq!(v.get_path("a.x"), None);
    }

    #[test]
    fn test_json_roundtrip() {
        let original: Value = serde_json::json!({"k": 1, "s": "x", "f": 2.5}).into();
        let json: serde_json::Value = original.clone().into();
        let back: Value = json.into();
        assert_eq!(original, back);

        let parsed: Value = serde_json::from_str(r#"[1, 2.5, null, "a"]"#).unwrap();
        assert_eq!(
            parsed,
            Value::Array(vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::Null,
                Value::from("a")
            ])
        );
    }
}
