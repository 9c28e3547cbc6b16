//! Typed values that cross the boundary between scripts and persisted schema rows.
//!
//! Persisted rows store every value as a string; a run turns those strings back into
//! typed values according to the declared [`ValueType`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Number,
    String,
    Boolean,
    Object,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "number" => Some(Self::Number),
            "string" => Some(Self::String),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("cannot read {raw:?} as {expected}: {reason}")]
pub struct CoercionError {
    pub raw: String,
    pub expected: ValueType,
    pub reason: String,
}

/// A declared value after resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum DeclaredValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Structured(serde_json::Value),
}

impl DeclaredValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Number(_) => ValueType::Number,
            Self::Text(_) => ValueType::String,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Structured(_) => ValueType::Object,
        }
    }

    /// String form stored in persisted rows.
    pub fn encode(&self) -> String {
        match self {
            Self::Number(n) => format_number(*n),
            Self::Text(s) => s.clone(),
            Self::Boolean(b) => b.to_string(),
            Self::Structured(json) => json.to_string(),
        }
    }

    /// Reads a persisted string as `value_type`.
    pub fn coerce(raw: &str, value_type: ValueType) -> Result<Self, CoercionError> {
        let fail = |reason: &str| CoercionError {
            raw: raw.to_string(),
            expected: value_type,
            reason: reason.to_string(),
        };

        match value_type {
            ValueType::Number => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(fail("empty string"));
                }
                if let Some((digits, radix)) = radix_digits(trimmed) {
                    return u64::from_str_radix(digits, radix)
                        .map(|n| Self::Number(n as f64))
                        .map_err(|e| fail(&e.to_string()));
                }
                match trimmed {
                    "NaN" => Ok(Self::Number(f64::NAN)),
                    "Infinity" | "+Infinity" => Ok(Self::Number(f64::INFINITY)),
                    "-Infinity" => Ok(Self::Number(f64::NEG_INFINITY)),
                    _ => {
                        let looks_numeric = trimmed
                            .chars()
                            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
                        if !looks_numeric {
                            return Err(fail("not a number"));
                        }
                        trimmed
                            .parse::<f64>()
                            .map(Self::Number)
                            .map_err(|e| fail(&e.to_string()))
                    }
                }
            }
            ValueType::Boolean => Ok(Self::Boolean(raw == "true")),
            ValueType::Object => serde_json::from_str(raw)
                .map(Self::Structured)
                .map_err(|e| fail(&e.to_string())),
            ValueType::String => Ok(Self::Text(raw.to_string())),
        }
    }
}

/// Splits a `0x`, `0o` or `0b` literal into its digits and radix.
fn radix_digits(s: &str) -> Option<(&str, u32)> {
    [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)]
        .into_iter()
        .find_map(|(prefix, radix)| s.strip_prefix(prefix).map(|digits| (digits, radix)))
        .filter(|(digits, _)| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_alphanumeric()))
}

/// Formats a number the way scripts print it: integers without a fraction, `NaN`,
/// `Infinity` and exponent notation outside `[1e-6, 1e21)`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }

    let abs = n.abs();
    if abs >= 1e21 || abs < 1e-6 {
        let formatted = format!("{:e}", n);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => formatted,
        };
    }

    // Display keeps the shortest round-trip digits and zero-pads large integers.
    format!("{}", n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_numbers_like_scripts_do() {
        assert_eq!(format_number(20.0), "20");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(123456789012345680000.0), "123456789012345680000");
        assert_eq!(format_number(2f64.powi(53) + 2.0), "9007199254740994");
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(0.000001), "0.000001");
        assert_eq!(format_number(1.5e-7), "1.5e-7");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn coerces_persisted_strings() {
        assert_eq!(
            DeclaredValue::coerce("5", ValueType::Number),
            Ok(DeclaredValue::Number(5.0))
        );
        assert_eq!(
            DeclaredValue::coerce(" 1.25 ", ValueType::Number),
            Ok(DeclaredValue::Number(1.25))
        );
        assert_eq!(
            DeclaredValue::coerce("0x10", ValueType::Number),
            Ok(DeclaredValue::Number(16.0))
        );
        assert_eq!(
            DeclaredValue::coerce("0b101", ValueType::Number),
            Ok(DeclaredValue::Number(5.0))
        );
        assert_eq!(
            DeclaredValue::coerce("true", ValueType::Boolean),
            Ok(DeclaredValue::Boolean(true))
        );
        assert_eq!(
            DeclaredValue::coerce("yes", ValueType::Boolean),
            Ok(DeclaredValue::Boolean(false))
        );
        assert_eq!(
            DeclaredValue::coerce("abc", ValueType::String),
            Ok(DeclaredValue::Text("abc".to_string()))
        );
        assert_eq!(
            DeclaredValue::coerce(r#"{"default":3}"#, ValueType::Object),
            Ok(DeclaredValue::Structured(serde_json::json!({"default": 3})))
        );
    }

    #[test]
    fn coercion_failures_are_reported() {
        assert!(DeclaredValue::coerce("abc", ValueType::Number).is_err());
        assert!(DeclaredValue::coerce("", ValueType::Number).is_err());
        assert!(DeclaredValue::coerce("inf", ValueType::Number).is_err());
        assert!(DeclaredValue::coerce("0x1g", ValueType::Number).is_err());
        assert!(DeclaredValue::coerce("-0x10", ValueType::Number).is_err());
        assert!(DeclaredValue::coerce("{broken", ValueType::Object).is_err());
    }

    #[test]
    fn encodes_per_type() {
        assert_eq!(DeclaredValue::Number(40.0).encode(), "40");
        assert_eq!(DeclaredValue::Boolean(false).encode(), "false");
        assert_eq!(DeclaredValue::Text("USA".into()).encode(), "USA");
        assert_eq!(
            DeclaredValue::Structured(serde_json::json!({"default": 0})).encode(),
            r#"{"default":0}"#
        );
    }
}
