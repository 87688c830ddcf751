//! VSS leaf datatypes and typed values.
//!
//! Values arrive as dynamic JSON and are coerced once, at the leaf boundary,
//! where the declared datatype is known. The tree stores the typed value,
//! never the raw JSON node.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Datatypes a VSS leaf may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Boolean,
    String,
}

impl Datatype {
    /// Parse the lowercase VSS notation ("uint8", "boolean", ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uint8" => Some(Self::Uint8),
            "uint16" => Some(Self::Uint16),
            "uint32" => Some(Self::Uint32),
            "uint64" => Some(Self::Uint64),
            "int8" => Some(Self::Int8),
            "int16" => Some(Self::Int16),
            "int32" => Some(Self::Int32),
            "int64" => Some(Self::Int64),
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            "boolean" => Some(Self::Boolean),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float => "float",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::String => "string",
        }
    }

    /// The inclusive integer range for integer datatypes, `None` otherwise.
    fn integer_range(&self) -> Option<(i128, i128)> {
        match self {
            Self::Uint8 => Some((0, u8::MAX as i128)),
            Self::Uint16 => Some((0, u16::MAX as i128)),
            Self::Uint32 => Some((0, u32::MAX as i128)),
            Self::Uint64 => Some((0, u64::MAX as i128)),
            Self::Int8 => Some((i8::MIN as i128, i8::MAX as i128)),
            Self::Int16 => Some((i16::MIN as i128, i16::MAX as i128)),
            Self::Int32 => Some((i32::MIN as i128, i32::MAX as i128)),
            Self::Int64 => Some((i64::MIN as i128, i64::MAX as i128)),
            _ => None,
        }
    }

    fn is_unsigned(&self) -> bool {
        matches!(self, Self::Uint8 | Self::Uint16 | Self::Uint32 | Self::Uint64)
    }
}

impl std::fmt::Display for Datatype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A value stored at a leaf, already coerced to the declared datatype.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Text(String),
}

impl SignalValue {
    /// Render the typed value back into JSON for responses and events.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Uint(u) => Value::from(*u),
            // stored floats are always finite, from_f64 cannot fail on them
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

/// Coerce a JSON value into the declared datatype, enforcing the datatype's
/// own range plus any leaf-declared `min`/`max` bounds and `enum` list.
pub fn coerce(
    datatype: Datatype,
    value: &Value,
    min: Option<f64>,
    max: Option<f64>,
    allowed: Option<&[String]>,
) -> Result<SignalValue, CoreError> {
    match datatype {
        Datatype::Boolean => value
            .as_bool()
            .map(SignalValue::Bool)
            .ok_or_else(|| mismatch(datatype, value)),
        Datatype::String => {
            let s = value.as_str().ok_or_else(|| mismatch(datatype, value))?;
            if let Some(allowed) = allowed {
                if !allowed.iter().any(|a| a == s) {
                    return Err(CoreError::OutOfBounds(format!(
                        "value \"{s}\" is not in the enum declared for this signal"
                    )));
                }
            }
            Ok(SignalValue::Text(s.to_string()))
        }
        Datatype::Float | Datatype::Double => {
            let n = value.as_f64().ok_or_else(|| mismatch(datatype, value))?;
            if !n.is_finite() {
                return Err(CoreError::OutOfBounds(format!(
                    "value {n} is not a finite number"
                )));
            }
            check_declared_bounds(n, min, max)?;
            Ok(SignalValue::Float(n))
        }
        _ => {
            let n = as_integer(value).ok_or_else(|| mismatch(datatype, value))?;
            let (lo, hi) = datatype
                .integer_range()
                .ok_or_else(|| CoreError::Generic(format!("{datatype} has no integer range")))?;
            if n < lo || n > hi {
                return Err(CoreError::OutOfBounds(format!(
                    "value {n} is out of bounds for datatype {datatype}"
                )));
            }
            check_declared_bounds(n as f64, min, max)?;
            if datatype.is_unsigned() {
                Ok(SignalValue::Uint(n as u64))
            } else {
                Ok(SignalValue::Int(n as i64))
            }
        }
    }
}

/// Extract an integral value from JSON. Whole-number floats are accepted,
/// fractional ones are a type mismatch.
fn as_integer(value: &Value) -> Option<i128> {
    if let Some(i) = value.as_i64() {
        return Some(i as i128);
    }
    if let Some(u) = value.as_u64() {
        return Some(u as i128);
    }
    let f = value.as_f64()?;
    if f.is_finite() && f.fract() == 0.0 && (i64::MIN as f64..=u64::MAX as f64).contains(&f) {
        Some(f as i128)
    } else {
        None
    }
}

fn check_declared_bounds(n: f64, min: Option<f64>, max: Option<f64>) -> Result<(), CoreError> {
    if let Some(min) = min {
        if n < min {
            return Err(CoreError::OutOfBounds(format!(
                "value {n} is below the declared minimum {min}"
            )));
        }
    }
    if let Some(max) = max {
        if n > max {
            return Err(CoreError::OutOfBounds(format!(
                "value {n} is above the declared maximum {max}"
            )));
        }
    }
    Ok(())
}

fn mismatch(datatype: Datatype, value: &Value) -> CoreError {
    CoreError::TypeMismatch(format!(
        "value {value} does not match the declared datatype {datatype}"
    ))
}
