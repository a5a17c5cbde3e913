//! Deterministic value coercion
//!
//! LLM output is string-shaped even when the capability wants a number.
//! The coercer turns `(raw value, target semantic type)` into a typed
//! JSON value or a field-level [`CoercionError`] that Layer 2 reports
//! upward. All coercions are deterministic and locale-free; numeric
//! precision is preserved within IEEE-754 double range, and integers
//! beyond that range fail rather than silently round.

use capstan_kernel::service::SemanticType;
use thiserror::Error;

/// A failed coercion, carrying everything Layer 3 needs to repair it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field '{field}' expected {expected} but got '{lexeme}'")]
pub struct CoercionError {
    /// The field being coerced.
    pub field: String,
    /// The declared semantic type.
    pub expected: SemanticType,
    /// The rejected input, abbreviated for error payloads.
    pub lexeme: String,
}

impl CoercionError {
    fn new(field: &str, expected: SemanticType, raw: &serde_json::Value) -> Self {
        let rendered = match raw {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let lexeme = if rendered.chars().count() > 120 {
            let mut truncated: String = rendered.chars().take(120).collect();
            truncated.push('…');
            truncated
        } else {
            rendered
        };
        Self {
            field: field.to_string(),
            expected,
            lexeme,
        }
    }
}

/// Largest integer magnitude exactly representable as an IEEE-754 double.
const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_992; // 2^53

/// Coerce one value to its declared semantic type.
///
/// Values already inhabiting the target type pass through unchanged;
/// strings are parsed per the type's grammar; everything else fails.
pub fn coerce(
    field: &str,
    raw: &serde_json::Value,
    target: SemanticType,
) -> Result<serde_json::Value, CoercionError> {
    use serde_json::Value;

    if target.admits(raw) {
        return Ok(raw.clone());
    }

    let err = || CoercionError::new(field, target, raw);

    match (target, raw) {
        (SemanticType::Number, Value::String(s)) => {
            let parsed: f64 = s.trim().parse().map_err(|_| err())?;
            if !parsed.is_finite() {
                return Err(err());
            }
            serde_json::Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(err)
        }
        (SemanticType::Integer, Value::String(s)) => {
            let trimmed = s.trim();
            let parsed: i64 = trimmed.parse().map_err(|_| err())?;
            // unsigned_abs: `abs()` would overflow on i64::MIN.
            if parsed.unsigned_abs() > MAX_SAFE_INTEGER as u64 {
                return Err(err());
            }
            Ok(Value::Number(parsed.into()))
        }
        // A float-shaped number that is integral coerces to integer.
        (SemanticType::Integer, Value::Number(n)) => {
            let as_float = n.as_f64().ok_or_else(err)?;
            if as_float.fract() != 0.0 || as_float.abs() > MAX_SAFE_INTEGER as f64 {
                return Err(err());
            }
            Ok(Value::Number((as_float as i64).into()))
        }
        (SemanticType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(err()),
        },
        (SemanticType::Array, Value::String(s)) => {
            let parsed: Value = serde_json::from_str(s.trim()).map_err(|_| err())?;
            parsed.is_array().then_some(parsed).ok_or_else(err)
        }
        (SemanticType::Object, Value::String(s)) => {
            let parsed: Value = serde_json::from_str(s.trim()).map_err(|_| err())?;
            parsed.is_object().then_some(parsed).ok_or_else(err)
        }
        // Number → string is the one non-string source coercion the
        // planner produces in practice (`"zoom": 11` for a string field).
        (SemanticType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (SemanticType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),
        _ => Err(err()),
    }
}
