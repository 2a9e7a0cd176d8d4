//! Argument coercion: untrusted model arguments to declared parameter types.
//!
//! Pure and deterministic. Absent or null optional arguments stay absent;
//! absent required arguments fail before any request is built.

use super::param::{ParamKind, ParameterSpec};
use crate::error::ValidationError;
use serde_json::{Map, Number, Value};
use tracing::debug;

/// Coerce a raw argument map against a tool's parameter list.
///
/// Keys the tool does not declare are dropped. The output preserves
/// parameter order.
pub fn coerce_arguments(
    params: &[ParameterSpec],
    args: &Map<String, Value>,
) -> Result<Map<String, Value>, ValidationError> {
    for key in args.keys() {
        if !params.iter().any(|p| &p.name == key) {
            debug!("Dropping undeclared argument '{}'", key);
        }
    }

    let mut out = Map::new();
    for param in params {
        match args.get(&param.name) {
            None | Some(Value::Null) => {
                if param.required {
                    return Err(ValidationError::MissingRequired(param.name.clone()));
                }
            }
            Some(value) => {
                out.insert(param.name.clone(), coerce_value(param, value)?);
            }
        }
    }
    Ok(out)
}

/// Coerce one non-null value to the parameter's kind.
pub fn coerce_value(param: &ParameterSpec, value: &Value) -> Result<Value, ValidationError> {
    let name = param.name.as_str();
    match param.kind {
        ParamKind::Boolean => coerce_bool(name, value),
        ParamKind::Integer => coerce_integer(name, value),
        ParamKind::Number => coerce_number(name, value),
        ParamKind::String => coerce_string(name, value),
        ParamKind::Array => coerce_structured(name, value, ParamKind::Array),
        ParamKind::Object => coerce_structured(name, value, ParamKind::Object),
    }
}

fn coerce_bool(name: &str, value: &Value) -> Result<Value, ValidationError> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
        Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
        other => Err(ValidationError::invalid(
            name,
            "boolean",
            format!("cannot interpret {other} as true/false"),
        )),
    }
}

fn coerce_integer(name: &str, value: &Value) -> Result<Value, ValidationError> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Value::from(f as i64)),
            _ => Err(ValidationError::invalid(name, "integer", format!("{n} is not a whole number"))),
        },
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| ValidationError::invalid(name, "integer", format!("'{s}' is not numeric"))),
        other => Err(ValidationError::invalid(name, "integer", format!("got {other}"))),
    }
}

fn coerce_number(name: &str, value: &Value) -> Result<Value, ValidationError> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::from(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| ValidationError::invalid(name, "number", format!("'{s}' is not numeric")))
        }
        other => Err(ValidationError::invalid(name, "number", format!("got {other}"))),
    }
}

fn coerce_string(name: &str, value: &Value) -> Result<Value, ValidationError> {
    match value {
        Value::String(_) => Ok(value.clone()),
        // Models routinely send ids as bare numbers.
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(ValidationError::invalid(name, "string", format!("got {other}"))),
    }
}

fn coerce_structured(name: &str, value: &Value, kind: ParamKind) -> Result<Value, ValidationError> {
    let expected = kind.as_str();
    let matches = |v: &Value| match kind {
        ParamKind::Array => v.is_array(),
        _ => v.is_object(),
    };

    if matches(value) {
        return Ok(value.clone());
    }

    let Value::String(text) = value else {
        return Err(ValidationError::invalid(name, expected, format!("got {value}")));
    };

    let decoded: Value = serde_json::from_str(text)
        .map_err(|e| ValidationError::invalid(name, expected, format!("invalid JSON: {e}")))?;

    if matches(&decoded) {
        Ok(decoded)
    } else {
        Err(ValidationError::invalid(
            name,
            expected,
            format!("decoded JSON is not an {expected}"),
        ))
    }
}
