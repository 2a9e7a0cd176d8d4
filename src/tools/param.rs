//! Typed tool parameters derived from OpenAPI schemas.

use crate::openapi::ParamLocation;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// The closed set of argument types a tool can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    /// Map a JSON schema to a kind. The error carries the unsupported type name.
    ///
    /// Untyped schemas are inferred from `properties`/`items` and otherwise
    /// treated as strings; OpenAPI 3.1 `["T", "null"]` unions use `T`.
    pub fn from_schema(schema: &Value) -> Result<Self, String> {
        let type_name = match schema.get("type") {
            Some(Value::String(name)) => name.clone(),
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .find(|name| *name != "null")
                .unwrap_or("string")
                .to_string(),
            Some(other) => return Err(other.to_string()),
            None if schema.get("properties").is_some() => return Ok(Self::Object),
            None if schema.get("items").is_some() => return Ok(Self::Array),
            None => return Ok(Self::String),
        };

        match type_name.as_str() {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "array" => Ok(Self::Array),
            "object" => Ok(Self::Object),
            _ => Err(type_name),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One argument of a synthesized tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Argument name exposed to the model.
    pub name: String,
    /// Name used on the wire (path placeholder, query key or body field).
    pub wire_name: String,
    pub location: ParamLocation,
    pub kind: ParamKind,
    pub required: bool,
    /// Advertised default. Never applied during coercion.
    pub default: Option<Value>,
    pub description: String,
    /// Original schema, used for `items`, `enum` and nested properties.
    pub schema: Value,
}

impl ParameterSpec {
    /// JSON schema fragment for this argument.
    pub fn json_schema(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), json!(self.kind.as_str()));
        if !self.description.is_empty() {
            out.insert("description".into(), json!(self.description));
        }
        if let Some(default) = &self.default {
            out.insert("default".into(), default.clone());
        }
        for key in ["enum", "format"] {
            if let Some(v) = self.schema.get(key) {
                out.insert(key.into(), v.clone());
            }
        }
        match self.kind {
            // Function-calling APIs reject arrays without `items`.
            ParamKind::Array => {
                let items = self
                    .schema
                    .get("items")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                out.insert("items".into(), items);
            }
            ParamKind::Object => {
                if let Some(props) = self.schema.get("properties") {
                    out.insert("properties".into(), props.clone());
                }
            }
            _ => {}
        }
        Value::Object(out)
    }
}

/// Object schema over a whole parameter list.
pub fn parameters_schema(params: &[ParameterSpec]) -> Value {
    let properties: Map<String, Value> = params
        .iter()
        .map(|p| (p.name.clone(), p.json_schema()))
        .collect();
    let required: Vec<&str> = params
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name.as_str())
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_from_schema() {
        assert_eq!(ParamKind::from_schema(&json!({"type": "integer"})), Ok(ParamKind::Integer));
        assert_eq!(ParamKind::from_schema(&json!({"type": ["boolean", "null"]})), Ok(ParamKind::Boolean));
        assert_eq!(ParamKind::from_schema(&json!({"properties": {}})), Ok(ParamKind::Object));
        assert_eq!(ParamKind::from_schema(&json!({"items": {}})), Ok(ParamKind::Array));
        assert_eq!(ParamKind::from_schema(&json!({})), Ok(ParamKind::String));
        assert_eq!(ParamKind::from_schema(&json!({"type": "file"})), Err("file".to_string()));
    }

    #[test]
    fn array_schema_always_has_items() {
        let spec = ParameterSpec {
            name: "ids".into(),
            wire_name: "ids".into(),
            location: ParamLocation::Query,
            kind: ParamKind::Array,
            required: false,
            default: None,
            description: String::new(),
            schema: json!({"type": "array"}),
        };
        assert_eq!(spec.json_schema(), json!({"type": "array", "items": {}}));

        let schema = parameters_schema(&[spec]);
        assert_eq!(schema["required"], json!([]));
        assert_eq!(schema["properties"]["ids"]["type"], "array");
    }
}
