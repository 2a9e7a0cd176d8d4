//! Tool synthesis: one invocable tool per OpenAPI operation.

use super::coerce::coerce_arguments;
use super::dispatch::{build_request, HttpDispatcher};
use super::param::{parameters_schema, ParamKind, ParameterSpec};
use super::tags::LIST_TAGS_TOOL;
use super::traits::{Tool, ToolDefinition};
use crate::error::SynthesisError;
use crate::openapi::{Operation, ParamLocation};
use crate::types::ToolFailure;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Longest description handed to providers.
pub const MAX_DESCRIPTION_CHARS: usize = 1024;

/// Function names are limited to 64 characters by OpenAI-style APIs.
pub const MAX_TOOL_NAME_CHARS: usize = 64;

/// A tool backed by one OpenAPI operation.
#[derive(Debug, Clone)]
pub struct OperationTool {
    operation: Arc<Operation>,
    params: Vec<ParameterSpec>,
    definition: ToolDefinition,
    dispatcher: Arc<HttpDispatcher>,
}

impl OperationTool {
    /// Build the tool signature under `name` and bind it to a dispatcher.
    pub fn synthesize(
        operation: Arc<Operation>,
        name: String,
        dispatcher: Arc<HttpDispatcher>,
    ) -> Result<Self, SynthesisError> {
        let params = build_parameters(&operation)?;
        let definition = ToolDefinition {
            name,
            description: describe(&operation, &params),
            parameters: parameters_schema(&params),
        };

        debug!(
            "Synthesized tool {} ({} {}) with {} parameters",
            definition.name,
            operation.method,
            operation.path,
            params.len()
        );

        Ok(Self {
            operation,
            params,
            definition,
            dispatcher,
        })
    }

    pub fn params(&self) -> &[ParameterSpec] {
        &self.params
    }
}

#[async_trait]
impl Tool for OperationTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    fn operation(&self) -> Option<&Arc<Operation>> {
        Some(&self.operation)
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolFailure> {
        let coerced = coerce_arguments(&self.params, args)?;
        let request = build_request(&self.operation, &self.params, &coerced)?;
        let response = self.dispatcher.send(&request).await?;
        Ok(response.into_data())
    }
}

/// Sanitize an operation id into a provider-safe function name.
pub fn tool_name(operation_id: &str) -> String {
    let name: String = operation_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(MAX_TOOL_NAME_CHARS)
        .collect();
    if name.is_empty() {
        "operation".to_string()
    } else {
        name
    }
}

/// Provider-safe, unique tool names for a list of operations, in order.
///
/// Ids that sanitize or truncate to the same name get `_2`, `_3`, ...
/// suffixes within the length limit. `list_tags` is reserved.
pub fn assign_tool_names(operations: &[Arc<Operation>]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::from([LIST_TAGS_TOOL.to_string()]);
    operations
        .iter()
        .map(|op| {
            let base = tool_name(&op.operation_id);
            let mut candidate = base.clone();
            let mut n = 2;
            while used.contains(&candidate) {
                let suffix = format!("_{n}");
                let head: String = base.chars().take(MAX_TOOL_NAME_CHARS - suffix.len()).collect();
                candidate = format!("{head}{suffix}");
                n += 1;
            }
            used.insert(candidate.clone());
            candidate
        })
        .collect()
}

/// Union of path, query and flattened body parameters with unique names.
pub fn build_parameters(operation: &Operation) -> Result<Vec<ParameterSpec>, SynthesisError> {
    let mut used = HashSet::new();
    let mut params = Vec::new();

    let unsupported = |param: &str, type_name: String| SynthesisError::UnsupportedType {
        operation: operation.operation_id.clone(),
        param: param.to_string(),
        type_name,
    };

    for raw in &operation.parameters {
        let kind = ParamKind::from_schema(&raw.schema).map_err(|t| unsupported(&raw.name, t))?;
        let description = if raw.description.is_empty() {
            schema_description(&raw.schema)
        } else {
            raw.description.clone()
        };
        params.push(ParameterSpec {
            name: unique_name(&raw.name, raw.location, &mut used),
            wire_name: raw.name.clone(),
            location: raw.location,
            kind,
            required: raw.required,
            default: raw.schema.get("default").cloned(),
            description,
            schema: raw.schema.clone(),
        });
    }

    let Some(body) = &operation.request_body else {
        return Ok(params);
    };

    let kind = ParamKind::from_schema(body).map_err(|t| unsupported("body", t))?;
    let properties = body.get("properties").and_then(Value::as_object);

    match (kind, properties) {
        (ParamKind::Object, Some(properties)) if !properties.is_empty() => {
            let required: Vec<&str> = body
                .get("required")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            for (field, schema) in properties {
                let kind = ParamKind::from_schema(schema).map_err(|t| unsupported(field, t))?;
                params.push(ParameterSpec {
                    name: unique_name(field, ParamLocation::Body, &mut used),
                    wire_name: field.clone(),
                    location: ParamLocation::Body,
                    kind,
                    required: required.contains(&field.as_str()),
                    default: schema.get("default").cloned(),
                    description: schema_description(schema),
                    schema: schema.clone(),
                });
            }
        }
        // Free-form objects and non-object bodies are passed through whole.
        _ => {
            params.push(ParameterSpec {
                name: unique_name("body", ParamLocation::WholeBody, &mut used),
                wire_name: "body".to_string(),
                location: ParamLocation::WholeBody,
                kind,
                required: operation.body_required,
                default: None,
                description: schema_description(body),
                schema: body.clone(),
            });
        }
    }

    Ok(params)
}

fn schema_description(schema: &Value) -> String {
    schema
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn unique_name(raw: &str, location: ParamLocation, used: &mut HashSet<String>) -> String {
    let mut base: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if base.is_empty() || base.starts_with(|c: char| c.is_ascii_digit()) {
        base = format!("param_{base}");
    }

    let mut candidate = base.clone();
    if used.contains(&candidate) {
        let suffix = match location {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Body | ParamLocation::WholeBody => "body",
        };
        candidate = format!("{base}_{suffix}");
        let mut n = 2;
        while used.contains(&candidate) {
            candidate = format!("{base}_{suffix}_{n}");
            n += 1;
        }
    }

    used.insert(candidate.clone());
    candidate
}

/// Summary, long description and parameter notes, truncated to a safe length.
pub fn describe(operation: &Operation, params: &[ParameterSpec]) -> String {
    let mut text = match (operation.summary.trim(), operation.description.trim()) {
        ("", "") => format!("Tool function for {} operation", operation.operation_id),
        (summary, "") => summary.to_string(),
        ("", description) => description.to_string(),
        (summary, description) if summary == description => summary.to_string(),
        (summary, description) => format!("{summary}\n\n{description}"),
    };

    let notes: Vec<String> = params
        .iter()
        .filter(|p| !p.description.is_empty())
        .map(|p| format!("- {} ({}): {}", p.name, p.kind, p.description))
        .collect();
    if !notes.is_empty() {
        text.push_str("\n\nParameters:\n");
        text.push_str(&notes.join("\n"));
    }

    truncate_chars(&text, MAX_DESCRIPTION_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::{HttpMethod, OperationParam};
    use serde_json::json;
    use std::time::Duration;

    fn dispatcher() -> Arc<HttpDispatcher> {
        Arc::new(HttpDispatcher::new("http://localhost:8080/api", "", Duration::from_secs(1)).unwrap())
    }

    fn get_spider() -> Operation {
        Operation {
            operation_id: "get_spider".into(),
            method: HttpMethod::Get,
            path: "/spiders/{id}".into(),
            summary: "Get a spider".into(),
            description: String::new(),
            tags: vec!["Spiders".into()],
            parameters: vec![
                OperationParam {
                    name: "id".into(),
                    location: ParamLocation::Path,
                    required: true,
                    description: "Spider id".into(),
                    schema: json!({"type": "integer"}),
                },
                OperationParam {
                    name: "verbose".into(),
                    location: ParamLocation::Query,
                    required: false,
                    description: String::new(),
                    schema: json!({"type": "boolean", "default": false}),
                },
            ],
            request_body: None,
            body_required: false,
        }
    }

    #[test]
    fn signature_from_path_and_query() {
        let tool = OperationTool::synthesize(Arc::new(get_spider()), "get_spider".into(), dispatcher()).unwrap();
        let def = tool.definition();
        assert_eq!(def.name, "get_spider");
        assert_eq!(def.parameters["required"], json!(["id"]));
        assert_eq!(def.parameters["properties"]["id"]["type"], "integer");
        assert_eq!(def.parameters["properties"]["verbose"]["default"], false);
        assert!(def.description.starts_with("Get a spider"));
        assert!(def.description.contains("- id (integer): Spider id"));
    }

    #[test]
    fn body_fields_are_flattened_and_disambiguated() {
        let mut op = get_spider();
        op.method = HttpMethod::Put;
        op.request_body = Some(json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "id": {"type": "string"},
                "name": {"type": "string"},
                "config": {"type": "object"}
            }
        }));
        let params = build_parameters(&op).unwrap();
        let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["id", "verbose", "id_body", "name", "config"]);
        let renamed = &params[2];
        assert_eq!(renamed.wire_name, "id");
        assert_eq!(renamed.location, ParamLocation::Body);
        assert!(params[3].required);
        assert!(!params[4].required);
    }

    #[test]
    fn free_form_body_is_one_parameter() {
        let mut op = get_spider();
        op.parameters.clear();
        op.request_body = Some(json!({"type": "array", "items": {"type": "string"}}));
        op.body_required = true;
        let params = build_parameters(&op).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "body");
        assert_eq!(params[0].location, ParamLocation::WholeBody);
        assert_eq!(params[0].kind, ParamKind::Array);
        assert!(params[0].required);
    }

    #[test]
    fn unsupported_type_fails_synthesis() {
        let mut op = get_spider();
        op.parameters[1].schema = json!({"type": "file"});
        match build_parameters(&op) {
            Err(SynthesisError::UnsupportedType { param, type_name, .. }) => {
                assert_eq!(param, "verbose");
                assert_eq!(type_name, "file");
            }
            other => panic!("expected unsupported type, got {other:?}"),
        }
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(tool_name("spiders.list/all"), "spiders_list_all");
        assert_eq!(tool_name(&"x".repeat(100)).len(), MAX_TOOL_NAME_CHARS);

        let mut used = HashSet::new();
        assert_eq!(unique_name("page-size", ParamLocation::Query, &mut used), "page_size");
        assert_eq!(unique_name("page_size", ParamLocation::Body, &mut used), "page_size_body");
        assert_eq!(unique_name("page_size", ParamLocation::Body, &mut used), "page_size_body_2");
        assert_eq!(unique_name("2fa", ParamLocation::Query, &mut used), "param_2fa");
    }

    #[test]
    fn colliding_operation_ids_get_distinct_names() {
        let op = |id: &str| {
            let mut op = get_spider();
            op.operation_id = id.to_string();
            Arc::new(op)
        };
        let long = "a".repeat(100);
        let names = assign_tool_names(&[
            op("spiders.list"),
            op("spiders_list"),
            op("spiders list"),
            op("list_tags"),
            op(&long),
            op(&format!("{long}b")),
        ]);
        assert_eq!(names[..4], ["spiders_list", "spiders_list_2", "spiders_list_3", "list_tags_2"]);
        assert_eq!(names[4], "a".repeat(MAX_TOOL_NAME_CHARS));
        assert_eq!(names[5].chars().count(), MAX_TOOL_NAME_CHARS);
        assert!(names[5].ends_with("_2"));
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let mut op = get_spider();
        op.description = "é".repeat(5000);
        let text = describe(&op, &[]);
        assert_eq!(text.chars().count(), MAX_DESCRIPTION_CHARS);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn fallback_description() {
        let mut op = get_spider();
        op.summary.clear();
        assert_eq!(describe(&op, &[]), "Tool function for get_spider operation");
    }
}
