//! Schema loader: reads an OpenAPI document from disk or HTTP and builds
//! the operation catalog.

use super::{ApiSpec, HttpMethod, Operation, OperationParam, ParamLocation, TagInfo};
use crate::error::SchemaError;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Limit on nested `$ref` hops; deeper chains collapse to `{}`.
const MAX_REF_DEPTH: usize = 32;

/// Load and parse a document from a local path or an `http(s)://` URL.
pub async fn load_spec(source: &str, timeout: Duration) -> Result<ApiSpec, SchemaError> {
    let text = if source.starts_with("http://") || source.starts_with("https://") {
        fetch_remote(source, timeout).await?
    } else {
        let path = shellexpand::tilde(source).into_owned();
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SchemaError::Read {
                path: path.clone(),
                message: e.to_string(),
            })?
    };

    let started = std::time::Instant::now();
    let spec = parse_spec(&text)?;
    info!(
        "Parsed OpenAPI document '{}' ({} operations) in {:.2?}",
        spec.title,
        spec.operations.len(),
        started.elapsed()
    );
    Ok(spec)
}

async fn fetch_remote(url: &str, timeout: Duration) -> Result<String, SchemaError> {
    let fetch_err = |message: String| SchemaError::Fetch {
        url: url.to_string(),
        message,
    };

    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| fetch_err(e.to_string()))?;

    let resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| fetch_err(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(fetch_err(format!("HTTP {status}")));
    }

    resp.text().await.map_err(|e| fetch_err(e.to_string()))
}

/// Parse a JSON or YAML document into the operation catalog.
///
/// A malformed operation is skipped with a warning; only document-level
/// problems are errors.
pub fn parse_spec(text: &str) -> Result<ApiSpec, SchemaError> {
    let doc: Value = if text.trim_start().starts_with('{') {
        serde_json::from_str(text).map_err(|e| SchemaError::Parse(e.to_string()))?
    } else {
        serde_yaml::from_str(text).map_err(|e| SchemaError::Parse(e.to_string()))?
    };

    if !doc.is_object() {
        return Err(SchemaError::Parse("document root is not a mapping".into()));
    }

    let paths = doc
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| SchemaError::MissingField("paths".into()))?;

    let mut operations = Vec::new();

    for (path, item) in paths {
        let item = resolve_refs(&doc, item);
        let Some(item) = item.as_object() else {
            warn!("Path item {} is not a mapping. Skipping.", path);
            continue;
        };

        let shared_params = item
            .get("parameters")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for (key, op) in item {
            let Some(method) = HttpMethod::parse(key) else {
                continue;
            };

            match parse_operation(&doc, path, method, op, &shared_params) {
                Ok(Some(operation)) => {
                    debug!("Loaded operation {} ({} {})", operation.operation_id, method, path);
                    operations.push(Arc::new(operation));
                }
                Ok(None) => {}
                Err(reason) => warn!("Skipping {} {}: {}", method, path, reason),
            }
        }
    }

    let info = doc.get("info");
    Ok(ApiSpec {
        title: str_field(info, "title"),
        version: str_field(info, "version"),
        tags: parse_tags(&doc),
        operations,
    })
}

fn str_field(value: Option<&Value>, key: &str) -> String {
    value
        .and_then(|v| v.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_tags(doc: &Value) -> Vec<TagInfo> {
    doc.get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|tag| {
                    let name = tag.get("name")?.as_str()?.to_string();
                    Some(TagInfo {
                        name,
                        description: str_field(Some(tag), "description"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Build one operation. `Ok(None)` means the operation is deliberately not exposed.
fn parse_operation(
    doc: &Value,
    path: &str,
    method: HttpMethod,
    op: &Value,
    shared_params: &[Value],
) -> Result<Option<Operation>, String> {
    let op = op.as_object().ok_or("operation is not a mapping")?;

    let Some(operation_id) = op.get("operationId").and_then(Value::as_str) else {
        warn!("Operation {} {} has no operationId. Skipping.", method, path);
        return Ok(None);
    };

    let mut parameters: Vec<OperationParam> = Vec::new();
    let mut request_body = None;
    let mut body_required = false;

    // Operation-level parameters override path-level ones with the same (name, in).
    let own_params = op
        .get("parameters")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let own_keys: Vec<(String, String)> = own_params
        .iter()
        .map(|p| resolve_refs(doc, p))
        .filter_map(|p| Some((p.get("name")?.as_str()?.to_string(), p.get("in")?.as_str()?.to_string())))
        .collect();

    let inherited = shared_params.iter().filter(|p| {
        let p = resolve_refs(doc, p);
        let key = (
            p.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            p.get("in").and_then(Value::as_str).unwrap_or_default().to_string(),
        );
        !own_keys.contains(&key)
    });

    for raw in inherited.chain(own_params.iter()) {
        let param = resolve_refs(doc, raw);
        let name = param
            .get("name")
            .and_then(Value::as_str)
            .ok_or("parameter without a name")?
            .to_string();
        let location = param
            .get("in")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("parameter '{name}' has no location"))?;

        let location = match location {
            "path" => ParamLocation::Path,
            "query" => ParamLocation::Query,
            "body" => {
                // Swagger 2 body parameter
                request_body = param.get("schema").cloned();
                body_required = param.get("required").and_then(Value::as_bool).unwrap_or(false);
                continue;
            }
            "header" | "cookie" | "formData" => {
                debug!("Ignoring {} parameter '{}' of {}", location, name, operation_id);
                continue;
            }
            other => return Err(format!("parameter '{name}' has unknown location '{other}'")),
        };

        let required = location == ParamLocation::Path
            || param.get("required").and_then(Value::as_bool).unwrap_or(false);

        parameters.push(OperationParam {
            name,
            location,
            required,
            description: str_field(Some(&param), "description"),
            schema: param_schema(&param),
        });
    }

    let op_text = |key: &str| {
        op.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    if let Some(body) = op.get("requestBody") {
        let body = resolve_refs(doc, body);
        body_required = body.get("required").and_then(Value::as_bool).unwrap_or(false);
        request_body = json_body_schema(&body);
    }

    Ok(Some(Operation {
        operation_id: operation_id.to_string(),
        method,
        path: path.to_string(),
        summary: op_text("summary"),
        description: op_text("description"),
        tags: op
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        parameters,
        request_body: request_body.map(|schema| resolve_refs(doc, &schema)),
        body_required,
    }))
}

/// OpenAPI 3 keeps the schema under `schema`; Swagger 2 inlines type keywords.
fn param_schema(param: &Value) -> Value {
    if let Some(schema) = param.get("schema") {
        return schema.clone();
    }
    let mut schema = Map::new();
    for key in ["type", "format", "items", "enum", "default"] {
        if let Some(v) = param.get(key) {
            schema.insert(key.to_string(), v.clone());
        }
    }
    Value::Object(schema)
}

fn json_body_schema(body: &Value) -> Option<Value> {
    let content = body.get("content")?.as_object()?;
    content
        .get("application/json")
        .or_else(|| {
            content
                .iter()
                .find(|(media, _)| media.contains("json"))
                .map(|(_, v)| v)
        })
        .and_then(|media| media.get("schema"))
        .cloned()
}

/// Inline local `$ref` pointers and flatten `allOf` compositions.
///
/// A ref already being expanded further up collapses to `{}`.
fn resolve_refs(doc: &Value, value: &Value) -> Value {
    resolve_with(doc, value, &mut Vec::new())
}

fn resolve_with(doc: &Value, value: &Value, chain: &mut Vec<String>) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                if chain.iter().any(|r| r == reference) {
                    debug!("Cyclic $ref '{}' collapsed", reference);
                    return json!({});
                }
                if chain.len() >= MAX_REF_DEPTH {
                    warn!("$ref chain deeper than {} at '{}'", MAX_REF_DEPTH, reference);
                    return json!({});
                }
                return match reference.strip_prefix('#').and_then(|ptr| doc.pointer(ptr)) {
                    Some(target) => {
                        chain.push(reference.to_string());
                        let resolved = resolve_with(doc, target, chain);
                        chain.pop();
                        resolved
                    }
                    None => {
                        warn!("Unresolvable $ref '{}'", reference);
                        json!({})
                    }
                };
            }

            let mut resolved: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), resolve_with(doc, v, chain)))
                .collect();

            if let Some(Value::Array(parts)) = resolved.remove("allOf") {
                merge_all_of(&mut resolved, parts);
            }

            Value::Object(resolved)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_with(doc, v, chain)).collect()),
        other => other.clone(),
    }
}

fn merge_all_of(target: &mut Map<String, Value>, parts: Vec<Value>) {
    let mut properties = target
        .remove("properties")
        .and_then(|p| p.as_object().cloned())
        .unwrap_or_default();
    let mut required: Vec<Value> = target
        .remove("required")
        .and_then(|r| r.as_array().cloned())
        .unwrap_or_default();

    for part in parts {
        let Value::Object(part) = part else { continue };
        for (key, value) in part {
            match key.as_str() {
                "properties" => {
                    if let Value::Object(props) = value {
                        properties.extend(props);
                    }
                }
                "required" => {
                    if let Value::Array(names) = value {
                        for name in names {
                            if !required.contains(&name) {
                                required.push(name);
                            }
                        }
                    }
                }
                _ => {
                    target.entry(key).or_insert(value);
                }
            }
        }
    }

    target
        .entry("type".to_string())
        .or_insert_with(|| json!("object"));
    target.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        target.insert("required".into(), Value::Array(required));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIDERS_YAML: &str = r#"
openapi: 3.0.0
info:
  title: Crawlab API
  version: "0.7"
tags:
  - name: Spiders
    description: Spider management
paths:
  /spiders/{id}:
    parameters:
      - name: id
        in: path
        schema:
          type: integer
    get:
      operationId: get_spider
      summary: Get a spider
      tags: [Spiders]
      parameters:
        - name: verbose
          in: query
          schema:
            type: boolean
        - name: X-Trace
          in: header
          schema:
            type: string
  /spiders:
    post:
      operationId: create_spider
      summary: Create a spider
      requestBody:
        required: true
        content:
          application/json:
            schema:
              $ref: '#/components/schemas/Spider'
    options:
      summary: not a tool
  /health:
    get:
      summary: no operation id
components:
  schemas:
    Spider:
      type: object
      required: [name]
      properties:
        name:
          type: string
        config:
          type: object
"#;

    #[test]
    fn loads_operations_in_document_order() {
        let spec = parse_spec(SPIDERS_YAML).unwrap();
        assert_eq!(spec.title, "Crawlab API");
        let ids: Vec<_> = spec.operations.iter().map(|o| o.operation_id.as_str()).collect();
        assert_eq!(ids, ["get_spider", "create_spider"]);
        assert_eq!(spec.tags.len(), 1);
        assert_eq!(spec.tags[0].name, "Spiders");
    }

    #[test]
    fn merges_path_level_parameters_and_drops_headers() {
        let spec = parse_spec(SPIDERS_YAML).unwrap();
        let op = spec.operation("get_spider").unwrap();
        assert_eq!(op.method, HttpMethod::Get);
        let names: Vec<_> = op.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["id", "verbose"]);
        assert!(op.parameters[0].required);
        assert_eq!(op.parameters[0].location, ParamLocation::Path);
        assert!(!op.parameters[1].required);
    }

    #[test]
    fn resolves_request_body_refs() {
        let spec = parse_spec(SPIDERS_YAML).unwrap();
        let op = spec.operation("create_spider").unwrap();
        assert!(op.body_required);
        let body = op.request_body.as_ref().unwrap();
        assert_eq!(body["properties"]["name"]["type"], "string");
        assert_eq!(body["required"], json!(["name"]));
    }

    #[test]
    fn accepts_json_documents() {
        let text = r#"{"paths": {"/tasks": {"get": {"operationId": "list_tasks"}}}}"#;
        let spec = parse_spec(text).unwrap();
        assert_eq!(spec.operations.len(), 1);
        assert_eq!(spec.operations[0].path, "/tasks");
    }

    #[test]
    fn missing_paths_is_an_error() {
        let err = parse_spec("openapi: 3.0.0\ninfo:\n  title: x\n").unwrap_err();
        assert!(matches!(err, SchemaError::MissingField(f) if f == "paths"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(parse_spec("{ not json"), Err(SchemaError::Parse(_))));
        assert!(matches!(parse_spec("- just\n- a list\n"), Err(SchemaError::Parse(_))));
    }

    #[test]
    fn malformed_parameter_skips_only_that_operation() {
        let text = r#"
paths:
  /a:
    get:
      operationId: broken
      parameters:
        - in: query
  /b:
    get:
      operationId: fine
"#;
        let spec = parse_spec(text).unwrap();
        let ids: Vec<_> = spec.operations.iter().map(|o| o.operation_id.as_str()).collect();
        assert_eq!(ids, ["fine"]);
    }

    #[test]
    fn flattens_all_of() {
        let text = r#"
paths:
  /nodes:
    post:
      operationId: create_node
      requestBody:
        content:
          application/json:
            schema:
              allOf:
                - $ref: '#/components/schemas/Base'
                - type: object
                  required: [ip]
                  properties:
                    ip: { type: string }
components:
  schemas:
    Base:
      type: object
      required: [name]
      properties:
        name: { type: string }
"#;
        let spec = parse_spec(text).unwrap();
        let body = spec.operations[0].request_body.clone().unwrap();
        assert_eq!(body["type"], "object");
        assert!(body["properties"].get("name").is_some());
        assert!(body["properties"].get("ip").is_some());
        assert_eq!(body["required"], json!(["name", "ip"]));
    }

    #[test]
    fn cyclic_refs_terminate() {
        let text = r#"
paths:
  /tree:
    post:
      operationId: create_tree
      requestBody:
        content:
          application/json:
            schema:
              $ref: '#/components/schemas/Node'
components:
  schemas:
    Node:
      type: object
      properties:
        child:
          $ref: '#/components/schemas/Node'
"#;
        let spec = parse_spec(text).unwrap();
        assert_eq!(spec.operations.len(), 1);
        let body = spec.operations[0].request_body.as_ref().unwrap();
        assert_eq!(body["type"], "object");
        assert_eq!(body["properties"]["child"], json!({}));
    }

    #[test]
    fn deep_inline_nesting_is_not_a_ref_chain() {
        let mut schema = json!({"$ref": "#/components/schemas/Stamp"});
        for _ in 0..40 {
            schema = json!({"type": "object", "properties": {"inner": schema}});
        }
        let doc = json!({
            "paths": {"/deep": {"post": {
                "operationId": "create_deep",
                "requestBody": {"content": {"application/json": {"schema": schema}}}
            }}},
            "components": {"schemas": {"Stamp": {"type": "string", "format": "date-time"}}}
        });

        let spec = parse_spec(&doc.to_string()).unwrap();
        let mut node = spec.operations[0].request_body.as_ref().unwrap();
        for _ in 0..40 {
            node = &node["properties"]["inner"];
        }
        assert_eq!(node, &json!({"type": "string", "format": "date-time"}));
    }

    #[tokio::test]
    async fn load_spec_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openapi.yaml");
        std::fs::write(&path, SPIDERS_YAML).unwrap();
        let spec = load_spec(path.to_str().unwrap(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(spec.operations.len(), 2);

        let missing = load_spec("/nonexistent/openapi.yaml", Duration::from_secs(5)).await;
        assert!(matches!(missing, Err(SchemaError::Read { .. })));
    }
}
