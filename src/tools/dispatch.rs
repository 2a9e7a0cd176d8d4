//! HTTP dispatch of coerced tool arguments against the backend API.

use super::param::ParameterSpec;
use crate::error::{DispatchError, ValidationError};
use crate::openapi::{HttpMethod, Operation, ParamLocation};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::debug;

/// A fully resolved backend request.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    /// Path with placeholders substituted and percent-encoded.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Raw backend answer for a 2xx request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    /// Unwrap the Crawlab `{"data": ...}` envelope when present.
    pub fn into_data(self) -> Value {
        match self.body {
            Value::Object(mut map) if map.contains_key("data") => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        }
    }
}

/// Build the request for an operation from coerced arguments.
///
/// Body fields and whole-body values of methods that take no body travel
/// in the query string.
pub fn build_request(
    operation: &Operation,
    params: &[ParameterSpec],
    args: &Map<String, Value>,
) -> Result<PreparedRequest, ValidationError> {
    let mut path = operation.path.clone();
    let mut query = Vec::new();
    let mut fields = Map::new();
    let mut whole_body = None;

    for param in params {
        let Some(value) = args.get(&param.name) else {
            if param.required && param.location == ParamLocation::Path {
                return Err(ValidationError::MissingRequired(param.name.clone()));
            }
            continue;
        };

        match param.location {
            ParamLocation::Path => {
                let placeholder = format!("{{{}}}", param.wire_name);
                let encoded = urlencoding::encode(&scalar_text(value)).into_owned();
                path = path.replace(&placeholder, &encoded);
            }
            ParamLocation::Query => push_query(&mut query, &param.wire_name, value),
            ParamLocation::Body if operation.method.accepts_body() => {
                fields.insert(param.wire_name.clone(), value.clone());
            }
            ParamLocation::Body => push_query(&mut query, &param.wire_name, value),
            ParamLocation::WholeBody if operation.method.accepts_body() => whole_body = Some(value.clone()),
            ParamLocation::WholeBody => push_query(&mut query, &param.wire_name, value),
        }
    }

    if let Some(missing) = unfilled_placeholder(&path) {
        return Err(ValidationError::MissingRequired(missing));
    }

    let body = match whole_body {
        Some(body) => Some(body),
        None if !fields.is_empty() => Some(Value::Object(fields)),
        None => None,
    };

    Ok(PreparedRequest {
        method: operation.method,
        path,
        query,
        body,
    })
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Arrays explode into repeated keys; objects are sent as JSON text.
fn push_query(query: &mut Vec<(String, String)>, key: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                query.push((key.to_string(), scalar_text(item)));
            }
        }
        other => query.push((key.to_string(), scalar_text(other))),
    }
}

fn unfilled_placeholder(path: &str) -> Option<String> {
    let start = path.find('{')?;
    let end = path[start..].find('}')? + start;
    Some(path[start + 1..end].to_string())
}

/// Executes prepared requests with the configured bearer token.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    base_url: String,
    api_token: String,
    http: reqwest::Client,
}

impl HttpDispatcher {
    /// Create a dispatcher. Every request is bounded by `timeout`.
    pub fn new(base_url: &str, api_token: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL of a prepared request, without the query string.
    pub fn url_for(&self, request: &PreparedRequest) -> String {
        format!("{}/{}", self.base_url, request.path.trim_start_matches('/'))
    }

    /// Execute the request. Non-2xx statuses become [`DispatchError::Api`].
    pub async fn send(&self, request: &PreparedRequest) -> Result<ApiResponse, DispatchError> {
        let url = self.url_for(request);
        let started = Instant::now();

        let mut builder = self
            .http
            .request(reqwest_method(request.method), &url)
            .query(&request.query);
        if !self.api_token.is_empty() {
            builder = builder.bearer_auth(&self.api_token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let result = builder.send().await;
        debug!(
            "{} {} finished in {:.2?}",
            request.method,
            url,
            started.elapsed()
        );

        let resp = result.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Transport(format!("request to {url} timed out"))
            } else {
                DispatchError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = error_message(&text)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            return Err(DispatchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// Pull the backend's message out of an error body.
fn error_message(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        for key in ["error", "message", "detail"] {
            if let Some(Value::String(msg)) = map.get(key) {
                return Some(msg.clone());
            }
        }
    }
    Some(trimmed.to_string())
}
