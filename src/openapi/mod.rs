//! OpenAPI operation catalog.
//!
//! The loader walks an OpenAPI 3 (or Swagger 2) document once at startup and
//! produces an ordered list of [`Operation`]s. Everything here is immutable
//! after loading and shared behind `Arc`.

pub mod loader;

pub use loader::{load_spec, parse_spec};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// HTTP methods that become tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Parse an OpenAPI path-item key. Non-method keys yield `None`.
    pub fn parse(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "patch" => Some(Self::Patch),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether requests with this method carry a JSON body.
    pub fn accepts_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an argument travels in the HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamLocation {
    /// Substituted into a `{name}` placeholder.
    Path,
    /// Appended to the query string.
    Query,
    /// One field of a JSON object body.
    Body,
    /// The entire JSON body (non-object request schemas).
    WholeBody,
}

/// A path or query parameter as declared in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationParam {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub description: String,
    /// Resolved JSON schema of the parameter.
    pub schema: serde_json::Value,
}

/// One backend endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: String,
    pub method: HttpMethod,
    /// URL path template with `{param}` placeholders.
    pub path: String,
    pub summary: String,
    pub description: String,
    pub tags: Vec<String>,
    pub parameters: Vec<OperationParam>,
    /// Resolved JSON schema of the request body, if any.
    pub request_body: Option<serde_json::Value>,
    pub body_required: bool,
}

/// A tag declared at the top of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagInfo {
    pub name: String,
    pub description: String,
}

/// The loaded catalog.
#[derive(Debug, Clone, Default)]
pub struct ApiSpec {
    pub title: String,
    pub version: String,
    pub tags: Vec<TagInfo>,
    pub operations: Vec<Arc<Operation>>,
}

impl ApiSpec {
    pub fn operation(&self, operation_id: &str) -> Option<&Arc<Operation>> {
        self.operations
            .iter()
            .find(|op| op.operation_id == operation_id)
    }
}
