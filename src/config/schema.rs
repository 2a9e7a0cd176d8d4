//! Configuration schema for crawlab-mcp.toml.

use crate::providers::{ProviderKind, ToolSupportRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Crawlab API base URL, e.g. `http://localhost:8080/api`.
    pub api_base_url: String,

    /// Bearer token for the Crawlab API. Empty means no auth header.
    pub api_token: String,

    /// OpenAPI document: local path or http(s) URL.
    pub openapi_spec: String,

    /// Per-request timeout for backend calls and spec fetches, in seconds.
    pub request_timeout_secs: u64,

    /// Log level (debug, info, warn, error).
    pub log_level: String,

    /// System prompt for chat sessions.
    pub system_prompt: String,

    /// Tool rounds per query before forcing a tool-free answer.
    pub max_tool_rounds: u32,

    /// Ask the model to pick relevant tools before the main completion.
    pub intent_routing: bool,

    /// LLM provider settings.
    pub llm: ProviderConfig,

    /// Extra model → tool-support rules, checked before the built-in table.
    pub tool_support: Vec<ToolSupportRule>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".into(),
            api_token: String::new(),
            openapi_spec: "./openapi.yaml".into(),
            request_timeout_secs: 30,
            log_level: "info".into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_tool_rounds: 5,
            intent_routing: false,
            llm: ProviderConfig::default(),
            tool_support: Vec::new(),
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for Crawlab, a distributed web crawler \
management platform. Use the available tools to query and manage spiders, tasks, nodes, schedules and \
other resources. Report tool errors plainly and do not invent data.";

impl AppConfig {
    /// Resolve a path that may contain `~` to an absolute path.
    pub fn resolve_path(&self, path: &str) -> String {
        shellexpand::tilde(path).into_owned()
    }

    /// OpenAPI source with `~` expanded; URLs are returned unchanged.
    pub fn resolved_openapi_spec(&self) -> String {
        if self.openapi_spec.starts_with("http://") || self.openapi_spec.starts_with("https://") {
            self.openapi_spec.clone()
        } else {
            self.resolve_path(&self.openapi_spec)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// LLM provider settings. Immutable once the provider is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider type tag (openai, azure, anthropic, together, groq, mistral,
    /// aliyun, deepseek, custom).
    pub provider: String,

    pub api_key: String,

    /// Empty selects the provider's default endpoint.
    pub base_url: String,

    /// Model name; for Azure, the deployment name. Empty selects a default.
    pub model: String,

    /// Azure `api-version` query value.
    pub api_version: String,

    pub max_tokens: u32,

    pub temperature: Option<f32>,

    pub timeout_secs: u64,

    /// Force tool support on or off, bypassing the model table.
    pub tool_support: Option<bool>,

    /// Extra HTTP headers sent with every provider request,
    /// e.g. `OpenAI-Organization`.
    #[serde(alias = "extras")]
    pub extra_headers: BTreeMap<String, String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            api_key: String::new(),
            base_url: String::new(),
            model: String::new(),
            api_version: String::new(),
            max_tokens: 4096,
            temperature: Some(0.7),
            timeout_secs: 120,
            tool_support: None,
            extra_headers: BTreeMap::new(),
        }
    }
}

impl ProviderConfig {
    pub fn effective_model(&self, kind: ProviderKind) -> String {
        match self.model.trim() {
            "" => kind.default_model().to_string(),
            model => model.to_string(),
        }
    }

    pub fn effective_base_url(&self, kind: ProviderKind) -> Option<String> {
        match self.base_url.trim() {
            "" => kind.default_base_url().map(str::to_string),
            url => Some(url.to_string()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
