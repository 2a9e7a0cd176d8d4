//! LLM provider abstraction.
//!
//! Every vendor is driven through [`LlmProvider`]; the variants translate
//! their native tool-calling formats into [`CompletionResponse`].

pub mod anthropic;
pub mod openai;
pub mod support;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiCompatibleProvider;
pub use support::{ToolSupportRule, ToolSupportTable};

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::tools::ToolDefinition;
use crate::types::{ChatMessage, CompletionResponse};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Uniform contract over chat-completion vendors.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Build the HTTP client. Idempotent; also done lazily on first use.
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// Send the conversation and an optional tool catalog.
    ///
    /// Tools are silently left out when the model lacks tool support.
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        model: Option<&str>,
    ) -> Result<CompletionResponse, ProviderError>;

    /// The configured default model.
    fn model_name(&self) -> &str;

    /// Whether the given (or default) model accepts structured tool calls.
    fn has_tool_support(&self, model: Option<&str>) -> bool;
}

/// Provider type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Azure,
    Anthropic,
    Together,
    Groq,
    Mistral,
    Aliyun,
    DeepSeek,
    Custom,
}

impl ProviderKind {
    /// Base URL used when the configuration leaves it empty.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Anthropic => Some("https://api.anthropic.com"),
            Self::Together => Some("https://api.together.xyz/v1"),
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::Mistral => Some("https://api.mistral.ai/v1"),
            Self::Aliyun => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
            Self::DeepSeek => Some("https://api.deepseek.com/v1"),
            Self::Azure | Self::Custom => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi | Self::Azure | Self::Custom => "gpt-4o",
            Self::Anthropic => "claude-3-5-sonnet-latest",
            Self::Together => "meta-llama/Llama-3.3-70B-Instruct-Turbo",
            Self::Groq => "llama-3.3-70b-versatile",
            Self::Mistral => "mistral-large-latest",
            Self::Aliyun => "qwen-plus",
            Self::DeepSeek => "deepseek-chat",
        }
    }

    /// Local or self-hosted endpoints may run without a key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Custom)
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "azure" | "azure_openai" | "azure-openai" => Ok(Self::Azure),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "together" => Ok(Self::Together),
            "groq" => Ok(Self::Groq),
            "mistral" => Ok(Self::Mistral),
            "aliyun" | "qwen" | "dashscope" => Ok(Self::Aliyun),
            "deepseek" => Ok(Self::DeepSeek),
            "custom" | "openai_compatible" | "openai-compatible" => Ok(Self::Custom),
            _ => Err(ProviderError::UnknownProvider(tag.to_string())),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Anthropic => "anthropic",
            Self::Together => "together",
            Self::Groq => "groq",
            Self::Mistral => "mistral",
            Self::Aliyun => "aliyun",
            Self::DeepSeek => "deepseek",
            Self::Custom => "custom",
        };
        f.write_str(tag)
    }
}

/// Construct the provider named by `config.provider`. Performs no I/O.
pub fn create_provider(
    config: &ProviderConfig,
    tool_support: Arc<ToolSupportTable>,
) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    let kind: ProviderKind = config.provider.parse()?;
    debug!("Creating {} provider (model: {})", kind, config.effective_model(kind));

    Ok(match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config, tool_support)),
        other => Arc::new(OpenAiCompatibleProvider::new(other, config, tool_support)?),
    })
}

/// Read a vendor response, mapping non-2xx statuses to the error taxonomy.
pub(crate) async fn read_body(resp: reqwest::Response) -> Result<String, ProviderError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| ProviderError::from_transport(&e))?;

    if !status.is_success() {
        return Err(ProviderError::from_status(status.as_u16(), body));
    }
    Ok(body)
}

/// A tool call in the reply to a request that offered no tools is a
/// hallucination, not something to execute.
pub(crate) fn reject_unoffered_tool_calls(
    response: &CompletionResponse,
    offered: bool,
) -> Result<(), ProviderError> {
    match response.tool_calls.first() {
        Some(call) if !offered => Err(ProviderError::Format(format!(
            "model requested tool '{}' although no tools were offered",
            call.name
        ))),
        _ => Ok(()),
    }
}

/// Shared lazily-built HTTP client with a mandatory timeout and the
/// configured extra headers.
pub(crate) async fn http_client<'a>(
    cell: &'a tokio::sync::OnceCell<reqwest::Client>,
    timeout: std::time::Duration,
    extra_headers: &BTreeMap<String, String>,
) -> Result<&'a reqwest::Client, ProviderError> {
    cell.get_or_try_init(|| async {
        reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(header_map(extra_headers)?)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))
    })
    .await
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, ProviderError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ProviderError::Misconfigured(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ProviderError::Misconfigured(format!("invalid value for header '{name}'")))?;
        map.insert(header, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_headers_are_validated() {
        let mut headers = BTreeMap::new();
        headers.insert("OpenAI-Organization".to_string(), "org-1".to_string());
        let map = header_map(&headers).unwrap();
        assert_eq!(map["openai-organization"], "org-1");

        headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(header_map(&headers), Err(ProviderError::Misconfigured(_))));
    }

    #[test]
    fn parses_tags() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("claude".parse::<ProviderKind>().unwrap(), ProviderKind::Anthropic);
        assert_eq!("qwen".parse::<ProviderKind>().unwrap(), ProviderKind::Aliyun);
        assert!(matches!(
            "bard".parse::<ProviderKind>(),
            Err(ProviderError::UnknownProvider(tag)) if tag == "bard"
        ));
    }

    #[test]
    fn factory_builds_variants_without_io() {
        let table = Arc::new(ToolSupportTable::builtin());
        let mut config = ProviderConfig {
            provider: "anthropic".into(),
            api_key: "k".into(),
            ..ProviderConfig::default()
        };
        let provider = create_provider(&config, Arc::clone(&table)).unwrap();
        assert_eq!(provider.model_name(), "claude-3-5-sonnet-latest");
        assert!(provider.has_tool_support(None));

        config.provider = "groq".into();
        config.model = "llama-3.3-70b-versatile".into();
        let provider = create_provider(&config, Arc::clone(&table)).unwrap();
        assert_eq!(provider.model_name(), "llama-3.3-70b-versatile");

        config.provider = "nonsense".into();
        assert!(matches!(
            create_provider(&config, table),
            Err(ProviderError::UnknownProvider(_))
        ));
    }

    #[test]
    fn custom_requires_base_url() {
        let config = ProviderConfig {
            provider: "custom".into(),
            ..ProviderConfig::default()
        };
        assert!(create_provider(&config, Arc::new(ToolSupportTable::builtin())).is_err());
    }
}
