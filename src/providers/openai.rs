//! OpenAI-compatible chat completions.
//!
//! Covers OpenAI itself, Azure-hosted deployments and every vendor that
//! speaks the same function-calling wire shape (Together, Groq, Mistral,
//! Aliyun Qwen, DeepSeek, custom endpoints).

use super::support::ToolSupportTable;
use super::{http_client, read_body, reject_unoffered_tool_calls, LlmProvider, ProviderKind};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::tools::ToolDefinition;
use crate::types::{ChatMessage, ChatRole, CompletionResponse, TokenUsage, ToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

pub struct OpenAiCompatibleProvider {
    kind: ProviderKind,
    base_url: String,
    api_key: String,
    model: String,
    api_version: String,
    max_tokens: u32,
    temperature: Option<f32>,
    timeout: Duration,
    extra_headers: BTreeMap<String, String>,
    forced_tool_support: Option<bool>,
    tool_support: Arc<ToolSupportTable>,
    http: OnceCell<reqwest::Client>,
}

// -- OpenAI-compatible request/response types --------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<MessagePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolPayload<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct MessagePayload {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallPayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ToolPayload<'a> {
    r#type: &'a str,
    function: FunctionPayload<'a>,
}

#[derive(Debug, Serialize)]
struct FunctionPayload<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolCallPayload {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: FunctionCallPayload,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCallPayload {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallPayload>>,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl OpenAiCompatibleProvider {
    /// Resolve endpoint and model from configuration. No I/O.
    pub fn new(
        kind: ProviderKind,
        config: &ProviderConfig,
        tool_support: Arc<ToolSupportTable>,
    ) -> Result<Self, ProviderError> {
        let base_url = config.effective_base_url(kind).ok_or_else(|| {
            ProviderError::Misconfigured(format!("{kind} provider requires a base_url"))
        })?;

        let api_version = match (kind, config.api_version.trim()) {
            (ProviderKind::Azure, "") => DEFAULT_AZURE_API_VERSION.to_string(),
            (_, version) => version.to_string(),
        };

        Ok(Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.effective_model(kind),
            api_version,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout(),
            extra_headers: config.extra_headers.clone(),
            forced_tool_support: config.tool_support,
            tool_support,
            http: OnceCell::new(),
        })
    }

    /// Chat completions endpoint; Azure addresses a deployment instead of a model.
    fn endpoint(&self, model: &str) -> String {
        match self.kind {
            ProviderKind::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url,
                urlencoding::encode(model),
                self.api_version
            ),
            _ => format!("{}/chat/completions", self.base_url),
        }
    }

    fn check_key(&self) -> Result<(), ProviderError> {
        if self.kind.requires_api_key() && self.api_key.trim().is_empty() {
            return Err(ProviderError::Auth(format!("no API key configured for {} provider", self.kind)));
        }
        Ok(())
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn initialize(&self) -> Result<(), ProviderError> {
        self.check_key()?;
        http_client(&self.http, self.timeout, &self.extra_headers).await?;
        debug!("Initialized {} provider at {}", self.kind, self.base_url);
        Ok(())
    }

    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        model: Option<&str>,
    ) -> Result<CompletionResponse, ProviderError> {
        self.check_key()?;
        let http = http_client(&self.http, self.timeout, &self.extra_headers).await?;
        let model = model.unwrap_or(&self.model);

        let offered = match tools {
            Some(tools) if !tools.is_empty() && self.has_tool_support(Some(model)) => Some(tools),
            Some(tools) if !tools.is_empty() => {
                debug!("Model {} has no tool support; omitting {} tools", model, tools.len());
                None
            }
            _ => None,
        };

        let tool_payloads = offered.map(|tools| {
            tools
                .iter()
                .map(|t| ToolPayload {
                    r#type: "function",
                    function: FunctionPayload {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect::<Vec<_>>()
        });

        let request = ChatRequest {
            model: (self.kind != ProviderKind::Azure).then_some(model),
            messages: messages.iter().map(message_payload).collect(),
            tool_choice: tool_payloads.as_ref().map(|_| "auto"),
            tools: tool_payloads,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        debug!("Inference request to {} model: {}", self.kind, model);

        let builder = http.post(self.endpoint(model)).json(&request);
        let builder = match self.kind {
            ProviderKind::Azure => builder.header("api-key", &self.api_key),
            _ if self.api_key.is_empty() => builder,
            _ => builder.bearer_auth(&self.api_key),
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;
        let body = read_body(resp).await?;

        let response = parse_response(&body)?;
        reject_unoffered_tool_calls(&response, offered.is_some())?;
        Ok(response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn has_tool_support(&self, model: Option<&str>) -> bool {
        self.forced_tool_support
            .unwrap_or_else(|| self.tool_support.supports(model.unwrap_or(&self.model)))
    }
}

fn message_payload(m: &ChatMessage) -> MessagePayload {
    let role = match m.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    };

    let tool_calls = (!m.tool_calls.is_empty()).then(|| {
        m.tool_calls
            .iter()
            .map(|tc| ToolCallPayload {
                id: tc.id.clone(),
                r#type: function_type(),
                function: FunctionCallPayload {
                    name: tc.name.clone(),
                    arguments: tc.arguments.to_string(),
                },
            })
            .collect()
    });

    // Assistant turns that only call tools carry a null content.
    let content = if m.content.is_empty() && tool_calls.is_some() {
        None
    } else {
        Some(m.content.clone())
    };

    MessagePayload {
        role,
        content,
        tool_calls,
        tool_call_id: m.tool_call_id.clone(),
        name: if m.role == ChatRole::Tool { m.name.clone() } else { None },
    }
}

fn parse_response(body: &str) -> Result<CompletionResponse, ProviderError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Format(format!("{e}; body: {}", excerpt(body))))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Format("response contained no choices".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let raw = tc.function.arguments.trim();
            let arguments = if raw.is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(raw).map_err(|e| {
                    ProviderError::Format(format!(
                        "arguments for tool call {} are not valid JSON: {e}",
                        tc.function.name
                    ))
                })?
            };
            Ok(ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments,
            })
        })
        .collect::<Result<Vec<_>, ProviderError>>()?;

    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        content: choice.message.content,
        tool_calls,
        usage,
    })
}

fn excerpt(body: &str) -> String {
    body.chars().take(300).collect()
}
