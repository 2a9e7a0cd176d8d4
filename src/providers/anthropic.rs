//! Anthropic Messages API.
//!
//! System messages move to the top-level `system` field, assistant tool
//! calls become `tool_use` blocks and tool results become `tool_result`
//! blocks inside user turns.

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

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    timeout: Duration,
    extra_headers: BTreeMap<String, String>,
    forced_tool_support: Option<bool>,
    tool_support: Arc<ToolSupportTable>,
    http: OnceCell<reqwest::Client>,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<MessageParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDef<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    User,
    Assistant,
}

#[derive(Debug, Serialize)]
struct MessageParam {
    role: Role,
    content: Vec<ContentBlockParam>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockParam {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize)]
struct ToolDef<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    usage: Option<UsageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig, tool_support: Arc<ToolSupportTable>) -> Self {
        let kind = ProviderKind::Anthropic;
        let base_url = config
            .effective_base_url(kind)
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.effective_model(kind),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout(),
            extra_headers: config.extra_headers.clone(),
            forced_tool_support: config.tool_support,
            tool_support,
            http: OnceCell::new(),
        }
    }

    fn check_key(&self) -> Result<(), ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::Auth("no API key configured for anthropic provider".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn initialize(&self) -> Result<(), ProviderError> {
        self.check_key()?;
        http_client(&self.http, self.timeout, &self.extra_headers).await?;
        debug!("Initialized anthropic provider at {}", self.base_url);
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

        let offered = tools.filter(|t| !t.is_empty() && self.has_tool_support(Some(model)));
        if offered.is_none() && tools.is_some_and(|t| !t.is_empty()) {
            debug!("Model {} has no tool support; omitting tools", model);
        }

        let (system, messages) = convert_messages(messages);
        let request = CreateMessageRequest {
            model,
            max_tokens: self.max_tokens,
            messages,
            system,
            tools: offered.map(|tools| {
                tools
                    .iter()
                    .map(|t| ToolDef {
                        name: &t.name,
                        description: &t.description,
                        input_schema: &t.parameters,
                    })
                    .collect()
            }),
            temperature: self.temperature,
        };

        debug!("Inference request to anthropic model: {}", model);

        let resp = http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
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

/// Split out the system prompt and fold the rest into alternating turns.
fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<MessageParam>) {
    let mut system = Vec::new();
    let mut out: Vec<MessageParam> = Vec::new();

    for message in messages {
        let (role, blocks) = match message.role {
            ChatRole::System => {
                system.push(message.content.as_str());
                continue;
            }
            ChatRole::User => (Role::User, text_block(&message.content)),
            ChatRole::Assistant => {
                let mut blocks = text_block(&message.content);
                blocks.extend(message.tool_calls.iter().map(|call| ContentBlockParam::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: match &call.arguments {
                        Value::Object(_) => call.arguments.clone(),
                        _ => Value::Object(Default::default()),
                    },
                }));
                (Role::Assistant, blocks)
            }
            ChatRole::Tool => (
                Role::User,
                vec![ContentBlockParam::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message.content.clone(),
                }],
            ),
        };

        if blocks.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => out.push(MessageParam { role, content: blocks }),
        }
    }

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, out)
}

fn text_block(text: &str) -> Vec<ContentBlockParam> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![ContentBlockParam::Text { text: text.to_string() }]
    }
}

fn parse_response(body: &str) -> Result<CompletionResponse, ProviderError> {
    let parsed: MessageResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::Format(format!("{e}; body: {}", body.chars().take(300).collect::<String>()))
    })?;

    let mut text = Vec::new();
    let mut tool_calls = Vec::new();
    for block in parsed.content {
        match block {
            ContentBlock::Text { text: t } => text.push(t),
            ContentBlock::ToolUse { id, name, input } => {
                if !input.is_object() {
                    return Err(ProviderError::Format(format!(
                        "tool_use block {id} ({name}) has non-object input"
                    )));
                }
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                });
            }
            ContentBlock::Other => {}
        }
    }

    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        content: (!text.is_empty()).then(|| text.join("")),
        tool_calls,
        usage,
    })
}
