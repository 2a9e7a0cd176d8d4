//! Conversation session: provider call → tool calls → tool results →
//! provider call again, until the model answers without tools.

use super::intent::{identify_intent, narrow_catalog, Intent};
use crate::error::ProviderError;
use crate::providers::LlmProvider;
use crate::tools::{ToolDefinition, ToolRegistry};
use crate::types::{ChatMessage, TokenUsage, ToolCall, ToolCallResult, ToolFailure, ToolInvocation, ToolOutcome};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Per-session knobs, fixed at construction.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_tool_rounds: u32,
    /// Model override; `None` uses the provider default.
    pub model: Option<String>,
    pub intent_routing: bool,
    pub system_prompt: Option<String>,
    /// Tag names offered to the intent classifier.
    pub tags: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            model: None,
            intent_routing: false,
            system_prompt: None,
            tags: Vec::new(),
        }
    }
}

/// Final answer plus everything that led to it.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub final_message: ChatMessage,
    /// Full conversation, including the final message.
    pub messages: Vec<ChatMessage>,
    pub trace: Vec<ToolInvocation>,
    pub usage: TokenUsage,
}

pub struct ConversationSession {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    settings: SessionSettings,
}

impl ConversationSession {
    pub fn new(provider: Arc<dyn LlmProvider>, registry: Arc<ToolRegistry>, settings: SessionSettings) -> Self {
        Self {
            provider,
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Answer one user query on top of `history`.
    ///
    /// Chooses the catalog (full, narrowed by intent, or none) and runs the
    /// session. `history` must not contain the system prompt.
    pub async fn ask(&self, history: &[ChatMessage], query: &str) -> Result<SessionOutcome, ProviderError> {
        let model = self.settings.model.as_deref();
        let tool_support = self.provider.has_tool_support(model);
        info!("LLM provider tool support: {}", tool_support);

        let catalog = self.registry.list_tools();
        let tools = if !tool_support || catalog.is_empty() {
            None
        } else if self.settings.intent_routing {
            let intent = identify_intent(self.provider.as_ref(), query, &self.settings.tags, model).await;
            match intent {
                Intent::Generic => info!("Using generic mode without tools"),
                Intent::Tools(ref names) => info!("Selected tools based on intent: {:?}", names),
            }
            narrow_catalog(&catalog, &intent)
        } else {
            Some(catalog)
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(prompt) = &self.settings.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(query));

        self.run(messages, tools.as_deref()).await
    }

    /// Drive the conversation until the model answers without tool calls.
    ///
    /// After `max_tool_rounds` rounds of tool calls, one last completion is
    /// requested with no tools offered.
    pub async fn run(
        &self,
        mut messages: Vec<ChatMessage>,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<SessionOutcome, ProviderError> {
        let model = self.settings.model.as_deref();
        let mut trace = Vec::new();
        let mut usage = TokenUsage::default();

        info!(
            "Starting session with {} messages and {} tools",
            messages.len(),
            tools.map_or(0, <[ToolDefinition]>::len)
        );

        for round in 1..=self.settings.max_tool_rounds {
            let response = self.provider.chat_completion(&messages, tools, model).await?;
            usage.add(&response.usage);

            if response.tool_calls.is_empty() {
                return Ok(finish(messages, response.content, trace, usage));
            }

            let calls: Vec<ToolCall> = response
                .tool_calls
                .into_iter()
                .map(|mut call| {
                    if call.id.is_empty() {
                        call.id = format!("call_{}", ulid::Ulid::new());
                    }
                    call
                })
                .collect();

            info!("[Round {}] LLM requested {} tool calls", round, calls.len());
            messages.push(ChatMessage::assistant_with_tools(
                response.content.unwrap_or_default(),
                calls.clone(),
            ));

            for invocation in self.dispatch(round, calls).await {
                messages.push(ChatMessage::tool_result(
                    &invocation.call,
                    invocation.result.to_message_content(),
                ));
                trace.push(invocation);
            }
        }

        if tools.is_some() && self.settings.max_tool_rounds > 0 {
            warn!(
                "Reached {} tool rounds; requesting a final answer without tools",
                self.settings.max_tool_rounds
            );
        }
        let response = self.provider.chat_completion(&messages, None, model).await?;
        usage.add(&response.usage);
        Ok(finish(messages, response.content, trace, usage))
    }

    /// Invoke all calls of one round concurrently; results come back in call order.
    async fn dispatch(&self, round: u32, calls: Vec<ToolCall>) -> Vec<ToolInvocation> {
        let mut join_set = JoinSet::new();

        for (index, call) in calls.iter().enumerate() {
            let registry = Arc::clone(&self.registry);
            let call = call.clone();
            join_set.spawn(async move {
                let started_at = Utc::now();
                debug!("Tool arguments for {}: {}", call.name, call.arguments);
                let result = registry.invoke(&call.name, call.arguments.clone()).await;
                (index, started_at, result)
            });
        }

        let mut finished: BTreeMap<usize, (chrono::DateTime<Utc>, ToolCallResult)> = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, started_at, result)) => {
                    finished.insert(index, (started_at, result));
                }
                Err(e) => warn!("Tool task join error: {}", e),
            }
        }

        calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| {
                let (started_at, result) = finished.remove(&index).unwrap_or_else(|| {
                    (
                        Utc::now(),
                        ToolCallResult {
                            tool: call.name.clone(),
                            outcome: ToolOutcome::Failure {
                                error: ToolFailure::internal("tool task did not complete"),
                            },
                            elapsed_ms: 0,
                        },
                    )
                });
                ToolInvocation {
                    round,
                    call,
                    result,
                    started_at,
                }
            })
            .collect()
    }
}

fn finish(
    mut messages: Vec<ChatMessage>,
    content: Option<String>,
    trace: Vec<ToolInvocation>,
    usage: TokenUsage,
) -> SessionOutcome {
    let final_message = ChatMessage::assistant(content.unwrap_or_default());
    messages.push(final_message.clone());
    info!(
        "Session finished after {} tool invocations ({} tokens)",
        trace.len(),
        usage.total_tokens
    );
    SessionOutcome {
        final_message,
        messages,
        trace,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use crate::types::{ChatRole, CompletionResponse};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned responses and records what it was sent.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<CompletionResponse, ProviderError>>>,
        seen: Mutex<Vec<(Vec<ChatMessage>, bool)>>,
        tool_support: bool,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<CompletionResponse, ProviderError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
                tool_support: true,
            }
        }

        fn calls(&self) -> Vec<(Vec<ChatMessage>, bool)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn initialize(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn chat_completion(
            &self,
            messages: &[ChatMessage],
            tools: Option<&[ToolDefinition]>,
            _model: Option<&str>,
        ) -> Result<CompletionResponse, ProviderError> {
            self.seen
                .lock()
                .unwrap()
                .push((messages.to_vec(), tools.is_some_and(|t| !t.is_empty())));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Format("script exhausted".into())))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        fn has_tool_support(&self, _model: Option<&str>) -> bool {
            self.tool_support
        }
    }

    /// Sleeps, records completion order and echoes its name.
    struct SlowTool {
        definition: ToolDefinition,
        delay: Duration,
        done: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> &ToolDefinition {
            &self.definition
        }

        async fn execute(&self, _args: &Map<String, Value>) -> Result<Value, ToolFailure> {
            tokio::time::sleep(self.delay).await;
            self.done.lock().unwrap().push(self.definition.name.clone());
            Ok(json!({"tool": self.definition.name}))
        }
    }

    fn slow_registry(done: &Arc<Mutex<Vec<String>>>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        for (name, ms) in [("slow_a", 150), ("fast_b", 0)] {
            registry
                .register(Arc::new(SlowTool {
                    definition: ToolDefinition {
                        name: name.into(),
                        description: String::new(),
                        parameters: json!({"type": "object", "properties": {}}),
                    },
                    delay: Duration::from_millis(ms),
                    done: Arc::clone(done),
                }))
                .unwrap();
        }
        Arc::new(registry)
    }

    fn text(content: &str) -> Result<CompletionResponse, ProviderError> {
        Ok(CompletionResponse {
            content: Some(content.into()),
            ..CompletionResponse::default()
        })
    }

    fn calling(calls: &[(&str, &str)]) -> Result<CompletionResponse, ProviderError> {
        Ok(CompletionResponse {
            content: None,
            tool_calls: calls
                .iter()
                .map(|(id, name)| ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: json!({}),
                })
                .collect(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 2,
                total_tokens: 12,
            },
        })
    }

    #[tokio::test]
    async fn concurrent_results_keep_call_order() {
        let done = Arc::new(Mutex::new(Vec::new()));
        let registry = slow_registry(&done);
        let provider = Arc::new(ScriptedProvider::new(vec![
            calling(&[("c1", "slow_a"), ("c2", "fast_b")]),
            text("Both done."),
        ]));
        let session = ConversationSession::new(provider.clone(), Arc::clone(&registry), SessionSettings::default());

        let tools = registry.list_tools();
        let outcome = session
            .run(vec![ChatMessage::user("run both")], Some(&tools))
            .await
            .unwrap();

        assert_eq!(*done.lock().unwrap(), ["fast_b", "slow_a"]);
        assert_eq!(outcome.final_message.content, "Both done.");

        let ids: Vec<_> = outcome
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::Tool)
            .map(|m| m.tool_call_id.clone().unwrap())
            .collect();
        assert_eq!(ids, ["c1", "c2"]);
        assert_eq!(outcome.trace.len(), 2);
        assert_eq!(outcome.trace[0].call.name, "slow_a");
        assert!(outcome.trace.iter().all(|t| t.round == 1 && t.result.is_success()));
        assert_eq!(outcome.usage.total_tokens, 12);

        let seen = provider.calls();
        assert_eq!(seen.len(), 2);
        let second = &seen[1].0;
        assert_eq!(second[1].role, ChatRole::Assistant);
        assert_eq!(second[1].tool_calls.len(), 2);
        assert_eq!(second[2].content, r#"{"tool":"slow_a"}"#);
    }

    #[tokio::test]
    async fn tool_failures_go_back_to_the_model() {
        let done = Arc::new(Mutex::new(Vec::new()));
        let registry = slow_registry(&done);
        let provider = Arc::new(ScriptedProvider::new(vec![
            calling(&[("", "missing_tool")]),
            text("That tool does not exist."),
        ]));
        let session = ConversationSession::new(provider.clone(), Arc::clone(&registry), SessionSettings::default());

        let tools = registry.list_tools();
        let outcome = session
            .run(vec![ChatMessage::user("do it")], Some(&tools))
            .await
            .unwrap();

        let invocation = &outcome.trace[0];
        assert!(invocation.call.id.starts_with("call_"));
        assert!(!invocation.result.is_success());
        let tool_message = &provider.calls()[1].0[2];
        assert!(tool_message.content.starts_with("Error (validation_error)"));
        assert_eq!(tool_message.tool_call_id.as_deref(), Some(invocation.call.id.as_str()));
    }

    #[tokio::test]
    async fn rounds_are_capped_with_a_tool_free_answer() {
        let done = Arc::new(Mutex::new(Vec::new()));
        let registry = slow_registry(&done);
        let provider = Arc::new(ScriptedProvider::new(vec![
            calling(&[("c1", "fast_b")]),
            calling(&[("c2", "fast_b")]),
            text("Giving up on tools."),
        ]));
        let settings = SessionSettings {
            max_tool_rounds: 2,
            ..SessionSettings::default()
        };
        let session = ConversationSession::new(provider.clone(), Arc::clone(&registry), settings);

        let tools = registry.list_tools();
        let outcome = session
            .run(vec![ChatMessage::user("loop")], Some(&tools))
            .await
            .unwrap();

        assert_eq!(outcome.final_message.content, "Giving up on tools.");
        assert_eq!(outcome.trace.len(), 2);
        assert_eq!(outcome.trace[1].round, 2);
        let offered: Vec<bool> = provider.calls().iter().map(|(_, offered)| *offered).collect();
        assert_eq!(offered, [true, true, false]);
    }

    #[tokio::test]
    async fn fatal_provider_errors_surface() {
        let registry = Arc::new(ToolRegistry::new());
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Auth("bad key".into()))]));
        let session = ConversationSession::new(provider, registry, SessionSettings::default());
        let err = session.ask(&[], "hello").await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn ask_adds_system_prompt_and_routes_intent() {
        let done = Arc::new(Mutex::new(Vec::new()));
        let registry = slow_registry(&done);
        let provider = Arc::new(ScriptedProvider::new(vec![
            text(r#"["fast_b"]"#),
            text("No tools needed after all."),
        ]));
        let settings = SessionSettings {
            intent_routing: true,
            system_prompt: Some("You help with Crawlab.".into()),
            tags: vec!["Spiders".into()],
            ..SessionSettings::default()
        };
        let session = ConversationSession::new(provider.clone(), registry, settings);

        let history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")];
        let outcome = session.ask(&history, "quick one").await.unwrap();
        assert_eq!(outcome.final_message.content, "No tools needed after all.");

        let seen = provider.calls();
        assert_eq!(seen.len(), 2);
        // Classifier call: its own system prompt, never the catalog.
        assert!(seen[0].0[0].content.contains("Available API tags: Spiders"));
        assert!(!seen[0].1);
        // Main call: configured system prompt, history, then the query.
        let main = &seen[1].0;
        assert_eq!(main[0].content, "You help with Crawlab.");
        assert_eq!(main.len(), 4);
        assert_eq!(main[3].content, "quick one");
        assert!(seen[1].1);
    }

    #[tokio::test]
    async fn generic_intent_sends_no_tools() {
        let done = Arc::new(Mutex::new(Vec::new()));
        let registry = slow_registry(&done);
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Unavailable("down".into())),
            text("Paris."),
        ]));
        let settings = SessionSettings {
            intent_routing: true,
            ..SessionSettings::default()
        };
        let session = ConversationSession::new(provider.clone(), registry, settings);

        let outcome = session.ask(&[], "capital of France?").await.unwrap();
        assert_eq!(outcome.final_message.content, "Paris.");
        assert!(!provider.calls()[1].1);
    }
}
