pub mod coerce;
pub mod dispatch;
pub mod param;
pub mod synth;
pub mod tags;
pub mod traits;

pub use dispatch::{HttpDispatcher, PreparedRequest};
pub use param::{ParamKind, ParameterSpec};
pub use synth::OperationTool;
pub use tags::ListTagsTool;
pub use traits::{Tool, ToolDefinition};

use crate::error::{SynthesisError, ValidationError};
use crate::openapi::{ApiSpec, Operation};
use crate::types::{ToolCallResult, ToolFailure, ToolOutcome};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name-indexed, ordered set of tools. Read-only once built.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthesize a tool for every operation plus the `list_tags` utility.
    ///
    /// Operations that fail synthesis are logged and skipped.
    pub fn from_spec(spec: &ApiSpec, dispatcher: Arc<HttpDispatcher>) -> Self {
        let mut registry = Self::new();

        let names = synth::assign_tool_names(&spec.operations);
        for (operation, name) in spec.operations.iter().zip(names) {
            let tool =
                match OperationTool::synthesize(Arc::clone(operation), name.clone(), Arc::clone(&dispatcher)) {
                    Ok(tool) => tool,
                    Err(e) => {
                        warn!("Skipping operation {}: {}", operation.operation_id, e);
                        continue;
                    }
                };
            match registry.register(Arc::new(tool)) {
                Ok(()) => info!(
                    "Registered tool: {} ({} {})",
                    name, operation.method, operation.path
                ),
                Err(e) => warn!("Skipping operation {}: {}", operation.operation_id, e),
            }
        }

        if let Err(e) = registry.register(Arc::new(ListTagsTool::new(spec))) {
            warn!("Not registering list_tags: {}", e);
        }

        info!("Registered {} tools", registry.len());
        registry
    }

    /// Add a tool. Names must be unique.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), SynthesisError> {
        let name = tool.definition().name.clone();
        if self.by_name.contains_key(&name) {
            return Err(SynthesisError::DuplicateName(name));
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool signatures in registration order.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition().clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    /// The operation behind a tool name.
    pub fn operation(&self, name: &str) -> Option<&Arc<Operation>> {
        self.get(name).and_then(|t| t.operation())
    }

    /// Run a tool. Never fails: every outcome, including panics inside the
    /// tool, is reported as a [`ToolCallResult`].
    pub async fn invoke(&self, name: &str, arguments: Value) -> ToolCallResult {
        let started = Instant::now();
        let finish = |outcome: ToolOutcome| ToolCallResult {
            tool: name.to_string(),
            outcome,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        let Some(tool) = self.get(name) else {
            warn!("Unknown tool requested: {}", name);
            return finish(ToolOutcome::Failure {
                error: ValidationError::UnknownTool(name.to_string()).into(),
            });
        };

        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return finish(ToolOutcome::Failure {
                    error: ValidationError::NotAnObject(other.to_string()).into(),
                });
            }
        };

        match tool.operation() {
            Some(op) => info!("Executing tool: {} ({} {})", name, op.method, op.path),
            None => info!("Executing tool: {}", name),
        }
        let params = Value::Object(args.clone());
        debug!("Tool parameters: {}", params);

        let task_tool = Arc::clone(tool);
        let handle = tokio::spawn(async move { task_tool.execute(&args).await });

        let outcome = match handle.await {
            Ok(Ok(data)) => ToolOutcome::Success { data },
            Ok(Err(failure)) => ToolOutcome::Failure { error: failure },
            Err(join_err) => {
                error!("Tool {} aborted: {}", name, join_err);
                ToolOutcome::Failure {
                    error: ToolFailure::internal(format!("tool execution aborted: {join_err}")),
                }
            }
        };

        let result = finish(outcome);
        match &result.outcome {
            ToolOutcome::Success { data } => {
                info!("Tool {} executed successfully in {} ms", name, result.elapsed_ms);
                debug!("Result: {}", preview(&data.to_string(), 200));
            }
            ToolOutcome::Failure { error } => {
                warn!(
                    "Tool {} failed after {} ms: {} ({})",
                    name, result.elapsed_ms, error.message, error.kind
                );
            }
        }
        result
    }
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max - 3).collect();
        format!("{head}...")
    }
}
