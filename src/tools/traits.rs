//! Tool trait definition.

use crate::openapi::Operation;
use crate::types::ToolFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Definition of a tool exposed to the inference model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the arguments.
    pub parameters: Value,
}

/// An invocable tool held by the registry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and argument schema.
    fn definition(&self) -> &ToolDefinition;

    /// The backend operation this tool calls, if any.
    fn operation(&self) -> Option<&Arc<Operation>> {
        None
    }

    /// Execute the tool with raw model-supplied arguments.
    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolFailure>;
}
