//! `list_tags` utility tool: API tags with the tools grouped under each.

use super::synth::assign_tool_names;
use super::traits::{Tool, ToolDefinition};
use crate::openapi::ApiSpec;
use crate::types::ToolFailure;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub const LIST_TAGS_TOOL: &str = "list_tags";

/// Static tag index computed once from the loaded document.
#[derive(Debug, Clone)]
pub struct ListTagsTool {
    definition: ToolDefinition,
    index: Value,
}

impl ListTagsTool {
    pub fn new(spec: &ApiSpec) -> Self {
        Self {
            definition: ToolDefinition {
                name: LIST_TAGS_TOOL.to_string(),
                description: "List available API tags/endpoint groups".to_string(),
                parameters: json!({"type": "object", "properties": {}, "required": []}),
            },
            index: tag_index(spec),
        }
    }
}

#[async_trait]
impl Tool for ListTagsTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, _args: &Map<String, Value>) -> Result<Value, ToolFailure> {
        Ok(self.index.clone())
    }
}

/// Tag names as `list_tags` reports them, declared or derived.
pub fn tag_names(spec: &ApiSpec) -> Vec<String> {
    collect_tags(spec).into_iter().map(|(name, _, _)| name).collect()
}

/// Declared tags first; without any, tags are collected from operations.
fn collect_tags(spec: &ApiSpec) -> Vec<(String, String, Vec<Value>)> {
    let mut tags: Vec<(String, String, Vec<Value>)> = spec
        .tags
        .iter()
        .map(|t| (t.name.clone(), t.description.clone(), Vec::new()))
        .collect();

    if tags.is_empty() {
        for op in &spec.operations {
            for tag in &op.tags {
                if !tags.iter().any(|(name, _, _)| name == tag) {
                    tags.push((tag.clone(), format!("Operations tagged with {tag}"), Vec::new()));
                }
            }
        }
    }
    tags
}

/// Tags with the tools grouped under each, named as the registry names them.
pub fn tag_index(spec: &ApiSpec) -> Value {
    let mut tags = collect_tags(spec);
    let names = assign_tool_names(&spec.operations);

    for (op, tool_name) in spec.operations.iter().zip(names) {
        let entry = json!({
            "name": tool_name,
            "method": op.method.as_str(),
            "summary": op.summary,
        });
        for tag in &op.tags {
            if let Some((_, _, tools)) = tags.iter_mut().find(|(name, _, _)| name == tag) {
                tools.push(entry.clone());
            }
        }
    }

    let tags: Vec<Value> = tags
        .into_iter()
        .map(|(name, description, tools)| {
            json!({"name": name, "description": description, "tools": tools})
        })
        .collect();

    json!({ "tags": tags })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::parse_spec;

    #[test]
    fn tags_derived_from_operations() {
        let spec = parse_spec(
            r#"
paths:
  /spiders:
    get:
      operationId: list_spiders
      summary: List spiders
      tags: [Spiders]
  /tasks:
    get:
      operationId: list_tasks
      tags: [Tasks, Spiders]
"#,
        )
        .unwrap();

        let index = tag_index(&spec);
        let tags = index["tags"].as_array().unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0]["name"], "Spiders");
        assert_eq!(tags[0]["description"], "Operations tagged with Spiders");
        assert_eq!(tags[0]["tools"].as_array().unwrap().len(), 2);
        assert_eq!(tags[0]["tools"][0], json!({"name": "list_spiders", "method": "GET", "summary": "List spiders"}));
        assert_eq!(tags[1]["tools"][0]["name"], "list_tasks");
        assert_eq!(tag_names(&spec), ["Spiders", "Tasks"]);
    }

    #[test]
    fn colliding_tools_listed_under_registered_names() {
        let spec = parse_spec(
            r#"
paths:
  /spiders:
    get:
      operationId: spiders.list
      tags: [Spiders]
  /spiders/all:
    get:
      operationId: spiders_list
      tags: [Spiders]
"#,
        )
        .unwrap();

        let index = tag_index(&spec);
        let tools = index["tags"][0]["tools"].as_array().unwrap();
        assert_eq!(tools[0]["name"], "spiders_list");
        assert_eq!(tools[1]["name"], "spiders_list_2");
    }

    #[test]
    fn declared_tags_win() {
        let spec = parse_spec(
            r#"
tags:
  - name: Nodes
    description: Worker nodes
paths:
  /spiders:
    get:
      operationId: list_spiders
      tags: [Spiders]
"#,
        )
        .unwrap();
        let index = tag_index(&spec);
        assert_eq!(index["tags"].as_array().unwrap().len(), 1);
        assert_eq!(index["tags"][0]["tools"], json!([]));
    }
}
