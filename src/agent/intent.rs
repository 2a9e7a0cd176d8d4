//! Intent routing: ask the model which tools a query needs before the main
//! completion, so the catalog sent with it can be narrowed.

use crate::providers::LlmProvider;
use crate::tools::ToolDefinition;
use crate::types::ChatMessage;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Classification of a user query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Answerable without the API.
    Generic,
    /// Names of the tools the model expects to need.
    Tools(Vec<String>),
}

fn classifier_prompt(tags: &[String]) -> String {
    format!(
        r#"You are an intent classifier for the Crawlab API.
Your task is to determine which API tools would be useful for answering the user's query.
Available API tags: {}

If the query requires using the API, respond with a JSON array of tool names that would be helpful.
If the query is generic and doesn't require API access, respond with "Generic".

Example 1:
User: "List all spiders in the system"
You: ["list_spiders"]

Example 2:
User: "What is the capital of France?"
You: "Generic""#,
        tags.join(", ")
    )
}

/// Classify `query`. Any provider failure or unreadable answer is `Generic`.
pub async fn identify_intent(
    provider: &dyn LlmProvider,
    query: &str,
    tags: &[String],
    model: Option<&str>,
) -> Intent {
    info!("Identifying user intent");
    let messages = [ChatMessage::system(classifier_prompt(tags)), ChatMessage::user(query)];

    match provider.chat_completion(&messages, None, model).await {
        Ok(response) => {
            let text = response.content.unwrap_or_default();
            let intent = parse_intent(&text);
            info!("Intent identified: {:?}", intent);
            intent
        }
        Err(e) => {
            warn!("Intent classification failed, assuming generic: {}", e);
            Intent::Generic
        }
    }
}

/// Interpret a classifier answer.
pub fn parse_intent(text: &str) -> Intent {
    let text = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => {
            let names: Vec<String> = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            if names.is_empty() {
                Intent::Generic
            } else {
                Intent::Tools(names)
            }
        }
        _ => {
            if !text.trim_matches('"').eq_ignore_ascii_case("generic") {
                debug!("Unrecognized intent answer: {}", text);
            }
            Intent::Generic
        }
    }
}

/// Catalog to send for an intent; `None` means prompt without tools.
pub fn narrow_catalog(catalog: &[ToolDefinition], intent: &Intent) -> Option<Vec<ToolDefinition>> {
    let Intent::Tools(names) = intent else {
        return None;
    };
    let selected: Vec<ToolDefinition> = catalog
        .iter()
        .filter(|t| names.iter().any(|n| n == &t.name))
        .cloned()
        .collect();
    if selected.is_empty() {
        warn!("Intent named no known tools: {:?}", names);
        None
    } else {
        Some(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_classifier_answers() {
        assert_eq!(parse_intent("Generic"), Intent::Generic);
        assert_eq!(parse_intent("\"Generic\""), Intent::Generic);
        assert_eq!(
            parse_intent(r#"["list_spiders", "get_task"]"#),
            Intent::Tools(vec!["list_spiders".into(), "get_task".into()])
        );
        assert_eq!(
            parse_intent("```json\n[\"list_nodes\"]\n```"),
            Intent::Tools(vec!["list_nodes".into()])
        );
        assert_eq!(parse_intent("[]"), Intent::Generic);
        assert_eq!(parse_intent("I think you want spiders"), Intent::Generic);
    }

    #[test]
    fn narrows_to_known_tools() {
        let tool = |name: &str| ToolDefinition {
            name: name.into(),
            description: String::new(),
            parameters: json!({"type": "object"}),
        };
        let catalog = vec![tool("list_spiders"), tool("get_task"), tool("list_tags")];

        let narrowed = narrow_catalog(&catalog, &Intent::Tools(vec!["get_task".into(), "nope".into()])).unwrap();
        assert_eq!(narrowed, vec![tool("get_task")]);
        assert!(narrow_catalog(&catalog, &Intent::Tools(vec!["nope".into()])).is_none());
        assert!(narrow_catalog(&catalog, &Intent::Generic).is_none());
    }
}
