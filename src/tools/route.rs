use crate::tools::registry::ToolMetadata;
use crate::tools::spec::Route;
use serde_json::{Map, Value};
use tracing::warn;

/// The five-way split of validated parameters by declared role.
#[derive(Debug, Default)]
pub struct RoutedParams {
    /// Prompt parameters: positional ones first in position order, then the
    /// rest in declaration order.
    pub prompt: Vec<(String, Value)>,
    pub adapter: Map<String, Value>,
    /// File/directory paths that feed vector-store creation. List-valued
    /// parameters are concatenated; multiple parameters of this route follow
    /// declaration order.
    pub vector_store: Vec<String>,
    pub session: Map<String, Value>,
    pub vector_store_ids: Vec<String>,
    pub structured_output: Option<Value>,
}

impl RoutedParams {
    pub fn session_id(&self) -> Option<&str> {
        self.session.get("session_id").and_then(Value::as_str)
    }

    pub fn prompt_value(&self, name: &str) -> Option<&Value> {
        self.prompt.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Remove and return a prompt parameter (the executor pulls `context`
    /// out before the prompt engine runs).
    pub fn take_prompt_value(&mut self, name: &str) -> Option<Value> {
        let idx = self.prompt.iter().position(|(n, _)| n == name)?;
        Some(self.prompt.remove(idx).1)
    }
}

/// Partition validated parameters by their declared route.
pub fn route_params(metadata: &ToolMetadata, validated: Map<String, Value>) -> RoutedParams {
    let mut routed = RoutedParams::default();
    let mut positional: Vec<(usize, String, Value)> = Vec::new();
    let mut trailing: Vec<(String, Value)> = Vec::new();

    // Iterate in declaration order so multi-parameter routes are stable.
    for spec in &metadata.parameters {
        let Some(value) = validated.get(spec.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let value = value.clone();
        match spec.route {
            Route::Prompt => match spec.position {
                Some(pos) => positional.push((pos, spec.name.to_string(), value)),
                None => trailing.push((spec.name.to_string(), value)),
            },
            Route::Adapter => {
                routed.adapter.insert(spec.name.to_string(), value);
            }
            Route::VectorStore => match value {
                Value::Array(items) => {
                    routed
                        .vector_store
                        .extend(items.into_iter().filter_map(|v| match v {
                            Value::String(s) => Some(s),
                            other => {
                                warn!("Dropping non-string vector_store entry: {other}");
                                None
                            }
                        }));
                }
                Value::String(s) => routed.vector_store.push(s),
                other => warn!("Dropping non-path vector_store value: {other}"),
            },
            Route::Session => {
                routed.session.insert(spec.name.to_string(), value);
            }
            Route::VectorStoreIds => {
                if let Value::Array(items) = value {
                    routed
                        .vector_store_ids
                        .extend(items.into_iter().filter_map(|v| {
                            v.as_str().map(String::from)
                        }));
                }
            }
            Route::StructuredOutput => {
                routed.structured_output = Some(value);
            }
        }
    }

    positional.sort_by_key(|(pos, _, _)| *pos);
    routed.prompt = positional
        .into_iter()
        .map(|(_, name, value)| (name, value))
        .chain(trailing)
        .collect();
    routed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::blueprint::all_blueprints;
    use crate::tools::registry::ToolRegistry;
    use serde_json::json;

    fn tool(id: &str) -> std::sync::Arc<ToolMetadata> {
        ToolRegistry::bootstrap(all_blueprints())
            .unwrap()
            .get_tool(id)
            .unwrap()
    }

    #[test]
    fn five_way_split() {
        let tool = tool("chat_with_grok41");
        let mut validated = Map::new();
        validated.insert("instructions".into(), json!("analyze"));
        validated.insert("output_format".into(), json!("json"));
        validated.insert("context".into(), json!(["/src"]));
        validated.insert("session_id".into(), json!("s1"));
        validated.insert("attachments".into(), json!(["/tmp/a.pdf", "/tmp/b.pdf"]));
        validated.insert("vector_store_ids".into(), json!(["vs_9"]));
        validated.insert("temperature".into(), json!(0.5));
        validated.insert("structured_output_schema".into(), json!({"type": "object"}));

        let routed = route_params(&tool, validated);
        assert_eq!(routed.session_id(), Some("s1"));
        assert_eq!(routed.adapter["temperature"], json!(0.5));
        assert_eq!(routed.vector_store, vec!["/tmp/a.pdf", "/tmp/b.pdf"]);
        assert_eq!(routed.vector_store_ids, vec!["vs_9"]);
        assert_eq!(routed.structured_output, Some(json!({"type": "object"})));
    }

    #[test]
    fn positional_prompt_params_keep_declared_order() {
        let tool = tool("chat_with_gpt52");
        let mut validated = Map::new();
        // Insert out of order; routing must restore position order.
        validated.insert("context".into(), json!(["/src"]));
        validated.insert("output_format".into(), json!("text"));
        validated.insert("instructions".into(), json!("go"));

        let routed = route_params(&tool, validated);
        let names: Vec<&str> = routed.prompt.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["instructions", "output_format", "context"]);
    }

    #[test]
    fn null_values_are_skipped() {
        let tool = tool("chat_with_gpt52");
        let mut validated = Map::new();
        validated.insert("instructions".into(), Value::Null);
        let routed = route_params(&tool, validated);
        assert!(routed.prompt.is_empty());
    }

    #[test]
    fn take_prompt_value_removes_entry() {
        let tool = tool("chat_with_gpt52");
        let mut validated = Map::new();
        validated.insert("instructions".into(), json!("go"));
        validated.insert("context".into(), json!(["/src"]));
        let mut routed = route_params(&tool, validated);
        assert_eq!(routed.take_prompt_value("context"), Some(json!(["/src"])));
        assert!(routed.prompt_value("context").is_none());
        assert!(routed.prompt_value("instructions").is_some());
    }
}
