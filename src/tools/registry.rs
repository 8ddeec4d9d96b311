use crate::adapters::AdapterCapabilities;
use crate::adapters::model_capabilities;
use crate::errors::{ForceError, ForceResult};
use crate::tools::blueprint::{ToolBlueprint, ToolType, dedup_blueprints, validate_blueprint};
use crate::tools::spec::{ParamSpec, ParamType, Route};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Utility tools executed by a local service instead of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalService {
    ListSessions,
    DescribeSession,
    CountProjectTokens,
    GetInstructions,
    ListForceGuides,
    ReadForceGuide,
    StartJob,
    PollJob,
    CancelJob,
    SearchProjectHistory,
    TaskFilesSearch,
    WorkWith,
    ConsultWith,
}

/// Model configuration attached to a generated tool.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub adapter_key: String,
    pub model_name: String,
    pub context_window: usize,
    pub timeout_secs: u64,
    pub description: String,
    /// Internal-only tools stay in the registry but are not exposed over the
    /// transport (`consult_with` routes to them).
    pub internal_only: bool,
}

/// Everything the executor needs to run one tool.
pub struct ToolMetadata {
    pub id: String,
    /// Struct-style display name (`ChatWithGPT52`).
    pub display_name: String,
    pub model_config: ModelConfig,
    pub parameters: Vec<ParamSpec>,
    pub capabilities: Option<AdapterCapabilities>,
    pub service: Option<LocalService>,
    pub cli: Option<&'static str>,
}

impl ToolMetadata {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Flatten a model name into an identifier segment: lowercase, alphanumerics
/// only (`gpt-5.2` → `gpt52`).
pub fn flatten_model_name(model: &str) -> String {
    model
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Title-case the cleaned segments of a model name, preserving all-uppercase
/// runs (`gpt-5.2` → `Gpt52`, `GPT-4.1` → `GPT41`).
pub fn struct_style_name(model: &str) -> String {
    let cleaned: String = model
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    cleaned
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
                part.to_string()
            } else {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_ascii_uppercase().to_string() + &chars.as_str().to_lowercase()
                    }
                    None => String::new(),
                }
            }
        })
        .collect()
}

/// Synthesized tool id for a blueprint (`chat_with_gpt52`,
/// `research_with_o3deepresearch`).
pub fn synthesized_id(bp: &ToolBlueprint) -> String {
    if let Some(name) = bp.tool_name {
        return name.to_string();
    }
    let prefix = match bp.tool_type {
        ToolType::Chat => "chat_with",
        ToolType::Research => "research_with",
    };
    format!("{prefix}_{}", flatten_model_name(bp.model_name))
}

/// Process-wide registry of generated and fixed tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolMetadata>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Build the full registry: one tool per blueprint plus the fixed tools.
    pub fn bootstrap(blueprints: Vec<ToolBlueprint>) -> ForceResult<Self> {
        let mut registry = Self::new();
        registry.install_blueprints(blueprints)?;
        registry.install_fixed_tools();
        info!("Tool registry ready with {} tools", registry.tools.len());
        Ok(registry)
    }

    pub fn install_blueprints(&mut self, blueprints: Vec<ToolBlueprint>) -> ForceResult<()> {
        for bp in dedup_blueprints(blueprints) {
            validate_blueprint(&bp)?;
            let id = synthesized_id(&bp);
            let prefix = match bp.tool_type {
                ToolType::Chat => "ChatWith",
                ToolType::Research => "ResearchWith",
            };
            let metadata = ToolMetadata {
                id: id.clone(),
                display_name: format!("{prefix}{}", struct_style_name(bp.model_name)),
                model_config: ModelConfig {
                    adapter_key: bp.adapter_key.to_string(),
                    model_name: bp.model_name.to_string(),
                    context_window: bp.context_window,
                    timeout_secs: bp.timeout_secs,
                    description: bp.description.to_string(),
                    internal_only: false,
                },
                parameters: (bp.params)(),
                capabilities: model_capabilities(bp.adapter_key, bp.model_name),
                service: None,
                cli: bp.cli,
            };
            self.register(metadata)?;
        }
        Ok(())
    }

    fn register(&mut self, metadata: ToolMetadata) -> ForceResult<()> {
        if self.tools.contains_key(&metadata.id) {
            return Err(ForceError::InvalidParameter {
                param: metadata.id.clone(),
                message: "duplicate tool id".into(),
            });
        }
        self.tools.insert(metadata.id.clone(), Arc::new(metadata));
        Ok(())
    }

    pub fn get_tool(&self, id: &str) -> Option<Arc<ToolMetadata>> {
        self.tools.get(id).cloned()
    }

    /// All externally visible tools, sorted by id.
    pub fn list_tools(&self) -> Vec<Arc<ToolMetadata>> {
        let mut tools: Vec<_> = self
            .tools
            .values()
            .filter(|t| !t.model_config.internal_only)
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }

    fn install_fixed_tools(&mut self) {
        let fixed: Vec<ToolMetadata> = vec![
            local_tool(
                "list_sessions",
                LocalService::ListSessions,
                "List recent sessions for this project",
                vec![
                    ParamSpec::prompt("limit", ParamType::Int, 0)
                        .with_default(serde_json::json!(10)),
                ],
            ),
            local_tool(
                "describe_session",
                LocalService::DescribeSession,
                "Summarize one session's conversation history",
                vec![ParamSpec::prompt("session_id", ParamType::String, 0)],
            ),
            local_tool(
                "count_project_tokens",
                LocalService::CountProjectTokens,
                "Count tokens for files and directories",
                vec![
                    ParamSpec::prompt("items", ParamType::StringList, 0),
                    ParamSpec::prompt("top_n", ParamType::Int, 1)
                        .with_default(serde_json::json!(10)),
                ],
            ),
            local_tool(
                "get_instructions",
                LocalService::GetInstructions,
                "Operating instructions for this gateway",
                vec![],
            ),
            local_tool(
                "list_force_guides",
                LocalService::ListForceGuides,
                "List available guide documents",
                vec![],
            ),
            local_tool(
                "read_force_guide",
                LocalService::ReadForceGuide,
                "Read one guide document",
                vec![ParamSpec::prompt("name", ParamType::String, 0)],
            ),
            local_tool(
                "start_job",
                LocalService::StartJob,
                "Start a long-running job for any registered tool",
                vec![
                    ParamSpec::prompt("target_tool", ParamType::String, 0),
                    ParamSpec::prompt("args", ParamType::Json, 1)
                        .with_default_factory(|| serde_json::json!({})),
                    ParamSpec::prompt("max_runtime_s", ParamType::Int, 2)
                        .with_default(serde_json::json!(3600)),
                ],
            ),
            local_tool(
                "poll_job",
                LocalService::PollJob,
                "Poll the status of a previously started job",
                vec![ParamSpec::prompt("job_id", ParamType::String, 0)],
            ),
            local_tool(
                "cancel_job",
                LocalService::CancelJob,
                "Request cancellation of a job",
                vec![ParamSpec::prompt("job_id", ParamType::String, 0)],
            ),
            local_tool(
                "search_project_history",
                LocalService::SearchProjectHistory,
                "Search stored conversation history for this project",
                vec![
                    ParamSpec::prompt("query", ParamType::String, 0),
                    ParamSpec::prompt("max_results", ParamType::Int, 1)
                        .with_default(serde_json::json!(40)),
                ],
            ),
            local_tool(
                "task_files_search",
                LocalService::TaskFilesSearch,
                "Search the vector stores attached to a session",
                vec![
                    ParamSpec::prompt("query", ParamType::String, 0),
                    ParamSpec::prompt("session_id", ParamType::String, 1),
                    ParamSpec::prompt("max_results", ParamType::Int, 2)
                        .with_default(serde_json::json!(20)),
                ],
            ),
            local_tool(
                "work_with",
                LocalService::WorkWith,
                "Delegate a task to an interactive CLI agent",
                vec![
                    ParamSpec::prompt("agent", ParamType::String, 0),
                    ParamSpec::prompt("task", ParamType::String, 1),
                    ParamSpec::new("session_id", ParamType::String, Route::Session),
                    ParamSpec::prompt("role", ParamType::String, 2)
                        .with_default(Value::String("default".into())),
                    ParamSpec::prompt("context", ParamType::StringList, 3)
                        .with_default_factory(|| Value::Array(Vec::new())),
                    ParamSpec::prompt("reasoning_effort", ParamType::String, 4)
                        .with_default(Value::String("medium".into())),
                    ParamSpec::prompt("cli_flags", ParamType::StringList, 5)
                        .with_default_factory(|| Value::Array(Vec::new())),
                    ParamSpec::prompt("timeout", ParamType::Int, 6)
                        .with_default(serde_json::json!(14_400)),
                ],
            ),
            local_tool(
                "consult_with",
                LocalService::ConsultWith,
                "Consult an API model, sharing this session's history",
                vec![
                    ParamSpec::prompt("model", ParamType::String, 0),
                    ParamSpec::prompt("question", ParamType::String, 1),
                    ParamSpec::new("session_id", ParamType::String, Route::Session),
                    ParamSpec::prompt("output_format", ParamType::String, 2)
                        .with_default(Value::String("markdown".into())),
                    ParamSpec::prompt("context", ParamType::StringList, 3)
                        .with_default_factory(|| Value::Array(Vec::new())),
                ],
            ),
        ];
        for tool in fixed {
            // Fixed ids are static; a collision is a programming error.
            self.register(tool).expect("fixed tool registration");
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn local_tool(
    id: &str,
    service: LocalService,
    description: &str,
    parameters: Vec<ParamSpec>,
) -> ToolMetadata {
    ToolMetadata {
        id: id.to_string(),
        display_name: struct_style_name(id),
        model_config: ModelConfig {
            adapter_key: String::new(),
            model_name: id.to_string(),
            context_window: 0,
            timeout_secs: 30,
            description: description.to_string(),
            internal_only: false,
        },
        parameters,
        capabilities: None,
        service: Some(service),
        cli: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::blueprint::all_blueprints;

    #[test]
    fn flattening_strips_punctuation() {
        assert_eq!(flatten_model_name("gpt-5.2"), "gpt52");
        assert_eq!(flatten_model_name("claude-opus-4-5"), "claudeopus45");
        assert_eq!(flatten_model_name("o3-deep-research"), "o3deepresearch");
    }

    #[test]
    fn struct_names_preserve_uppercase_runs() {
        assert_eq!(struct_style_name("GPT-4.1"), "GPT41");
        assert_eq!(struct_style_name("gpt-5.2"), "Gpt52");
        assert_eq!(struct_style_name("claude-opus-4-5"), "ClaudeOpus45");
    }

    #[test]
    fn every_blueprint_resolves_via_synthesized_id() {
        let registry = ToolRegistry::bootstrap(all_blueprints()).unwrap();
        for bp in all_blueprints() {
            let tool = registry
                .get_tool(&synthesized_id(&bp))
                .unwrap_or_else(|| panic!("missing tool for {}", bp.model_name));
            assert_eq!(tool.model_config.model_name, bp.model_name);
        }
    }

    #[test]
    fn chat_and_research_prefixes() {
        let bps = all_blueprints();
        let research = bps
            .iter()
            .find(|b| matches!(b.tool_type, ToolType::Research))
            .unwrap();
        assert!(synthesized_id(research).starts_with("research_with_"));
        let chat = bps
            .iter()
            .find(|b| matches!(b.tool_type, ToolType::Chat))
            .unwrap();
        assert!(synthesized_id(chat).starts_with("chat_with_"));
    }

    #[test]
    fn fixed_tools_are_registered() {
        let registry = ToolRegistry::bootstrap(all_blueprints()).unwrap();
        for id in [
            "work_with",
            "consult_with",
            "list_sessions",
            "describe_session",
            "count_project_tokens",
            "get_instructions",
            "list_force_guides",
            "read_force_guide",
            "start_job",
            "poll_job",
            "cancel_job",
            "search_project_history",
            "task_files_search",
        ] {
            assert!(registry.get_tool(id).is_some(), "missing fixed tool {id}");
        }
    }

    #[test]
    fn generated_tools_carry_capabilities() {
        let registry = ToolRegistry::bootstrap(all_blueprints()).unwrap();
        let tool = registry.get_tool("chat_with_gpt52").unwrap();
        assert!(tool.capabilities.is_some());
        assert_eq!(tool.model_config.adapter_key, "openai");
        assert_eq!(tool.display_name, "ChatWithGpt52");
    }

    #[test]
    fn list_tools_is_sorted_and_complete() {
        let registry = ToolRegistry::bootstrap(all_blueprints()).unwrap();
        let tools = registry.list_tools();
        let mut ids: Vec<_> = tools.iter().map(|t| t.id.clone()).collect();
        let sorted = {
            let mut s = ids.clone();
            s.sort();
            s
        };
        assert_eq!(ids, sorted);
        ids.retain(|i| i.starts_with("chat_with_") || i.starts_with("research_with_"));
        assert_eq!(ids.len(), all_blueprints().len());
    }
}
