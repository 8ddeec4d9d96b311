use crate::adapters::AdapterCapabilities;
use serde_json::Value;

/// Where a validated parameter is routed during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Prompt,
    Adapter,
    VectorStore,
    Session,
    VectorStoreIds,
    StructuredOutput,
}

/// Wire-level type expected for a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
    StringList,
    Json,
}

/// Declarative description of one tool parameter.
///
/// `default` and `default_factory` are mutually exclusive; the factory exists
/// for list/map defaults so each call gets a fresh value.
#[derive(Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub param_type: ParamType,
    pub route: Route,
    pub position: Option<usize>,
    pub required: bool,
    pub default: Option<Value>,
    pub default_factory: Option<fn() -> Value>,
    pub description: &'static str,
    pub requires_capability: Option<fn(&AdapterCapabilities) -> bool>,
}

impl std::fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("route", &self.route)
            .field("position", &self.position)
            .field("required", &self.required)
            .finish()
    }
}

impl ParamSpec {
    pub fn new(name: &'static str, param_type: ParamType, route: Route) -> Self {
        Self {
            name,
            param_type,
            route,
            position: None,
            required: true,
            default: None,
            default_factory: None,
            description: "",
            requires_capability: None,
        }
    }

    pub fn prompt(name: &'static str, param_type: ParamType, position: usize) -> Self {
        Self {
            position: Some(position),
            ..Self::new(name, param_type, Route::Prompt)
        }
    }

    pub fn adapter(name: &'static str, param_type: ParamType) -> Self {
        Self::new(name, param_type, Route::Adapter)
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self.required = false;
        self
    }

    pub fn with_default_factory(mut self, factory: fn() -> Value) -> Self {
        self.default_factory = Some(factory);
        self.required = false;
        self
    }

    pub fn when(mut self, predicate: fn(&AdapterCapabilities) -> bool) -> Self {
        self.requires_capability = Some(predicate);
        self
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.default_factory.is_some()
    }

    /// Materialize the default value, applying the factory fresh per call.
    pub fn default_value(&self) -> Option<Value> {
        if let Some(factory) = self.default_factory {
            return Some(factory());
        }
        self.default.clone()
    }
}

fn empty_list() -> Value {
    Value::Array(Vec::new())
}

/// Parameters every chat/research tool shares.
pub fn base_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::prompt("instructions", ParamType::String, 0)
            .describe("What you want the model to do"),
        ParamSpec::prompt("output_format", ParamType::String, 1)
            .describe("Desired shape of the response"),
        ParamSpec::prompt("context", ParamType::StringList, 2)
            .with_default_factory(empty_list)
            .describe("Files and directories to make available to the model"),
        ParamSpec::new("session_id", ParamType::String, Route::Session)
            .describe("Conversation identifier; history is kept per session"),
        ParamSpec::new("attachments", ParamType::StringList, Route::VectorStore)
            .with_default_factory(empty_list)
            .describe("Files sent straight to the vector store, bypassing the text heuristic"),
        ParamSpec::new("vector_store_ids", ParamType::StringList, Route::VectorStoreIds)
            .with_default_factory(empty_list)
            .describe("Existing vector store ids to search in addition to this call's"),
        ParamSpec::new(
            "structured_output_schema",
            ParamType::Json,
            Route::StructuredOutput,
        )
        .optional()
        .when(|c| c.supports_structured_output)
        .describe("JSON schema the response must satisfy"),
        ParamSpec::adapter("disable_history_search", ParamType::Bool)
            .with_default(Value::Bool(false))
            .describe("Hide the project-history search tool from the model"),
    ]
}

pub fn openai_params() -> Vec<ParamSpec> {
    let mut params = base_params();
    params.push(
        ParamSpec::adapter("temperature", ParamType::Float)
            .with_default(serde_json::json!(0.2))
            .when(|c| c.supports_temperature)
            .describe("Sampling temperature"),
    );
    params.push(
        ParamSpec::adapter("reasoning_effort", ParamType::String)
            .optional()
            .when(|c| c.supports_reasoning_effort)
            .describe("Reasoning effort (low/medium/high/xhigh)"),
    );
    params
}

pub fn anthropic_params() -> Vec<ParamSpec> {
    let mut params = base_params();
    params.push(
        ParamSpec::adapter("temperature", ParamType::Float)
            .with_default(serde_json::json!(0.7))
            .when(|c| c.supports_temperature),
    );
    params.push(
        ParamSpec::adapter("reasoning_effort", ParamType::String)
            .optional()
            .when(|c| c.supports_reasoning_effort)
            .describe("Maps to the extended-thinking budget"),
    );
    params
}

pub fn gemini_params() -> Vec<ParamSpec> {
    let mut params = base_params();
    params.push(
        ParamSpec::adapter("temperature", ParamType::Float)
            .with_default(serde_json::json!(1.0))
            .when(|c| c.supports_temperature),
    );
    params.push(
        ParamSpec::adapter("reasoning_effort", ParamType::String)
            .optional()
            .when(|c| c.supports_reasoning_effort)
            .describe("Maps to the thinking budget"),
    );
    params
}

pub fn grok_params() -> Vec<ParamSpec> {
    let mut params = base_params();
    params.push(
        ParamSpec::adapter("temperature", ParamType::Float)
            .with_default(serde_json::json!(0.7))
            .when(|c| c.supports_temperature),
    );
    params.push(
        ParamSpec::adapter("search_mode", ParamType::String)
            .with_default(Value::String("auto".into()))
            .when(|c| c.supports_live_search)
            .describe("Live Search mode: auto, on, or off"),
    );
    params.push(
        ParamSpec::adapter("return_citations", ParamType::Bool)
            .with_default(Value::Bool(true))
            .when(|c| c.supports_live_search),
    );
    params.push(
        ParamSpec::adapter("reasoning_effort", ParamType::String)
            .optional()
            .when(|c| c.supports_reasoning_effort)
            .describe("Supported by mini models only"),
    );
    params
}

pub fn params_for_adapter(adapter_key: &str) -> Vec<ParamSpec> {
    match adapter_key {
        "openai" => openai_params(),
        "anthropic" => anthropic_params(),
        "google" => gemini_params(),
        "xai" => grok_params(),
        _ => base_params(),
    }
}
