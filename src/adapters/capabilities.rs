/// What the framework needs to know about an adapter.
///
/// Capabilities drive parameter admissibility (`requires_capability`
/// predicates), tool-set composition (a native file-search provider
/// suppresses the internal task-file search tool), request shaping, and
/// timeout/async policy.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterCapabilities {
    /// Provider whose native file-search tool can read our vector stores,
    /// when one exists (e.g. "openai").
    pub native_vector_store_provider: Option<String>,
    pub supports_tools: bool,
    pub supports_streaming: bool,
    pub supports_temperature: bool,
    pub supports_structured_output: bool,
    pub supports_vision: bool,
    pub supports_web_search: bool,
    pub supports_live_search: bool,
    pub supports_reasoning_effort: bool,
    /// None: sequential only. Some(-1): unlimited. Some(n): bounded.
    pub parallel_function_calls: Option<i32>,
    pub max_context_window: Option<usize>,
    pub max_output_tokens: Option<usize>,
    /// Requests must run in background mode (long-horizon research models).
    pub force_background: bool,
    /// Applied only when the caller did not specify an effort.
    pub default_reasoning_effort: Option<&'static str>,
    pub description: &'static str,
}

impl Default for AdapterCapabilities {
    fn default() -> Self {
        Self {
            native_vector_store_provider: None,
            supports_tools: true,
            supports_streaming: true,
            supports_temperature: true,
            supports_structured_output: false,
            supports_vision: false,
            supports_web_search: false,
            supports_live_search: false,
            supports_reasoning_effort: false,
            parallel_function_calls: Some(-1),
            max_context_window: None,
            max_output_tokens: None,
            force_background: false,
            default_reasoning_effort: None,
            description: "",
        }
    }
}

fn openai_base() -> AdapterCapabilities {
    AdapterCapabilities {
        native_vector_store_provider: Some("openai".into()),
        supports_structured_output: true,
        supports_reasoning_effort: true,
        default_reasoning_effort: Some("medium"),
        ..Default::default()
    }
}

fn anthropic_base() -> AdapterCapabilities {
    AdapterCapabilities {
        supports_vision: true,
        supports_structured_output: true,
        parallel_function_calls: Some(1),
        max_context_window: Some(200_000),
        max_output_tokens: Some(64_000),
        supports_reasoning_effort: true,
        ..Default::default()
    }
}

fn gemini_base() -> AdapterCapabilities {
    AdapterCapabilities {
        supports_vision: true,
        supports_structured_output: true,
        supports_reasoning_effort: true,
        max_context_window: Some(1_000_000),
        ..Default::default()
    }
}

fn grok_base() -> AdapterCapabilities {
    AdapterCapabilities {
        supports_live_search: true,
        max_context_window: Some(256_000),
        ..Default::default()
    }
}

/// Capabilities for a specific model, keyed by adapter family.
pub fn model_capabilities(adapter_key: &str, model: &str) -> Option<AdapterCapabilities> {
    match adapter_key {
        "openai" => match model {
            "gpt-5.2" => Some(AdapterCapabilities {
                max_context_window: Some(400_000),
                max_output_tokens: Some(128_000),
                supports_vision: true,
                description: "Flagship general model with strong tool use",
                ..openai_base()
            }),
            "gpt-5.2-pro" => Some(AdapterCapabilities {
                max_context_window: Some(400_000),
                max_output_tokens: Some(128_000),
                supports_vision: true,
                default_reasoning_effort: Some("high"),
                description: "Extended-reasoning variant for hard problems",
                ..openai_base()
            }),
            "o3-deep-research" => Some(AdapterCapabilities {
                max_context_window: Some(200_000),
                supports_web_search: true,
                force_background: true,
                supports_temperature: false,
                description: "Long-horizon research model with web search",
                ..openai_base()
            }),
            "o4-mini" => Some(AdapterCapabilities {
                max_context_window: Some(200_000),
                supports_temperature: false,
                description: "Fast reasoning model for quick consultations",
                ..openai_base()
            }),
            _ => None,
        },
        "anthropic" => match model {
            "claude-opus-4-5" => Some(AdapterCapabilities {
                description: "Premium maximum-intelligence model with extended thinking",
                ..anthropic_base()
            }),
            "claude-sonnet-4-5" => Some(AdapterCapabilities {
                max_context_window: Some(1_000_000),
                description: "Balanced model for fast, high-quality work with 1M context",
                ..anthropic_base()
            }),
            "claude-haiku-4-5" => Some(AdapterCapabilities {
                supports_reasoning_effort: false,
                description: "Fast, inexpensive model for summaries and triage",
                ..anthropic_base()
            }),
            _ => None,
        },
        "google" => match model {
            "gemini-3-pro" => Some(AdapterCapabilities {
                description: "Deep multimodal analysis and complex reasoning",
                ..gemini_base()
            }),
            "gemini-3-flash" => Some(AdapterCapabilities {
                description: "Fast summarization and quick analysis",
                ..gemini_base()
            }),
            _ => None,
        },
        "xai" => match model {
            "grok-4.1" => Some(AdapterCapabilities {
                description: "Enhanced reasoning with Live Search and 256k context",
                ..grok_base()
            }),
            "grok-4-fast" => Some(AdapterCapabilities {
                description: "Fast inference with Live Search",
                ..grok_base()
            }),
            "grok-3-mini" => Some(AdapterCapabilities {
                max_context_window: Some(32_000),
                supports_reasoning_effort: true,
                description: "Quick responses with adjustable reasoning effort",
                ..grok_base()
            }),
            _ => None,
        },
        _ => None,
    }
}

/// Reasoning-effort → thinking-budget mapping for Gemini models.
pub fn gemini_thinking_budget(effort: &str) -> Option<u32> {
    const MAX_BUDGET: u32 = 32_768;
    match effort {
        "low" => Some((MAX_BUDGET as f64 * 0.40) as u32),
        "medium" => Some((MAX_BUDGET as f64 * 0.60) as u32),
        "high" | "xhigh" => Some(MAX_BUDGET),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_resolve() {
        for (key, model) in [
            ("openai", "gpt-5.2"),
            ("openai", "o3-deep-research"),
            ("anthropic", "claude-opus-4-5"),
            ("google", "gemini-3-pro"),
            ("xai", "grok-4.1"),
        ] {
            assert!(
                model_capabilities(key, model).is_some(),
                "missing capabilities for {key}/{model}"
            );
        }
    }

    #[test]
    fn unknown_model_is_none() {
        assert!(model_capabilities("openai", "gpt-2").is_none());
        assert!(model_capabilities("acme", "gpt-5.2").is_none());
    }

    #[test]
    fn research_model_forces_background() {
        let caps = model_capabilities("openai", "o3-deep-research").unwrap();
        assert!(caps.force_background);
        assert!(caps.supports_web_search);
    }

    #[test]
    fn anthropic_is_sequential_on_tool_calls() {
        let caps = model_capabilities("anthropic", "claude-sonnet-4-5").unwrap();
        assert_eq!(caps.parallel_function_calls, Some(1));
    }

    #[test]
    fn thinking_budget_scales_with_effort() {
        assert!(gemini_thinking_budget("low").unwrap() < gemini_thinking_budget("high").unwrap());
        assert!(gemini_thinking_budget("bogus").is_none());
    }
}
