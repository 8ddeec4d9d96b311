use crate::adapters::model_capabilities;
use crate::errors::{ForceError, ForceResult};
use crate::tools::spec::{ParamSpec, Route};
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolType {
    Chat,
    Research,
}

/// Startup-time data describing one model→tool mapping. Adding a model is a
/// data change here, not code elsewhere.
#[derive(Clone)]
pub struct ToolBlueprint {
    pub model_name: &'static str,
    pub adapter_key: &'static str,
    pub params: fn() -> Vec<ParamSpec>,
    pub description: &'static str,
    pub timeout_secs: u64,
    pub context_window: usize,
    pub tool_type: ToolType,
    /// Optional friendly name overriding the synthesized id.
    pub tool_name: Option<&'static str>,
    /// CLI executable key for models reachable through `work_with`.
    pub cli: Option<&'static str>,
}

const CHAT_TIMEOUT: u64 = 300;
const RESEARCH_TIMEOUT: u64 = 3600;
const ANTHROPIC_TIMEOUT: u64 = 600;

fn blueprint(
    model_name: &'static str,
    adapter_key: &'static str,
    timeout_secs: u64,
    tool_type: ToolType,
    cli: Option<&'static str>,
) -> ToolBlueprint {
    let context_window = model_capabilities(adapter_key, model_name)
        .and_then(|c| c.max_context_window)
        .unwrap_or(200_000);
    let description = model_capabilities(adapter_key, model_name)
        .map(|c| c.description)
        .unwrap_or("");
    ToolBlueprint {
        model_name,
        adapter_key,
        params: params_for_adapter_static(adapter_key),
        description,
        timeout_secs,
        context_window,
        tool_type,
        tool_name: None,
        cli,
    }
}

fn params_for_adapter_static(adapter_key: &'static str) -> fn() -> Vec<ParamSpec> {
    match adapter_key {
        "openai" => crate::tools::spec::openai_params,
        "anthropic" => crate::tools::spec::anthropic_params,
        "google" => crate::tools::spec::gemini_params,
        "xai" => crate::tools::spec::grok_params,
        _ => crate::tools::spec::base_params,
    }
}

/// Every provider's blueprints, registered at startup.
pub fn all_blueprints() -> Vec<ToolBlueprint> {
    vec![
        // OpenAI
        blueprint("gpt-5.2", "openai", CHAT_TIMEOUT, ToolType::Chat, Some("codex")),
        blueprint("gpt-5.2-pro", "openai", CHAT_TIMEOUT, ToolType::Chat, None),
        blueprint(
            "o3-deep-research",
            "openai",
            RESEARCH_TIMEOUT,
            ToolType::Research,
            None,
        ),
        blueprint("o4-mini", "openai", CHAT_TIMEOUT, ToolType::Chat, None),
        // Anthropic
        blueprint(
            "claude-opus-4-5",
            "anthropic",
            ANTHROPIC_TIMEOUT,
            ToolType::Chat,
            Some("claude"),
        ),
        blueprint(
            "claude-sonnet-4-5",
            "anthropic",
            ANTHROPIC_TIMEOUT,
            ToolType::Chat,
            Some("claude"),
        ),
        blueprint(
            "claude-haiku-4-5",
            "anthropic",
            ANTHROPIC_TIMEOUT,
            ToolType::Chat,
            Some("claude"),
        ),
        // Google
        blueprint("gemini-3-pro", "google", CHAT_TIMEOUT, ToolType::Chat, Some("gemini")),
        blueprint(
            "gemini-3-flash",
            "google",
            CHAT_TIMEOUT,
            ToolType::Chat,
            Some("gemini"),
        ),
        // xAI
        blueprint("grok-4.1", "xai", CHAT_TIMEOUT, ToolType::Chat, None),
        blueprint("grok-4-fast", "xai", CHAT_TIMEOUT, ToolType::Chat, None),
        blueprint("grok-3-mini", "xai", CHAT_TIMEOUT, ToolType::Chat, None),
    ]
}

/// Validate a blueprint before registration. Violations are programming
/// errors and fail startup.
pub fn validate_blueprint(bp: &ToolBlueprint) -> ForceResult<()> {
    let fail = |msg: String| {
        Err(ForceError::InvalidParameter {
            param: bp.model_name.to_string(),
            message: msg,
        })
    };
    if bp.model_name.is_empty() {
        return fail("blueprint must have model_name".into());
    }
    if bp.adapter_key.is_empty() {
        return fail("blueprint must have adapter_key".into());
    }
    if bp.description.is_empty() {
        return fail("blueprint must have description".into());
    }
    if bp.timeout_secs == 0 {
        return fail("blueprint must have positive timeout".into());
    }
    if bp.context_window == 0 {
        return fail("blueprint must have positive context_window".into());
    }

    let params = (bp.params)();
    let mut names = HashSet::new();
    let mut positions = Vec::new();
    for p in &params {
        if !names.insert(p.name) {
            return fail(format!("duplicate parameter '{}'", p.name));
        }
        if p.default.is_some() && p.default_factory.is_some() {
            return fail(format!(
                "parameter '{}' declares both default and default_factory",
                p.name
            ));
        }
        if p.required && p.has_default() {
            return fail(format!("required parameter '{}' has a default", p.name));
        }
        if let Some(pos) = p.position {
            if p.route != Route::Prompt {
                return fail(format!(
                    "parameter '{}' has a position but is not prompt-routed",
                    p.name
                ));
            }
            positions.push(pos);
        }
    }
    // Positional prompt parameters must be unique and contiguous from zero.
    positions.sort_unstable();
    for (i, pos) in positions.iter().enumerate() {
        if *pos != i {
            return fail(format!("prompt positions are not contiguous: {positions:?}"));
        }
    }

    // The base parameter set must be present: a generated tool without
    // instructions or a session is unusable.
    for required in ["instructions", "output_format", "session_id"] {
        if !params.iter().any(|p| p.name == required) {
            return fail(format!("missing base parameter '{required}'"));
        }
    }
    Ok(())
}

/// Deduplicate blueprints by model name (first registration wins) and drop
/// invalid ones loudly.
pub fn dedup_blueprints(bps: Vec<ToolBlueprint>) -> Vec<ToolBlueprint> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for bp in bps {
        if !seen.insert(bp.model_name) {
            warn!("Model {} already registered, skipping duplicate", bp.model_name);
            continue;
        }
        debug!("Registered blueprint for {}", bp.model_name);
        out.push(bp);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_blueprints_validate() {
        for bp in all_blueprints() {
            validate_blueprint(&bp).unwrap_or_else(|e| panic!("{}: {e}", bp.model_name));
        }
    }

    #[test]
    fn blueprints_cover_four_families() {
        let keys: HashSet<&str> = all_blueprints().iter().map(|b| b.adapter_key).collect();
        assert_eq!(
            keys,
            HashSet::from(["openai", "anthropic", "google", "xai"])
        );
    }

    #[test]
    fn model_names_are_unique() {
        let bps = all_blueprints();
        let names: HashSet<&str> = bps.iter().map(|b| b.model_name).collect();
        assert_eq!(names.len(), bps.len());
    }

    #[test]
    fn dedup_drops_later_duplicates() {
        let mut bps = all_blueprints();
        bps.push(bps[0].clone());
        let n = bps.len();
        let deduped = dedup_blueprints(bps);
        assert_eq!(deduped.len(), n - 1);
    }

    #[test]
    fn research_blueprint_gets_long_timeout() {
        let bps = all_blueprints();
        let research = bps
            .iter()
            .find(|b| b.tool_type == ToolType::Research)
            .unwrap();
        assert_eq!(research.timeout_secs, RESEARCH_TIMEOUT);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut bp = all_blueprints().remove(0);
        bp.timeout_secs = 0;
        assert!(validate_blueprint(&bp).is_err());
    }
}
