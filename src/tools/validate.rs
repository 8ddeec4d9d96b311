use crate::adapters::AdapterCapabilities;
use crate::errors::{ForceError, ForceResult};
use crate::tools::registry::ToolMetadata;
use crate::tools::spec::{ParamSpec, ParamType};
use serde_json::{Map, Value};
use tracing::warn;

/// Validates a raw parameter mapping against a tool's declared parameters.
///
/// Produces a typed, defaulted, filtered mapping. Unknown parameters are
/// rejected under strict mode and warned about otherwise. `default_factory`
/// runs fresh per call. Capability predicates reject caller-supplied
/// parameters the model does not support; capability-gated defaults are
/// silently omitted instead.
pub struct ParameterValidator {
    strict: bool,
}

impl ParameterValidator {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn validate(
        &self,
        metadata: &ToolMetadata,
        kwargs: &Map<String, Value>,
        capabilities: Option<&AdapterCapabilities>,
    ) -> ForceResult<Map<String, Value>> {
        // Unknown parameters first, so strict mode fails before defaults run.
        for key in kwargs.keys() {
            if metadata.param(key).is_none() {
                if self.strict {
                    return Err(ForceError::InvalidParameter {
                        param: key.clone(),
                        message: format!("unknown parameter for tool '{}'", metadata.id),
                    });
                }
                warn!("Ignoring unknown parameter '{key}' for tool '{}'", metadata.id);
            }
        }

        let mut validated = Map::new();
        for spec in &metadata.parameters {
            let supplied = kwargs.get(spec.name).filter(|v| !v.is_null());
            let capability_ok = match (spec.requires_capability, capabilities) {
                (Some(pred), Some(caps)) => pred(caps),
                _ => true,
            };

            match supplied {
                Some(value) => {
                    if !capability_ok {
                        return Err(ForceError::UnsupportedCapability {
                            param: spec.name.to_string(),
                            model: metadata.model_config.model_name.clone(),
                        });
                    }
                    check_type(spec, value)?;
                    validated.insert(spec.name.to_string(), value.clone());
                }
                None => {
                    if spec.required {
                        return Err(ForceError::InvalidParameter {
                            param: spec.name.to_string(),
                            message: "required parameter is missing".into(),
                        });
                    }
                    if capability_ok {
                        if let Some(default) = spec.default_value() {
                            validated.insert(spec.name.to_string(), default);
                        }
                    }
                }
            }
        }
        Ok(validated)
    }
}

fn check_type(spec: &ParamSpec, value: &Value) -> ForceResult<()> {
    let ok = match spec.param_type {
        ParamType::String => value.is_string(),
        ParamType::Int => value.is_i64() || value.is_u64(),
        ParamType::Float => value.is_number(),
        ParamType::Bool => value.is_boolean(),
        ParamType::StringList => value
            .as_array()
            .map(|arr| arr.iter().all(Value::is_string))
            .unwrap_or(false),
        ParamType::Json => value.is_object() || value.is_array(),
    };
    if ok {
        Ok(())
    } else {
        Err(ForceError::InvalidParameter {
            param: spec.name.to_string(),
            message: format!("expected {:?}, got {value}", spec.param_type),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::model_capabilities;
    use crate::tools::blueprint::all_blueprints;
    use crate::tools::registry::{ToolRegistry, synthesized_id};
    use serde_json::json;
    use std::sync::Arc;

    fn grok_tool() -> Arc<ToolMetadata> {
        let registry = ToolRegistry::bootstrap(all_blueprints()).unwrap();
        let bp = all_blueprints()
            .into_iter()
            .find(|b| b.model_name == "grok-4.1")
            .unwrap();
        registry.get_tool(&synthesized_id(&bp)).unwrap()
    }

    fn required_kwargs() -> Map<String, Value> {
        let mut kwargs = Map::new();
        kwargs.insert("instructions".into(), json!("do the thing"));
        kwargs.insert("output_format".into(), json!("markdown"));
        kwargs.insert("session_id".into(), json!("s1"));
        kwargs
    }

    #[test]
    fn defaults_are_applied() {
        let tool = grok_tool();
        let caps = model_capabilities("xai", "grok-4.1").unwrap();
        let validated = ParameterValidator::new(false)
            .validate(&tool, &required_kwargs(), Some(&caps))
            .unwrap();
        assert_eq!(validated["search_mode"], "auto");
        assert_eq!(validated["temperature"], json!(0.7));
        assert_eq!(validated["context"], json!([]));
    }

    #[test]
    fn missing_required_parameter_fails() {
        let tool = grok_tool();
        let mut kwargs = required_kwargs();
        kwargs.remove("instructions");
        let err = ParameterValidator::new(false)
            .validate(&tool, &kwargs, None)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-parameter");
    }

    #[test]
    fn unknown_parameter_strict_vs_lenient() {
        let tool = grok_tool();
        let mut kwargs = required_kwargs();
        kwargs.insert("frobnicate".into(), json!(true));

        let err = ParameterValidator::new(true)
            .validate(&tool, &kwargs, None)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-parameter");

        let validated = ParameterValidator::new(false)
            .validate(&tool, &kwargs, None)
            .unwrap();
        assert!(!validated.contains_key("frobnicate"));
    }

    #[test]
    fn capability_gate_rejects_supplied_param() {
        // grok-4.1 does not support reasoning_effort.
        let tool = grok_tool();
        let caps = model_capabilities("xai", "grok-4.1").unwrap();
        let mut kwargs = required_kwargs();
        kwargs.insert("reasoning_effort".into(), json!("high"));
        let err = ParameterValidator::new(false)
            .validate(&tool, &kwargs, Some(&caps))
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported-capability");
    }

    #[test]
    fn capability_gate_allows_absent_param() {
        let tool = grok_tool();
        let caps = model_capabilities("xai", "grok-4.1").unwrap();
        let validated = ParameterValidator::new(false)
            .validate(&tool, &required_kwargs(), Some(&caps))
            .unwrap();
        assert!(!validated.contains_key("reasoning_effort"));
    }

    #[test]
    fn type_mismatch_fails() {
        let tool = grok_tool();
        let mut kwargs = required_kwargs();
        kwargs.insert("instructions".into(), json!(42));
        let err = ParameterValidator::new(false)
            .validate(&tool, &kwargs, None)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-parameter");
    }

    #[test]
    fn null_values_are_treated_as_absent() {
        let tool = grok_tool();
        let mut kwargs = required_kwargs();
        kwargs.insert("reasoning_effort".into(), Value::Null);
        let caps = model_capabilities("xai", "grok-4.1").unwrap();
        let validated = ParameterValidator::new(false)
            .validate(&tool, &kwargs, Some(&caps))
            .unwrap();
        assert!(!validated.contains_key("reasoning_effort"));
    }
}
