pub mod anthropic;
pub mod base;
pub mod capabilities;
pub mod gemini;
pub mod mock;
pub mod openai;
pub mod xai;

pub use base::{
    Adapter, AdapterParams, CallContext, GenerateResult, ToolDeclaration, ToolDispatcher,
};
pub use capabilities::{AdapterCapabilities, model_capabilities};

use crate::config::ProviderKeys;
use crate::errors::{ForceError, ForceResult};
use crate::session::UnifiedSessionCache;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Adapter factory memoized by `(adapter_key, model)`. Instances are shared
/// across callers; adapters hold no per-call mutable state.
pub struct AdapterRegistry {
    sessions: UnifiedSessionCache,
    keys: ProviderKeys,
    /// Route every call to the mock adapter (configuration-driven).
    mock: bool,
    cache: RwLock<HashMap<(String, String), Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    pub fn new(sessions: UnifiedSessionCache, keys: ProviderKeys, mock: bool) -> Self {
        Self {
            sessions,
            keys,
            mock,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_adapter(&self, adapter_key: &str, model: &str) -> ForceResult<Arc<dyn Adapter>> {
        let cache_key = (adapter_key.to_string(), model.to_string());
        if let Some(adapter) = self
            .cache
            .read()
            .ok()
            .and_then(|c| c.get(&cache_key).cloned())
        {
            return Ok(adapter);
        }

        let adapter = self.build(adapter_key, model)?;
        if let Ok(mut cache) = self.cache.write() {
            cache.entry(cache_key).or_insert_with(|| adapter.clone());
        }
        Ok(adapter)
    }

    fn build(&self, adapter_key: &str, model: &str) -> ForceResult<Arc<dyn Adapter>> {
        if self.mock {
            debug!("Mock adapter selected for {adapter_key}/{model}");
            return Ok(Arc::new(mock::MockAdapter::new(
                model,
                self.sessions.clone(),
            )));
        }

        let require = |key: &Option<String>, name: &str| -> ForceResult<String> {
            key.clone()
                .ok_or_else(|| ForceError::BackendUnavailable(format!("{name} is not configured")))
        };

        let adapter: Arc<dyn Adapter> = match adapter_key {
            "openai" => Arc::new(openai::OpenAIAdapter::new(
                model,
                require(&self.keys.openai, "OPENAI_API_KEY")?,
                self.sessions.clone(),
            )?),
            "anthropic" => Arc::new(anthropic::AnthropicAdapter::new(
                model,
                require(&self.keys.anthropic, "ANTHROPIC_API_KEY")?,
                self.sessions.clone(),
            )?),
            "google" => Arc::new(gemini::GeminiAdapter::new(
                model,
                require(&self.keys.gemini, "GEMINI_API_KEY")?,
                self.sessions.clone(),
            )?),
            "xai" => Arc::new(xai::GrokAdapter::new(
                model,
                require(&self.keys.xai, "XAI_API_KEY")?,
                self.sessions.clone(),
            )?),
            other => {
                return Err(ForceError::NotFound(format!("unknown adapter: {other}")));
            }
        };
        Ok(adapter)
    }

    /// Drop all memoized instances (clean teardown).
    pub fn close(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionDb;

    fn sessions() -> UnifiedSessionCache {
        UnifiedSessionCache::new(SessionDb::open_in_memory(3600).unwrap())
    }

    fn keys() -> ProviderKeys {
        ProviderKeys {
            openai: Some("sk-test".into()),
            anthropic: Some("sk-ant".into()),
            gemini: Some("g-key".into()),
            xai: Some("x-key".into()),
        }
    }

    #[test]
    fn adapters_are_memoized_per_key_model() {
        let registry = AdapterRegistry::new(sessions(), keys(), false);
        let a = registry.get_adapter("openai", "gpt-5.2").unwrap();
        let b = registry.get_adapter("openai", "gpt-5.2").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = registry.get_adapter("openai", "o4-mini").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn missing_key_is_backend_unavailable() {
        let registry = AdapterRegistry::new(sessions(), ProviderKeys::default(), false);
        let err = registry.get_adapter("openai", "gpt-5.2").unwrap_err();
        assert_eq!(err.kind(), "backend-unavailable");
    }

    #[test]
    fn unknown_adapter_key_is_not_found() {
        let registry = AdapterRegistry::new(sessions(), keys(), false);
        let err = registry.get_adapter("acme", "model-1").unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }

    #[test]
    fn unknown_model_is_not_found() {
        let registry = AdapterRegistry::new(sessions(), keys(), false);
        let err = registry.get_adapter("openai", "gpt-1").unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }

    #[test]
    fn mock_mode_ignores_missing_keys() {
        let registry = AdapterRegistry::new(sessions(), ProviderKeys::default(), true);
        let adapter = registry.get_adapter("openai", "gpt-5.2").unwrap();
        assert_eq!(adapter.display_name(), "Mock");
    }
}
