use crate::adapters::base::{
    Adapter, AdapterParams, CallContext, GenerateResult, ToolDispatcher,
};
use crate::adapters::capabilities::AdapterCapabilities;
use crate::errors::{ForceError, ForceResult};
use crate::session::{ApiFormat, HistoryItem, UnifiedSessionCache};
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Deterministic adapter for end-to-end testing without network I/O.
///
/// Echoes a JSON record of everything it was handed and persists the turn
/// like a real adapter, so multi-turn and cross-tool flows can be exercised
/// offline.
pub struct MockAdapter {
    model: String,
    capabilities: AdapterCapabilities,
    sessions: UnifiedSessionCache,
}

impl MockAdapter {
    pub fn new(model: &str, sessions: UnifiedSessionCache) -> Self {
        Self {
            model: model.to_string(),
            capabilities: AdapterCapabilities {
                supports_structured_output: true,
                supports_reasoning_effort: true,
                max_context_window: Some(200_000),
                description: "Deterministic mock adapter",
                ..Default::default()
            },
            sessions,
        }
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn display_name(&self) -> &str {
        "Mock"
    }

    fn capabilities(&self) -> &AdapterCapabilities {
        &self.capabilities
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &AdapterParams,
        ctx: &CallContext,
        _dispatcher: &dyn ToolDispatcher,
        cancel: &CancellationToken,
    ) -> ForceResult<GenerateResult> {
        if cancel.is_cancelled() {
            return Err(ForceError::Cancelled);
        }

        let history = self
            .sessions
            .get_history(&ctx.project, &ctx.tool, &ctx.session_id)
            .await?;
        let content = serde_json::to_string_pretty(&json!({
            "mock": true,
            "model": self.model,
            "prompt": prompt,
            "session_id": ctx.session_id,
            "vector_store_ids": ctx.vector_store_ids,
            "kwargs": params.kwargs,
            "structured_output": params.structured_output,
            "prior_turns": history.len(),
        }))
        .unwrap_or_default();

        let mut updated = history;
        updated.push(HistoryItem::chat("user", prompt));
        updated.push(HistoryItem::chat("assistant", content.clone()));
        self.sessions
            .set_history(&ctx.project, &ctx.tool, &ctx.session_id, updated)
            .await?;
        self.sessions
            .set_api_format(&ctx.project, &ctx.tool, &ctx.session_id, ApiFormat::Chat)
            .await?;

        Ok(GenerateResult {
            content,
            ..Default::default()
        })
    }
}
