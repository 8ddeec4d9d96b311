//! Transport seam for the tool-call protocol.
//!
//! The JSON-RPC host protocol itself lives outside this crate; what the
//! gateway owns is a line-delimited JSON dispatch loop: one request object
//! per line (`{"tool": ..., "params": {...}}`), one response object per line.
//! Requests go through the safe executor, so host cancellation surfaces as an
//! empty success rather than an error.

use crate::adapters::AdapterRegistry;
use crate::cli_agents::{CliAgentService, Compactor, SessionBridge};
use crate::config::Settings;
use crate::context::StableListCache;
use crate::errors::ForceResult;
use crate::jobs::JobManager;
use crate::session::{SessionDb, UnifiedSessionCache};
use crate::tools::{SafeExecutor, ToolExecutor, ToolRegistry, all_blueprints};
use crate::vectorstore::{HttpVectorStoreClient, InMemoryVectorStore, VectorStoreClient, VectorStoreManager};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const OPENAI_VECTOR_STORE_URL: &str = "https://api.openai.com/v1";

/// Everything wired together: registry, executor, and the serve loop.
pub struct Gateway {
    executor: SafeExecutor,
    cancel_root: CancellationToken,
}

/// Build the full service graph from settings.
pub fn bootstrap(settings: Settings) -> ForceResult<Gateway> {
    let settings = Arc::new(settings);
    let db = SessionDb::open(
        &settings.db_path(),
        settings.session_ttl_seconds,
        settings.session_cleanup_probability,
    )
    .map_err(crate::errors::ForceError::Internal)?;
    let sessions = UnifiedSessionCache::new(db.clone());
    let stable_lists = StableListCache::new(db.clone());

    let adapters = Arc::new(AdapterRegistry::new(
        sessions.clone(),
        settings.providers.clone(),
        settings.adapter_mock,
    ));

    // The vector-store provider needs a key; without one (or in mock mode)
    // an in-process store keeps the rest of the pipeline working.
    let vs_client: Arc<dyn VectorStoreClient> = match (&settings.providers.openai, settings.adapter_mock)
    {
        (Some(key), false) => Arc::new(HttpVectorStoreClient::new(
            OPENAI_VECTOR_STORE_URL,
            key.clone(),
        )),
        _ => Arc::new(InMemoryVectorStore::new()),
    };
    let vector_stores = Arc::new(VectorStoreManager::new(vs_client, true));

    let registry = Arc::new(ToolRegistry::bootstrap(all_blueprints())?);
    let jobs = Arc::new(JobManager::new(db.clone()));
    let compactor = Arc::new(Compactor::new(
        Arc::clone(&adapters),
        sessions.clone(),
        db.clone(),
    ));
    let cli_service = Arc::new(CliAgentService::new(
        sessions.clone(),
        SessionBridge::new(db.clone()),
        Arc::clone(&compactor),
        settings.providers.clone(),
        settings.project_dir(),
        settings.project_name(),
    ));

    let executor = Arc::new(ToolExecutor::new(
        registry,
        adapters,
        sessions,
        stable_lists,
        vector_stores,
        jobs,
        cli_service,
        compactor,
        settings,
    ));

    Ok(Gateway {
        executor: SafeExecutor::new(executor),
        cancel_root: CancellationToken::new(),
    })
}

impl Gateway {
    pub fn executor(&self) -> &SafeExecutor {
        &self.executor
    }

    /// Handle one request line and produce one response line.
    pub async fn handle_line(&self, line: &str) -> String {
        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return json!({"ok": false, "kind": "parse-error", "error": e.to_string()})
                    .to_string();
            }
        };
        let Some(tool) = request["tool"].as_str() else {
            return json!({"ok": false, "kind": "invalid-parameter", "error": "missing 'tool'"})
                .to_string();
        };
        let params: Map<String, Value> = request["params"]
            .as_object()
            .cloned()
            .unwrap_or_default();

        match self
            .executor
            .execute(tool, params, self.cancel_root.child_token())
            .await
        {
            Ok(content) => json!({"ok": true, "content": content}).to_string(),
            Err(e) => {
                json!({"ok": false, "kind": e.kind(), "error": e.to_string()}).to_string()
            }
        }
    }

    /// Serve requests from stdin until EOF or SIGINT.
    pub async fn serve_stdio(&self) -> anyhow::Result<()> {
        info!("Gateway serving on stdio");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, cancelling in-flight calls");
                    self.cancel_root.cancel();
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let response = self.handle_line(&line).await;
                        stdout.write_all(response.as_bytes()).await?;
                        stdout.write_all(b"\n").await?;
                        stdout.flush().await?;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("stdin read error: {e}");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> Gateway {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            session_db_path: Some(dir.path().join("sessions.sqlite3")),
            project_dir: Some(dir.path().to_path_buf()),
            adapter_mock: true,
            ..Default::default()
        };
        // Keep the tempdir alive for the test process.
        std::mem::forget(dir);
        bootstrap(settings).unwrap()
    }

    #[tokio::test]
    async fn malformed_line_yields_parse_error() {
        let gw = gateway();
        let response = gw.handle_line("not json").await;
        let v: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["kind"], "parse-error");
    }

    #[tokio::test]
    async fn unknown_tool_yields_not_found() {
        let gw = gateway();
        let response = gw
            .handle_line(r#"{"tool": "chat_with_nothing", "params": {}}"#)
            .await;
        let v: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["kind"], "not-found");
    }

    #[tokio::test]
    async fn mock_chat_round_trip() {
        let gw = gateway();
        let request = json!({
            "tool": "chat_with_gpt52",
            "params": {
                "instructions": "say hi",
                "output_format": "text",
                "session_id": "stdio-test"
            }
        });
        let response = gw.handle_line(&request.to_string()).await;
        let v: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(v["ok"], true, "response: {v}");
        assert!(v["content"].as_str().unwrap().contains("\"mock\": true"));
    }

    #[tokio::test]
    async fn get_instructions_lists_tools() {
        let gw = gateway();
        let response = gw
            .handle_line(r#"{"tool": "get_instructions", "params": {}}"#)
            .await;
        let v: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(v["ok"], true);
        assert!(v["content"].as_str().unwrap().contains("work_with"));
    }
}
