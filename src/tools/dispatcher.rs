use crate::adapters::{AdapterCapabilities, CallContext, ToolDeclaration, ToolDispatcher};
use crate::session::UnifiedSessionCache;
use crate::vectorstore::VectorStoreManager;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_HISTORY_RESULTS: usize = 40;
const DEFAULT_FILE_RESULTS: usize = 20;

/// Tool dispatcher handed to adapters for in-turn tool calls.
///
/// Built-in tools: "search_project_history" over the session store and, when
/// the provider has no native file search and this call produced vector
/// stores, "task_files_search" over every store the session has used.
pub struct Dispatcher {
    sessions: UnifiedSessionCache,
    vector_stores: Arc<VectorStoreManager>,
    vector_store_ids: Vec<String>,
}

impl Dispatcher {
    pub fn new(
        sessions: UnifiedSessionCache,
        vector_stores: Arc<VectorStoreManager>,
        vector_store_ids: Vec<String>,
    ) -> Self {
        Self {
            sessions,
            vector_stores,
            vector_store_ids,
        }
    }

    async fn search_history(&self, args: &Value, ctx: &CallContext) -> anyhow::Result<String> {
        let query = args["query"].as_str().unwrap_or_default();
        let max_results = args["max_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_HISTORY_RESULTS);
        let hits = self
            .sessions
            .search_history(&ctx.project, query, max_results)
            .await?;
        if hits.is_empty() {
            return Ok("No matching history found.".into());
        }
        Ok(serde_json::to_string_pretty(&hits)?)
    }

    async fn search_task_files(&self, args: &Value, ctx: &CallContext) -> anyhow::Result<String> {
        let query = args["query"].as_str().unwrap_or_default();
        let max_results = args["max_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_FILE_RESULTS);

        // Every store the session has touched, not only this call's.
        let mut store_ids = self.vector_stores.get_all_for_session(&ctx.session_id).await;
        for id in &self.vector_store_ids {
            if !store_ids.contains(id) {
                store_ids.push(id.clone());
            }
        }
        if store_ids.is_empty() {
            return Ok("No task files are attached to this session.".into());
        }
        let hits = self
            .vector_stores
            .client()
            .search(&store_ids, query, max_results)
            .await?;
        if hits.is_empty() {
            return Ok("No matching task files found.".into());
        }
        Ok(serde_json::to_string_pretty(&hits)?)
    }
}

#[async_trait]
impl ToolDispatcher for Dispatcher {
    fn get_tool_declarations(
        &self,
        capabilities: &AdapterCapabilities,
        disable_history_search: bool,
    ) -> Vec<ToolDeclaration> {
        let mut declarations = Vec::new();
        if !disable_history_search {
            declarations.push(ToolDeclaration {
                name: "search_project_history".into(),
                description: "Search past conversations for this project. Returns historical \
                              data that may be outdated; do not use it to understand current \
                              code state."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Search terms; separate multiple queries with ';'"
                        },
                        "max_results": {"type": "integer"}
                    },
                    "required": ["query"]
                }),
            });
        }
        // A provider with native file search reads the stores itself.
        if capabilities.native_vector_store_provider.is_none()
            && !self.vector_store_ids.is_empty()
        {
            declarations.push(ToolDeclaration {
                name: "task_files_search".into(),
                description: "Search the files attached to this task that did not fit inline."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "max_results": {"type": "integer"}
                    },
                    "required": ["query"]
                }),
            });
        }
        declarations
    }

    async fn execute(&self, tool_name: &str, tool_args: &str, ctx: &CallContext) -> String {
        debug!("Dispatching in-turn tool call: {tool_name}");
        let args: Value = match serde_json::from_str(tool_args) {
            Ok(v) => v,
            Err(e) => {
                warn!("Bad tool arguments for {tool_name}: {e}");
                return format!("Error: invalid tool arguments: {e}");
            }
        };
        let result = match tool_name {
            "search_project_history" => self.search_history(&args, ctx).await,
            "task_files_search" => self.search_task_files(&args, ctx).await,
            other => Err(anyhow::anyhow!("unknown tool: {other}")),
        };
        match result {
            Ok(text) => text,
            Err(e) => {
                warn!("Tool {tool_name} failed: {e}");
                format!("Error executing {tool_name}: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{HistoryItem, SessionDb};
    use crate::vectorstore::InMemoryVectorStore;

    fn fixture(ids: Vec<String>) -> (Dispatcher, UnifiedSessionCache, Arc<VectorStoreManager>) {
        let sessions = UnifiedSessionCache::new(SessionDb::open_in_memory(3600).unwrap());
        let manager = Arc::new(VectorStoreManager::new(
            Arc::new(InMemoryVectorStore::new()),
            false,
        ));
        (
            Dispatcher::new(sessions.clone(), manager.clone(), ids),
            sessions,
            manager,
        )
    }

    fn ctx() -> CallContext {
        CallContext {
            project: "proj".into(),
            tool: "chat_with_x".into(),
            session_id: "s1".into(),
            vector_store_ids: Vec::new(),
        }
    }

    fn caps() -> AdapterCapabilities {
        AdapterCapabilities::default()
    }

    #[test]
    fn history_search_always_declared_unless_disabled() {
        let (dispatcher, _, _) = fixture(Vec::new());
        let decls = dispatcher.get_tool_declarations(&caps(), false);
        assert!(decls.iter().any(|d| d.name == "search_project_history"));
        let decls = dispatcher.get_tool_declarations(&caps(), true);
        assert!(decls.is_empty());
    }

    #[test]
    fn task_files_search_requires_stores_and_no_native_search() {
        let (dispatcher, _, _) = fixture(vec!["vs_1".into()]);
        let decls = dispatcher.get_tool_declarations(&caps(), false);
        assert!(decls.iter().any(|d| d.name == "task_files_search"));

        let native = AdapterCapabilities {
            native_vector_store_provider: Some("openai".into()),
            ..Default::default()
        };
        let decls = dispatcher.get_tool_declarations(&native, false);
        assert!(!decls.iter().any(|d| d.name == "task_files_search"));
    }

    #[tokio::test]
    async fn execute_history_search() {
        let (dispatcher, sessions, _) = fixture(Vec::new());
        sessions
            .append_message(
                "proj",
                "chat_with_x",
                "s1",
                HistoryItem::chat("user", "how do jwt refresh tokens work"),
            )
            .await
            .unwrap();
        let out = dispatcher
            .execute("search_project_history", r#"{"query": "jwt"}"#, &ctx())
            .await;
        assert!(out.contains("jwt refresh"));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_textual_error() {
        let (dispatcher, _, _) = fixture(Vec::new());
        let out = dispatcher.execute("explode", "{}", &ctx()).await;
        assert!(out.starts_with("Error executing explode"));
    }

    #[tokio::test]
    async fn bad_json_becomes_textual_error() {
        let (dispatcher, _, _) = fixture(Vec::new());
        let out = dispatcher
            .execute("search_project_history", "not json", &ctx())
            .await;
        assert!(out.starts_with("Error: invalid tool arguments"));
    }

    #[tokio::test]
    async fn task_files_search_covers_all_session_stores() {
        let (dispatcher, _, manager) = fixture(Vec::new());
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("notes.txt");
        std::fs::write(&f, "the deployment uses blue-green rollout").unwrap();
        manager.create(&[f], Some("s1")).await.unwrap();

        let out = dispatcher
            .execute("task_files_search", r#"{"query": "rollout"}"#, &ctx())
            .await;
        assert!(out.contains("blue-green"));
    }
}
