use crate::adapters::base::{AdapterParams, CallContext, ToolDeclaration, ToolDispatcher};
use crate::adapters::{AdapterCapabilities, AdapterRegistry};
use crate::errors::ForceResult;
use crate::session::db::{SessionDb, unix_now};
use crate::session::{HistoryItem, ResponsesItem, UnifiedSessionCache};
use async_trait::async_trait;
use rusqlite::OptionalExtension;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fixed compaction target. Callers cannot raise it; larger budgets are
/// deliberately ignored so cross-tool handoffs stay bounded.
pub const TARGET_TOKENS: usize = 30_000;

/// Internal model used for summarization calls.
const SUMMARIZER: (&str, &str) = ("google", "gemini-3-flash");

const SUMMARY_PROMPT: &str = "Summarize this conversation history concisely while preserving:\n\
1. Key decisions made and their reasoning\n\
2. Important facts, names, dates, and numbers mentioned\n\
3. User preferences and requests\n\
4. Pending tasks or commitments\n\
5. Technical context that may be needed later\n\
\n\
Messages to summarize:\n{messages}\n\
\n\
Write a concise summary that captures the essential context. Do not include \
preamble - just the summary.";

struct NoTools;

#[async_trait]
impl ToolDispatcher for NoTools {
    fn get_tool_declarations(
        &self,
        _capabilities: &AdapterCapabilities,
        _disable_history_search: bool,
    ) -> Vec<ToolDeclaration> {
        Vec::new()
    }

    async fn execute(&self, tool_name: &str, _args: &str, _ctx: &CallContext) -> String {
        format!("Error: tool {tool_name} is not available here")
    }
}

/// Shortens cross-tool history to the fixed token target, via an internal
/// model call when the rendered history is too large. Also maintains the
/// per-session summary cache.
pub struct Compactor {
    adapters: Arc<AdapterRegistry>,
    sessions: UnifiedSessionCache,
    db: Arc<SessionDb>,
}

impl Compactor {
    pub fn new(
        adapters: Arc<AdapterRegistry>,
        sessions: UnifiedSessionCache,
        db: Arc<SessionDb>,
    ) -> Self {
        Self {
            adapters,
            sessions,
            db,
        }
    }

    /// Render history as plain "role: content" lines.
    pub fn render_history(history: &[HistoryItem]) -> String {
        let mut lines = Vec::new();
        for item in history {
            match item {
                HistoryItem::Chat(msg) => {
                    let text = msg
                        .content_text()
                        .map(String::from)
                        .unwrap_or_else(|| msg.content.to_string());
                    if !text.is_empty() {
                        let tag = msg.tool.as_deref().unwrap_or("");
                        if tag.is_empty() {
                            lines.push(format!("{}: {}", msg.role, text));
                        } else {
                            lines.push(format!("{} ({}): {}", msg.role, tag, text));
                        }
                    }
                }
                HistoryItem::Responses(ResponsesItem::Message { role, content }) => {
                    let text: String = content
                        .iter()
                        .filter_map(|p| p["text"].as_str())
                        .collect::<Vec<_>>()
                        .join("");
                    if !text.is_empty() {
                        lines.push(format!("{role}: {text}"));
                    }
                }
                HistoryItem::Responses(_) => {}
            }
        }
        lines.join("\n")
    }

    fn wrap(text: &str) -> String {
        format!(
            "=== Previous conversation context ===\n{text}\n=== End of previous context ==="
        )
    }

    /// Produce a compacted context block for cross-tool injection, or `None`
    /// when there is nothing to carry over.
    pub async fn compact_history(
        &self,
        history: &[HistoryItem],
        cancel: &CancellationToken,
    ) -> ForceResult<Option<String>> {
        if history.is_empty() {
            return Ok(None);
        }
        let rendered = Self::render_history(history);
        if rendered.is_empty() {
            return Ok(None);
        }
        let tokens = crate::utils::tokens::count_tokens_off_thread(vec![rendered.clone()]).await;
        if tokens <= TARGET_TOKENS {
            debug!("History fits the compaction target ({tokens} tokens), passing through");
            return Ok(Some(Self::wrap(&rendered)));
        }
        let summary = self.summarize(&rendered, cancel).await;
        Ok(Some(Self::wrap(&summary)))
    }

    /// Summarize a large CLI output down to something a caller can read.
    pub async fn summarize_output(
        &self,
        output: &str,
        cancel: &CancellationToken,
    ) -> ForceResult<String> {
        Ok(self.summarize(output, cancel).await)
    }

    /// Internal model call, with a truncation fallback when the summarizer
    /// itself is unavailable.
    async fn summarize(&self, text: &str, cancel: &CancellationToken) -> String {
        let prompt = SUMMARY_PROMPT.replace("{messages}", text);
        let throwaway = format!("compactor-{}", uuid::Uuid::new_v4().simple());
        let ctx = CallContext {
            project: "internal".into(),
            tool: "compactor".into(),
            session_id: throwaway.clone(),
            vector_store_ids: Vec::new(),
        };

        let result = match self.adapters.get_adapter(SUMMARIZER.0, SUMMARIZER.1) {
            Ok(adapter) => {
                adapter
                    .generate(&prompt, &AdapterParams::default(), &ctx, &NoTools, cancel)
                    .await
            }
            Err(e) => Err(e),
        };
        // The summarizer's own conversation state is noise; drop it.
        let _ = self
            .sessions
            .delete_session("internal", "compactor", &throwaway)
            .await;

        match result {
            Ok(r) if !r.content.is_empty() => r.content,
            Ok(_) | Err(_) => {
                if let Err(e) = &result {
                    warn!("Summarizer unavailable, truncating instead: {e}");
                }
                truncate_to_target(text)
            }
        }
    }

    pub async fn get_cached_summary(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
    ) -> ForceResult<Option<String>> {
        let (p, t, s) = (project.to_string(), tool.to_string(), session_id.to_string());
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT summary_text FROM summaries
                     WHERE project = ?1 AND tool = ?2 AND session_id = ?3",
                    [p, t, s],
                    |r| r.get(0),
                )
                .optional()
            })
            .await
    }

    pub async fn set_cached_summary(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
        summary: &str,
    ) -> ForceResult<()> {
        let (p, t, s, text) = (
            project.to_string(),
            tool.to_string(),
            session_id.to_string(),
            summary.to_string(),
        );
        let now = unix_now();
        self.db
            .call(move |conn| {
                conn.execute(
                    "REPLACE INTO summaries (project, tool, session_id, summary_text, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![p, t, s, text, now],
                )
                .map(|_| ())
            })
            .await
    }

    /// Any new turn invalidates the cached summary.
    pub async fn clear_cached_summary(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
    ) -> ForceResult<()> {
        let (p, t, s) = (project.to_string(), tool.to_string(), session_id.to_string());
        self.db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM summaries
                     WHERE project = ?1 AND tool = ?2 AND session_id = ?3",
                    rusqlite::params![p, t, s],
                )
                .map(|_| ())
            })
            .await?;
        Ok(())
    }
}

/// Rough character-level truncation to the token target.
fn truncate_to_target(text: &str) -> String {
    let max_chars = TARGET_TOKENS * 4;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}\n\n[... earlier context truncated ...]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKeys;
    use crate::session::SessionDb;
    use serde_json::json;

    fn fixture() -> Compactor {
        let db = SessionDb::open_in_memory(3600).unwrap();
        let sessions = UnifiedSessionCache::new(db.clone());
        let adapters = Arc::new(AdapterRegistry::new(
            sessions.clone(),
            ProviderKeys::default(),
            true, // mock adapters; no network
        ));
        Compactor::new(adapters, sessions, db)
    }

    fn turn(role: &str, content: &str, tool: &str) -> HistoryItem {
        HistoryItem::Chat(
            crate::session::ChatMessage::new(role, content).with_tool(tool),
        )
    }

    #[tokio::test]
    async fn empty_history_compacts_to_none() {
        let compactor = fixture();
        let out = compactor
            .compact_history(&[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn small_history_passes_through_verbatim() {
        let compactor = fixture();
        let history = vec![
            turn("user", "pick a database", "consult_with"),
            turn("assistant", "sqlite fits this workload", "consult_with"),
        ];
        let out = compactor
            .compact_history(&history, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(out.starts_with("=== Previous conversation context ==="));
        assert!(out.contains("sqlite fits this workload"));
        assert!(out.contains("(consult_with)"));
    }

    #[tokio::test]
    async fn oversized_history_is_summarized() {
        let compactor = fixture();
        // Past the 30k-token target even with the 4-chars-per-token estimate.
        let big = "carefully varied words here ".repeat(30_000);
        let history = vec![turn("user", &big, "consult_with")];
        let out = compactor
            .compact_history(&history, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        // Mock adapter echoes a JSON record; the point is the verbatim text
        // was replaced by a model call result.
        assert!(out.contains("\"mock\": true") || out.contains("truncated"));
    }

    #[tokio::test]
    async fn summary_cache_round_trip() {
        let compactor = fixture();
        assert!(
            compactor
                .get_cached_summary("proj", "session", "s1")
                .await
                .unwrap()
                .is_none()
        );
        compactor
            .set_cached_summary("proj", "session", "s1", "the gist")
            .await
            .unwrap();
        assert_eq!(
            compactor
                .get_cached_summary("proj", "session", "s1")
                .await
                .unwrap()
                .as_deref(),
            Some("the gist")
        );
        compactor
            .clear_cached_summary("proj", "session", "s1")
            .await
            .unwrap();
        assert!(
            compactor
                .get_cached_summary("proj", "session", "s1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn render_skips_tool_plumbing_items() {
        let history = vec![
            HistoryItem::Responses(ResponsesItem::Message {
                role: "user".into(),
                content: vec![json!({"type": "input_text", "text": "hello"})],
            }),
            HistoryItem::Responses(ResponsesItem::FunctionCall {
                name: "search".into(),
                arguments: "{}".into(),
                call_id: "c1".into(),
            }),
        ];
        let rendered = Compactor::render_history(&history);
        assert_eq!(rendered, "user: hello");
    }
}
