use crate::errors::{ForceError, ForceResult};
use crate::session::db::{SessionDb, unix_now, validate_session_id};
use crate::session::history::{ApiFormat, HistoryItem, ResponsesItem};
use crate::session::sanitize::sanitize_history;
use rusqlite::OptionalExtension;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Virtual tool key under which the cross-tool conversation record lives.
/// `work_with` and `consult_with` share it so either side of a handoff can
/// see the other's turns; provider-format histories stay under their own
/// `chat_with_*` / `research_with_*` tool keys.
pub const CROSS_TOOL: &str = "session";

/// A cached session: provider-format history plus small provider metadata.
#[derive(Debug, Clone)]
pub struct UnifiedSession {
    pub project: String,
    pub tool: String,
    pub session_id: String,
    pub updated_at: i64,
    pub history: Vec<HistoryItem>,
    pub provider_metadata: Map<String, Value>,
}

impl UnifiedSession {
    pub fn new(project: &str, tool: &str, session_id: &str) -> Self {
        Self {
            project: project.into(),
            tool: tool.into(),
            session_id: session_id.into(),
            updated_at: unix_now(),
            history: Vec::new(),
            provider_metadata: Map::new(),
        }
    }
}

/// One match from a history search.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HistorySearchHit {
    pub tool: String,
    pub session_id: String,
    pub role: String,
    pub snippet: String,
}

/// Row summary returned by `list_sessions`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub tool: String,
    pub session_id: String,
    pub updated_at: i64,
    pub turns: usize,
}

/// Durable store of conversation history, continuation tokens, and metadata
/// for every provider, keyed by `(project, tool, session_id)`.
#[derive(Clone)]
pub struct UnifiedSessionCache {
    db: Arc<SessionDb>,
}

impl UnifiedSessionCache {
    pub fn new(db: Arc<SessionDb>) -> Self {
        Self { db }
    }

    pub async fn get_session(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
    ) -> ForceResult<Option<UnifiedSession>> {
        validate_session_id(session_id)?;
        let (p, t, s) = (project.to_string(), tool.to_string(), session_id.to_string());
        let row: Option<(Option<String>, Option<String>, i64)> = self
            .db
            .call(move |conn| {
                conn.query_row(
                    "SELECT history, provider_metadata, updated_at FROM unified_sessions
                     WHERE project = ?1 AND tool = ?2 AND session_id = ?3",
                    rusqlite::params![p, t, s],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()
            })
            .await?;

        let Some((history_json, metadata_json, updated_at)) = row else {
            debug!("No session found for {project}/{tool}/{session_id}");
            return Ok(None);
        };

        // TTL check: reads past expiry delete the row.
        if unix_now() - updated_at >= self.db.ttl as i64 {
            debug!("Session {project}/{tool}/{session_id} expired");
            self.delete_session(project, tool, session_id).await?;
            return Ok(None);
        }

        let history: Vec<HistoryItem> = match history_json {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| ForceError::Storage(format!("corrupt history JSON: {e}")))?,
            None => Vec::new(),
        };
        let provider_metadata: Map<String, Value> = match metadata_json {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| ForceError::Storage(format!("corrupt metadata JSON: {e}")))?,
            None => Map::new(),
        };

        Ok(Some(UnifiedSession {
            project: project.into(),
            tool: tool.into(),
            session_id: session_id.into(),
            updated_at,
            history,
            provider_metadata,
        }))
    }

    /// Save a session, overwriting any existing row. History is sanitized
    /// (image payloads replaced) before it touches the database.
    pub async fn set_session(&self, session: &UnifiedSession) -> ForceResult<()> {
        validate_session_id(&session.session_id)?;
        let sanitized = sanitize_history(&session.history);
        let history_json = if sanitized.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&sanitized).map_err(|e| ForceError::Storage(e.to_string()))?)
        };
        let metadata_json = if session.provider_metadata.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&session.provider_metadata)
                    .map_err(|e| ForceError::Storage(e.to_string()))?,
            )
        };

        let (p, t, s) = (
            session.project.clone(),
            session.tool.clone(),
            session.session_id.clone(),
        );
        let now = unix_now();
        self.db
            .call(move |conn| {
                conn.execute(
                    "REPLACE INTO unified_sessions
                     (project, tool, session_id, history, provider_metadata, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![p, t, s, history_json, metadata_json, now],
                )
                .map(|_| ())
            })
            .await?;
        self.db.maybe_sweep().await;
        Ok(())
    }

    pub async fn delete_session(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
    ) -> ForceResult<()> {
        let (p, t, s) = (project.to_string(), tool.to_string(), session_id.to_string());
        self.db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM unified_sessions
                     WHERE project = ?1 AND tool = ?2 AND session_id = ?3",
                    rusqlite::params![p, t, s],
                )
                .map(|_| ())
            })
            .await?;
        Ok(())
    }

    pub async fn get_history(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
    ) -> ForceResult<Vec<HistoryItem>> {
        Ok(self
            .get_session(project, tool, session_id)
            .await?
            .map(|s| s.history)
            .unwrap_or_default())
    }

    /// Replace the history, preserving provider metadata.
    pub async fn set_history(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
        history: Vec<HistoryItem>,
    ) -> ForceResult<()> {
        let mut session = self
            .get_session(project, tool, session_id)
            .await?
            .unwrap_or_else(|| UnifiedSession::new(project, tool, session_id));
        session.history = history;
        self.set_session(&session).await
    }

    pub async fn append_message(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
        message: HistoryItem,
    ) -> ForceResult<()> {
        let mut session = self
            .get_session(project, tool, session_id)
            .await?
            .unwrap_or_else(|| UnifiedSession::new(project, tool, session_id));
        session.history.push(message);
        self.set_session(&session).await
    }

    pub async fn append_function_call(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
        name: &str,
        arguments: &str,
        call_id: &str,
    ) -> ForceResult<()> {
        self.append_message(
            project,
            tool,
            session_id,
            HistoryItem::Responses(ResponsesItem::FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
                call_id: call_id.into(),
            }),
        )
        .await
    }

    pub async fn append_function_output(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
        call_id: &str,
        output: &str,
    ) -> ForceResult<()> {
        self.append_message(
            project,
            tool,
            session_id,
            HistoryItem::Responses(ResponsesItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            }),
        )
        .await
    }

    pub async fn get_metadata(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
        key: &str,
    ) -> ForceResult<Option<Value>> {
        Ok(self
            .get_session(project, tool, session_id)
            .await?
            .and_then(|s| s.provider_metadata.get(key).cloned()))
    }

    pub async fn set_metadata(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
        key: &str,
        value: Value,
    ) -> ForceResult<()> {
        let mut session = self
            .get_session(project, tool, session_id)
            .await?
            .unwrap_or_else(|| UnifiedSession::new(project, tool, session_id));
        session.provider_metadata.insert(key.into(), value);
        self.set_session(&session).await
    }

    pub async fn get_response_id(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
    ) -> ForceResult<Option<String>> {
        Ok(self
            .get_metadata(project, tool, session_id, "response_id")
            .await?
            .and_then(|v| v.as_str().map(String::from)))
    }

    pub async fn set_response_id(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
        response_id: &str,
    ) -> ForceResult<()> {
        self.set_metadata(
            project,
            tool,
            session_id,
            "response_id",
            Value::String(response_id.into()),
        )
        .await
    }

    pub async fn get_api_format(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
    ) -> ForceResult<Option<ApiFormat>> {
        let raw = self
            .get_metadata(project, tool, session_id, "api_format")
            .await?;
        match raw.and_then(|v| v.as_str().map(String::from)) {
            Some(s) => ApiFormat::from_str(&s)
                .map(Some)
                .map_err(ForceError::Storage),
            None => Ok(None),
        }
    }

    pub async fn set_api_format(
        &self,
        project: &str,
        tool: &str,
        session_id: &str,
        format: ApiFormat,
    ) -> ForceResult<()> {
        self.set_metadata(
            project,
            tool,
            session_id,
            "api_format",
            Value::String(format.as_str().into()),
        )
        .await
    }

    /// Keyword search over stored histories for a project. Multiple queries
    /// are separated by semicolons; a message matches when it contains any
    /// term of any query.
    pub async fn search_history(
        &self,
        project: &str,
        query: &str,
        max_results: usize,
    ) -> ForceResult<Vec<HistorySearchHit>> {
        let terms: Vec<String> = query
            .split(';')
            .flat_map(|q| q.split_whitespace())
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let p = project.to_string();
        let rows: Vec<(String, String, Option<String>)> = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT tool, session_id, history FROM unified_sessions
                     WHERE project = ?1 ORDER BY updated_at DESC",
                )?;
                let rows = stmt.query_map([p], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
                rows.collect()
            })
            .await?;

        let mut hits = Vec::new();
        'rows: for (tool, session_id, history_json) in rows {
            let Some(raw) = history_json else { continue };
            let Ok(items) = serde_json::from_str::<Vec<Value>>(&raw) else {
                continue;
            };
            for item in items {
                let role = item
                    .get("role")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let text = match item.get("content") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => continue,
                };
                let lowered = text.to_lowercase();
                if terms.iter().any(|t| lowered.contains(t)) {
                    let snippet: String = text.chars().take(240).collect();
                    hits.push(HistorySearchHit {
                        tool: tool.clone(),
                        session_id: session_id.clone(),
                        role,
                        snippet,
                    });
                    if hits.len() >= max_results {
                        break 'rows;
                    }
                }
            }
        }
        Ok(hits)
    }

    /// Recent sessions for a project, newest first.
    pub async fn list_sessions(
        &self,
        project: &str,
        limit: usize,
    ) -> ForceResult<Vec<SessionSummary>> {
        let p = project.to_string();
        let rows: Vec<(String, String, i64, Option<String>)> = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT tool, session_id, updated_at, history FROM unified_sessions
                     WHERE project = ?1 ORDER BY updated_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(rusqlite::params![p, limit as i64], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
                })?;
                rows.collect()
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|(tool, session_id, updated_at, history)| {
                let turns = history
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<Vec<Value>>(raw).ok())
                    .map(|v| v.len())
                    .unwrap_or(0);
                SessionSummary {
                    tool,
                    session_id,
                    updated_at,
                    turns,
                }
            })
            .collect())
    }
}
