use crate::errors::ForceResult;
use crate::session::db::{SessionDb, unix_now, validate_session_id};
use rusqlite::OptionalExtension;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

/// Size and mtime of a file as of its last inline send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentFileInfo {
    pub size: u64,
    pub mtime_ns: i64,
}

pub fn stat_file(path: &Path) -> Option<SentFileInfo> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime_ns = meta
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_nanos() as i64;
    Some(SentFileInfo {
        size: meta.len(),
        mtime_ns,
    })
}

/// Persistence for the per-session stable inline list and the sent-file
/// change-detection baseline.
#[derive(Clone)]
pub struct StableListCache {
    db: Arc<SessionDb>,
}

impl StableListCache {
    pub fn new(db: Arc<SessionDb>) -> Self {
        Self { db }
    }

    /// Stable inline list for a session, or `None` when absent or expired.
    /// An expired list takes its sent-file rows with it.
    pub async fn get_stable_list(&self, session_id: &str) -> ForceResult<Option<Vec<PathBuf>>> {
        validate_session_id(session_id)?;
        let sid = session_id.to_string();
        let row: Option<(String, i64)> = self
            .db
            .call(move |conn| {
                conn.query_row(
                    "SELECT inline_paths, updated_at FROM stable_inline_lists WHERE session_id = ?1",
                    [sid],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
            })
            .await?;

        let Some((raw, updated_at)) = row else {
            debug!("No stable list for session {session_id}");
            return Ok(None);
        };

        if unix_now() - updated_at >= self.db.ttl as i64 {
            info!("Expired stable list for session {session_id}");
            self.reset_session(session_id).await?;
            return Ok(None);
        }

        let paths: Vec<String> = serde_json::from_str(&raw)
            .map_err(|e| crate::errors::ForceError::Storage(format!("corrupt stable list: {e}")))?;
        Ok(Some(paths.into_iter().map(PathBuf::from).collect()))
    }

    pub async fn save_stable_list(
        &self,
        session_id: &str,
        inline_paths: &[PathBuf],
    ) -> ForceResult<()> {
        validate_session_id(session_id)?;
        let sid = session_id.to_string();
        let raw = serde_json::to_string(
            &inline_paths
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect::<Vec<_>>(),
        )
        .map_err(|e| crate::errors::ForceError::Storage(e.to_string()))?;
        let now = unix_now();
        let count = inline_paths.len();
        self.db
            .call(move |conn| {
                conn.execute(
                    "REPLACE INTO stable_inline_lists(session_id, inline_paths, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)",
                    rusqlite::params![sid, raw, now],
                )
                .map(|_| ())
            })
            .await?;
        info!("Saved stable list with {count} files for session {session_id}");
        self.db.maybe_sweep().await;
        Ok(())
    }

    pub async fn get_sent_file_info(
        &self,
        session_id: &str,
        file_path: &Path,
    ) -> ForceResult<Option<SentFileInfo>> {
        validate_session_id(session_id)?;
        let sid = session_id.to_string();
        let path = file_path.to_string_lossy().to_string();
        let row: Option<(i64, i64)> = self
            .db
            .call(move |conn| {
                conn.query_row(
                    "SELECT last_size, last_mtime FROM sent_files
                     WHERE session_id = ?1 AND file_path = ?2",
                    [sid, path],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
            })
            .await?;
        Ok(row.map(|(size, mtime_ns)| SentFileInfo {
            size: size as u64,
            mtime_ns,
        }))
    }

    pub async fn update_sent_file_info(
        &self,
        session_id: &str,
        file_path: &Path,
        info: SentFileInfo,
    ) -> ForceResult<()> {
        self.batch_update_sent_files(session_id, vec![(file_path.to_path_buf(), info)])
            .await
    }

    pub async fn batch_update_sent_files(
        &self,
        session_id: &str,
        files: Vec<(PathBuf, SentFileInfo)>,
    ) -> ForceResult<()> {
        validate_session_id(session_id)?;
        if files.is_empty() {
            return Ok(());
        }
        let sid = session_id.to_string();
        let count = files.len();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "REPLACE INTO sent_files(session_id, file_path, last_size, last_mtime)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (path, info) in &files {
                    stmt.execute(rusqlite::params![
                        sid,
                        path.to_string_lossy(),
                        info.size as i64,
                        info.mtime_ns
                    ])?;
                }
                Ok(())
            })
            .await?;
        debug!("Updated sent info for {count} file(s) in session {session_id}");
        Ok(())
    }

    /// Whether a file changed since it was last sent inline. Files never sent
    /// before, and files that can no longer be stat'd, report as changed.
    pub async fn file_changed_since_last_send(
        &self,
        session_id: &str,
        file_path: &Path,
    ) -> ForceResult<bool> {
        let Some(last) = self.get_sent_file_info(session_id, file_path).await? else {
            return Ok(true);
        };
        match stat_file(file_path) {
            Some(current) => Ok(current != last),
            None => {
                warn!("Cannot stat file {}", file_path.display());
                Ok(true)
            }
        }
    }

    /// Drop the stable list and all sent-file rows for a session.
    pub async fn reset_session(&self, session_id: &str) -> ForceResult<()> {
        validate_session_id(session_id)?;
        let sid = session_id.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM stable_inline_lists WHERE session_id = ?1",
                    [&sid],
                )?;
                conn.execute("DELETE FROM sent_files WHERE session_id = ?1", [&sid])?;
                Ok(())
            })
            .await?;
        info!("Reset stable list state for session {session_id}");
        Ok(())
    }
}
