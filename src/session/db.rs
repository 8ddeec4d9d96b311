use crate::errors::{ForceError, ForceResult};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Shared handle to the embedded database file.
///
/// One connection behind a mutex, WAL mode, accessed exclusively through
/// [`SessionDb::call`] so blocking queries stay off the async loop. The
/// global mutex serializes writes, which satisfies the per-key ordering the
/// session store requires.
pub struct SessionDb {
    conn: Mutex<Connection>,
    /// Entry TTL in seconds, checked on read and during sweeps.
    pub ttl: u64,
    /// Probability that a write triggers a sweep of expired rows.
    pub purge_probability: f64,
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl SessionDb {
    pub fn open(path: &Path, ttl: u64, purge_probability: f64) -> Result<Arc<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at: {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=3000;",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
            ttl,
            purge_probability,
        };
        db.ensure_schema()
            .with_context(|| format!("Failed to initialize schema at: {}", path.display()))?;
        Ok(Arc::new(db))
    }

    /// In-memory database for tests.
    pub fn open_in_memory(ttl: u64) -> Result<Arc<Self>> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
            ttl,
            purge_probability: 0.0,
        };
        db.ensure_schema()?;
        Ok(Arc::new(db))
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {e}"))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS unified_sessions (
                project            TEXT NOT NULL,
                tool               TEXT NOT NULL,
                session_id         TEXT NOT NULL,
                history            TEXT,
                provider_metadata  TEXT,
                updated_at         INTEGER NOT NULL,
                PRIMARY KEY (project, tool, session_id)
            );

            CREATE TABLE IF NOT EXISTS stable_inline_lists (
                session_id   TEXT PRIMARY KEY,
                inline_paths TEXT NOT NULL,
                created_at   INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sent_files (
                session_id TEXT NOT NULL,
                file_path  TEXT NOT NULL,
                last_size  INTEGER NOT NULL,
                last_mtime INTEGER NOT NULL,
                PRIMARY KEY (session_id, file_path)
            );
            CREATE INDEX IF NOT EXISTS idx_sent_files_session
                ON sent_files(session_id);

            CREATE TABLE IF NOT EXISTS summaries (
                project      TEXT NOT NULL,
                tool         TEXT NOT NULL,
                session_id   TEXT NOT NULL,
                summary_text TEXT NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (project, tool, session_id)
            );

            CREATE TABLE IF NOT EXISTS cli_sessions (
                project        TEXT NOT NULL,
                session_id     TEXT NOT NULL,
                cli_name       TEXT NOT NULL,
                cli_session_id TEXT NOT NULL,
                updated_at     INTEGER NOT NULL,
                PRIMARY KEY (project, session_id, cli_name)
            );

            CREATE TABLE IF NOT EXISTS jobs (
                job_id      TEXT PRIMARY KEY,
                target_tool TEXT NOT NULL,
                args        TEXT NOT NULL,
                status      TEXT NOT NULL,
                result      TEXT,
                error       TEXT,
                started_at  INTEGER NOT NULL,
                finished_at INTEGER,
                max_runtime INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Run a blocking query off the async loop.
    pub async fn call<T, F>(self: &Arc<Self>, f: F) -> ForceResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let conn = db
                .conn
                .lock()
                .map_err(|e| ForceError::Storage(format!("DB lock poisoned: {e}")))?;
            f(&conn).map_err(ForceError::from)
        })
        .await
        .map_err(|e| ForceError::Storage(format!("DB task failed: {e}")))?
    }

    /// With probability `purge_probability`, delete rows whose `updated_at`
    /// fell past the TTL. Called after writes; failures only warn.
    pub async fn maybe_sweep(self: &Arc<Self>) {
        if fastrand::f64() >= self.purge_probability {
            return;
        }
        let cutoff = unix_now() - self.ttl as i64;
        let result = self
            .call(move |conn| {
                let mut removed = 0usize;
                removed += conn.execute(
                    "DELETE FROM unified_sessions WHERE updated_at < ?1",
                    [cutoff],
                )?;
                removed += conn.execute(
                    "DELETE FROM sent_files WHERE session_id IN
                     (SELECT session_id FROM stable_inline_lists WHERE updated_at < ?1)",
                    [cutoff],
                )?;
                removed += conn.execute(
                    "DELETE FROM stable_inline_lists WHERE updated_at < ?1",
                    [cutoff],
                )?;
                removed += conn.execute("DELETE FROM summaries WHERE updated_at < ?1", [cutoff])?;
                removed +=
                    conn.execute("DELETE FROM cli_sessions WHERE updated_at < ?1", [cutoff])?;
                removed += conn.execute(
                    "DELETE FROM jobs WHERE finished_at IS NOT NULL AND finished_at < ?1",
                    [cutoff],
                )?;
                Ok(removed)
            })
            .await;
        match result {
            Ok(removed) if removed > 0 => debug!("Sweep removed {removed} expired row(s)"),
            Ok(_) => {}
            Err(e) => warn!("Expiry sweep failed: {e}"),
        }
    }
}

/// Reject empty or oversized session ids before they reach SQL.
pub fn validate_session_id(session_id: &str) -> ForceResult<()> {
    if session_id.is_empty() || session_id.len() > 256 {
        return Err(ForceError::InvalidParameter {
            param: "session_id".into(),
            message: format!("invalid session_id: {session_id:?}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_creates_all_tables() {
        let db = SessionDb::open_in_memory(3600).unwrap();
        let tables: Vec<String> = db
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT name FROM sqlite_master WHERE type='table'")?;
                let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
                rows.collect()
            })
            .await
            .unwrap();
        for expected in [
            "unified_sessions",
            "stable_inline_lists",
            "sent_files",
            "summaries",
            "cli_sessions",
            "jobs",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/sessions.sqlite3");
        let db = SessionDb::open(&path, 60, 0.0).unwrap();
        assert!(path.exists());
        drop(db);
    }

    #[test]
    fn session_id_validation() {
        assert!(validate_session_id("abc").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id(&"x".repeat(300)).is_err());
    }
}
