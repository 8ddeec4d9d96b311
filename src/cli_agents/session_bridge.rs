use crate::errors::ForceResult;
use crate::session::db::{SessionDb, unix_now, validate_session_id};
use rusqlite::OptionalExtension;
use std::sync::Arc;
use tracing::debug;

/// Maps `(project, session_id, cli_name)` to the upstream CLI's own session
/// id so a later turn can resume the right conversation.
#[derive(Clone)]
pub struct SessionBridge {
    db: Arc<SessionDb>,
}

impl SessionBridge {
    pub fn new(db: Arc<SessionDb>) -> Self {
        Self { db }
    }

    pub async fn get_cli_session_id(
        &self,
        project: &str,
        session_id: &str,
        cli_name: &str,
    ) -> ForceResult<Option<String>> {
        validate_session_id(session_id)?;
        let (p, s, c) = (
            project.to_string(),
            session_id.to_string(),
            cli_name.to_string(),
        );
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT cli_session_id FROM cli_sessions
                     WHERE project = ?1 AND session_id = ?2 AND cli_name = ?3",
                    [p, s, c],
                    |r| r.get(0),
                )
                .optional()
            })
            .await
    }

    pub async fn store_cli_session_id(
        &self,
        project: &str,
        session_id: &str,
        cli_name: &str,
        cli_session_id: &str,
    ) -> ForceResult<()> {
        validate_session_id(session_id)?;
        let (p, s, c, id) = (
            project.to_string(),
            session_id.to_string(),
            cli_name.to_string(),
            cli_session_id.to_string(),
        );
        let now = unix_now();
        self.db
            .call(move |conn| {
                conn.execute(
                    "REPLACE INTO cli_sessions
                     (project, session_id, cli_name, cli_session_id, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![p, s, c, id, now],
                )
                .map(|_| ())
            })
            .await?;
        debug!("Stored CLI session binding for {project}/{session_id}/{cli_name}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binding_round_trip() {
        let bridge = SessionBridge::new(SessionDb::open_in_memory(3600).unwrap());
        assert!(
            bridge
                .get_cli_session_id("proj", "s1", "claude")
                .await
                .unwrap()
                .is_none()
        );
        bridge
            .store_cli_session_id("proj", "s1", "claude", "cs_42")
            .await
            .unwrap();
        assert_eq!(
            bridge
                .get_cli_session_id("proj", "s1", "claude")
                .await
                .unwrap()
                .as_deref(),
            Some("cs_42")
        );
        // Distinct CLI names are separate bindings.
        assert!(
            bridge
                .get_cli_session_id("proj", "s1", "codex")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn binding_is_replaced_on_update() {
        let bridge = SessionBridge::new(SessionDb::open_in_memory(3600).unwrap());
        bridge
            .store_cli_session_id("proj", "s1", "claude", "cs_1")
            .await
            .unwrap();
        bridge
            .store_cli_session_id("proj", "s1", "claude", "cs_2")
            .await
            .unwrap();
        assert_eq!(
            bridge
                .get_cli_session_id("proj", "s1", "claude")
                .await
                .unwrap()
                .as_deref(),
            Some("cs_2")
        );
    }
}
