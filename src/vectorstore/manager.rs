use crate::errors::ForceResult;
use crate::vectorstore::VectorStoreClient;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Identity of an uploaded file: path plus a content hash, so re-uploading
/// unchanged files into a session-scoped store is a no-op.
fn file_key(path: &Path, content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{}#{:016x}", path.display(), hasher.finish())
}

#[derive(Default)]
struct SessionStoreState {
    store_id: String,
    uploaded: HashSet<String>,
}

/// Manages vector store lifecycle: ephemeral stores per call, or
/// session-scoped stores reused across turns when reuse is enabled. All
/// stores touched in a session are tracked so `task_files_search` can query
/// every one of them, not only the most recent.
pub struct VectorStoreManager {
    client: Arc<dyn VectorStoreClient>,
    /// Session-scoped reuse state; `None` disables reuse and every store is
    /// ephemeral.
    reuse: Option<Mutex<HashMap<String, SessionStoreState>>>,
    /// session_id -> every store id used in that session.
    session_stores: Mutex<HashMap<String, Vec<String>>>,
    /// Stores owned by the reuse service; `delete` skips these.
    managed: Mutex<HashSet<String>>,
}

impl VectorStoreManager {
    pub fn new(client: Arc<dyn VectorStoreClient>, session_reuse: bool) -> Self {
        Self {
            client,
            reuse: session_reuse.then(|| Mutex::new(HashMap::new())),
            session_stores: Mutex::new(HashMap::new()),
            managed: Mutex::new(HashSet::new()),
        }
    }

    /// Create or reuse a vector store populated with `files`. Returns `None`
    /// when there is nothing to upload.
    pub async fn create(
        &self,
        files: &[PathBuf],
        session_id: Option<&str>,
    ) -> ForceResult<Option<String>> {
        if files.is_empty() {
            return Ok(None);
        }

        if let (Some(reuse), Some(session_id)) = (&self.reuse, session_id) {
            // Hold the session lock across the upload so concurrent creation
            // for the same session cannot race on file identity.
            let mut sessions = reuse.lock().await;
            if !sessions.contains_key(session_id) {
                let store_id = self
                    .client
                    .create_store(&format!("session-{session_id}"))
                    .await?;
                self.managed.lock().await.insert(store_id.clone());
                sessions.insert(
                    session_id.to_string(),
                    SessionStoreState {
                        store_id,
                        uploaded: HashSet::new(),
                    },
                );
            }
            let state = sessions.get_mut(session_id).expect("present");

            let store_id = state.store_id.clone();
            let mut new_files = 0usize;
            for path in files {
                let Some((key, content)) = read_keyed(path).await else {
                    continue;
                };
                if state.uploaded.contains(&key) {
                    continue;
                }
                self.client
                    .upload_file(&store_id, &path.to_string_lossy(), &content)
                    .await?;
                state.uploaded.insert(key);
                new_files += 1;
            }
            drop(sessions);

            self.track(session_id, &store_id).await;
            info!("Using session store {store_id} for {session_id} ({new_files} new files)");
            return Ok(Some(store_id));
        }

        // Ephemeral store: create, upload everything, caller deletes after
        // the call.
        let store_id = self.client.create_store("ephemeral-context").await?;
        let mut uploaded = 0usize;
        for path in files {
            let Some((_, content)) = read_keyed(path).await else {
                continue;
            };
            self.client
                .upload_file(&store_id, &path.to_string_lossy(), &content)
                .await?;
            uploaded += 1;
        }
        if let Some(session_id) = session_id {
            self.track(session_id, &store_id).await;
        }
        info!("Created ephemeral vector store {store_id} with {uploaded} files");
        Ok(Some(store_id))
    }

    /// Delete an ephemeral store. Session-scoped stores are owned by the
    /// reuse service and survive the call.
    pub async fn delete(&self, store_id: &str) -> ForceResult<()> {
        if self.managed.lock().await.contains(store_id) {
            debug!("Skipping delete for session-scoped store {store_id}");
            return Ok(());
        }
        match self.client.delete_store(store_id).await {
            Ok(()) => {
                info!("Deleted ephemeral vector store {store_id}");
                Ok(())
            }
            Err(e) => {
                warn!("Error deleting vector store {store_id}: {e}");
                Err(e)
            }
        }
    }

    /// Every store id used in the session, oldest first.
    pub async fn get_all_for_session(&self, session_id: &str) -> Vec<String> {
        self.session_stores
            .lock()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn client(&self) -> Arc<dyn VectorStoreClient> {
        Arc::clone(&self.client)
    }

    async fn track(&self, session_id: &str, store_id: &str) {
        let mut stores = self.session_stores.lock().await;
        let entry = stores.entry(session_id.to_string()).or_default();
        if !entry.iter().any(|s| s == store_id) {
            entry.push(store_id.to_string());
        }
    }
}

async fn read_keyed(path: &Path) -> Option<(String, String)> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let key = file_key(path, &content);
            Some((key, content))
        }
        Err(e) => {
            warn!("Skipping unreadable file {}: {e}", path.display());
            None
        }
    }
}
