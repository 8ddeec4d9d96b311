pub mod manager;

pub use manager::VectorStoreManager;

use crate::errors::{ForceError, ForceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// One search result from a vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub store_id: String,
    pub file_name: String,
    pub snippet: String,
    pub score: f64,
}

/// The provider-side contract the gateway consumes: create a store, upload
/// files into it, search it, delete it. Providers own everything else.
#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    async fn create_store(&self, name: &str) -> ForceResult<String>;

    /// Upload one file. Returns the provider file id. Uploads are idempotent
    /// on file identity; re-uploading identical content may return the
    /// existing id.
    async fn upload_file(
        &self,
        store_id: &str,
        file_name: &str,
        content: &str,
    ) -> ForceResult<String>;

    async fn search(
        &self,
        store_ids: &[String],
        query: &str,
        max_results: usize,
    ) -> ForceResult<Vec<SearchHit>>;

    async fn delete_store(&self, store_id: &str) -> ForceResult<()>;
}

/// In-process store used by tests and the mock adapter path. Search is naive
/// keyword scoring over the uploaded contents.
#[derive(Default)]
pub struct InMemoryVectorStore {
    stores: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn store_count(&self) -> usize {
        self.stores.lock().await.len()
    }

    pub async fn file_count(&self, store_id: &str) -> usize {
        self.stores
            .lock()
            .await
            .get(store_id)
            .map(|f| f.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorStoreClient for InMemoryVectorStore {
    async fn create_store(&self, name: &str) -> ForceResult<String> {
        let id = format!("vs_{}", uuid::Uuid::new_v4().simple());
        debug!("Created in-memory vector store {id} ({name})");
        self.stores.lock().await.insert(id.clone(), HashMap::new());
        Ok(id)
    }

    async fn upload_file(
        &self,
        store_id: &str,
        file_name: &str,
        content: &str,
    ) -> ForceResult<String> {
        let mut stores = self.stores.lock().await;
        let store = stores
            .get_mut(store_id)
            .ok_or_else(|| ForceError::NotFound(format!("vector store {store_id}")))?;
        store.insert(file_name.to_string(), content.to_string());
        Ok(format!("file_{}", uuid::Uuid::new_v4().simple()))
    }

    async fn search(
        &self,
        store_ids: &[String],
        query: &str,
        max_results: usize,
    ) -> ForceResult<Vec<SearchHit>> {
        let stores = self.stores.lock().await;
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(String::from)
            .collect();
        let mut hits = Vec::new();
        for store_id in store_ids {
            let Some(files) = stores.get(store_id) else {
                continue;
            };
            for (name, content) in files {
                let lowered = content.to_lowercase();
                let matched = terms.iter().filter(|t| lowered.contains(*t)).count();
                if matched == 0 {
                    continue;
                }
                let snippet: String = content.chars().take(240).collect();
                hits.push(SearchHit {
                    store_id: store_id.clone(),
                    file_name: name.clone(),
                    snippet,
                    score: matched as f64 / terms.len().max(1) as f64,
                });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(max_results);
        Ok(hits)
    }

    async fn delete_store(&self, store_id: &str) -> ForceResult<()> {
        self.stores.lock().await.remove(store_id);
        Ok(())
    }
}

/// HTTP client against the vector-store provider's minimal surface.
pub struct HttpVectorStoreClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpVectorStoreClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    async fn check(resp: reqwest::Response) -> ForceResult<serde_json::Value> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json()
                .await
                .map_err(|e| ForceError::Parse(format!("vector store response: {e}")));
        }
        let body = resp.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(ForceError::BackendTransient {
                message: format!("vector store {status}: {body}"),
                retry_after: None,
            })
        } else {
            Err(ForceError::BackendRejected(format!(
                "vector store {status}: {body}"
            )))
        }
    }
}

#[async_trait]
impl VectorStoreClient for HttpVectorStoreClient {
    async fn create_store(&self, name: &str) -> ForceResult<String> {
        let resp = self
            .client
            .post(format!("{}/vector_stores", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({"name": name}))
            .send()
            .await
            .map_err(|e| ForceError::BackendTransient {
                message: format!("vector store create: {e}"),
                retry_after: None,
            })?;
        let body = Self::check(resp).await?;
        body["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| ForceError::Parse("vector store create: missing id".into()))
    }

    async fn upload_file(
        &self,
        store_id: &str,
        file_name: &str,
        content: &str,
    ) -> ForceResult<String> {
        let resp = self
            .client
            .post(format!("{}/vector_stores/{store_id}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({"name": file_name, "content": content}))
            .send()
            .await
            .map_err(|e| ForceError::BackendTransient {
                message: format!("vector store upload: {e}"),
                retry_after: None,
            })?;
        let body = Self::check(resp).await?;
        body["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| ForceError::Parse("vector store upload: missing id".into()))
    }

    async fn search(
        &self,
        store_ids: &[String],
        query: &str,
        max_results: usize,
    ) -> ForceResult<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for store_id in store_ids {
            let resp = self
                .client
                .post(format!("{}/vector_stores/{store_id}/search", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&serde_json::json!({"query": query, "max_results": max_results}))
                .send()
                .await
                .map_err(|e| ForceError::BackendTransient {
                    message: format!("vector store search: {e}"),
                    retry_after: None,
                })?;
            let body = Self::check(resp).await?;
            if let Some(results) = body["results"].as_array() {
                for r in results {
                    hits.push(SearchHit {
                        store_id: store_id.clone(),
                        file_name: r["name"].as_str().unwrap_or("").to_string(),
                        snippet: r["snippet"].as_str().unwrap_or("").to_string(),
                        score: r["score"].as_f64().unwrap_or(0.0),
                    });
                }
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(max_results);
        Ok(hits)
    }

    async fn delete_store(&self, store_id: &str) -> ForceResult<()> {
        let resp = self
            .client
            .delete(format!("{}/vector_stores/{store_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ForceError::BackendTransient {
                message: format!("vector store delete: {e}"),
                retry_after: None,
            })?;
        Self::check(resp).await.map(|_| ())
    }
}
