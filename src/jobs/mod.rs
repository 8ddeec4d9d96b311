use crate::errors::{ForceError, ForceResult};
use crate::session::db::{SessionDb, unix_now};
use crate::tools::executor::ToolExecutor;
use rusqlite::OptionalExtension;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lifecycle states of an async job.
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub target_tool: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

/// Runs tool invocations as background jobs with durable status. A job's
/// result row is written before its status becomes `succeeded`, so a
/// successful poll can always retrieve the result.
pub struct JobManager {
    db: Arc<SessionDb>,
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl JobManager {
    pub fn new(db: Arc<SessionDb>) -> Self {
        Self {
            db,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn start_job<'a>(
        self: &'a Arc<Self>,
        executor: Arc<ToolExecutor>,
        target_tool: String,
        args: Map<String, Value>,
        max_runtime_s: u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ForceResult<String>> + Send + 'a>>
    {
        Box::pin(async move {
        let metadata = executor
            .registry()
            .get_tool(&target_tool)
            .ok_or_else(|| ForceError::NotFound(format!("tool '{target_tool}'")))?;

        let job_id = format!("job_{}", uuid::Uuid::new_v4().simple());
        let args_json =
            serde_json::to_string(&args).map_err(|e| ForceError::Storage(e.to_string()))?;
        let now = unix_now();
        {
            let (id, tool, args_json) = (job_id.clone(), target_tool.clone(), args_json);
            self.db
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO jobs (job_id, target_tool, args, status, started_at, max_runtime)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        rusqlite::params![id, tool, args_json, STATUS_PENDING, now, max_runtime_s as i64],
                    )
                    .map(|_| ())
                })
                .await?;
        }

        let cancel = CancellationToken::new();
        self.running
            .lock()
            .await
            .insert(job_id.clone(), cancel.clone());

        // Deadline: whichever of the tool timeout and the caller's cap is
        // smaller.
        let deadline_secs = metadata.model_config.timeout_secs.min(max_runtime_s);
        let manager = Arc::clone(self);
        let id = job_id.clone();
        let job_future: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
            Box::pin(async move {
            if let Err(e) = manager.set_status(&id, STATUS_RUNNING).await {
                warn!("Job {id}: failed to mark running: {e}");
            }

            let run = executor.execute(&target_tool, args, cancel.clone());
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(ForceError::Cancelled),
                r = tokio::time::timeout(std::time::Duration::from_secs(deadline_secs), run) => {
                    match r {
                        Ok(inner) => inner,
                        Err(_) => Err(ForceError::Timeout { seconds: deadline_secs }),
                    }
                }
            };

            let finish = match &outcome {
                Ok(content) => manager.finish(&id, STATUS_SUCCEEDED, Some(content), None).await,
                Err(ForceError::Cancelled) => {
                    manager.finish(&id, STATUS_CANCELLED, None, None).await
                }
                Err(e) => {
                    manager
                        .finish(&id, STATUS_FAILED, None, Some(&e.to_string()))
                        .await
                }
            };
            if let Err(e) = finish {
                warn!("Job {id}: failed to record outcome: {e}");
            }
            manager.running.lock().await.remove(&id);
            info!("Job {id} finished");
        });
        tokio::spawn(job_future);

        Ok(job_id)
        })
    }

    pub async fn poll_job(&self, job_id: &str) -> ForceResult<JobStatus> {
        let id = job_id.to_string();
        let row: Option<(String, String, Option<String>, Option<String>, i64, Option<i64>)> = self
            .db
            .call(move |conn| {
                conn.query_row(
                    "SELECT target_tool, status, result, error, started_at, finished_at
                     FROM jobs WHERE job_id = ?1",
                    [id],
                    |r| {
                        Ok((
                            r.get(0)?,
                            r.get(1)?,
                            r.get(2)?,
                            r.get(3)?,
                            r.get(4)?,
                            r.get(5)?,
                        ))
                    },
                )
                .optional()
            })
            .await?;
        let Some((target_tool, status, result, error, started_at, finished_at)) = row else {
            return Err(ForceError::NotFound(format!("job '{job_id}'")));
        };
        Ok(JobStatus {
            job_id: job_id.to_string(),
            target_tool,
            status,
            result,
            error,
            started_at,
            finished_at,
        })
    }

    /// Cooperative cancellation. Completed jobs are unaffected.
    pub async fn cancel_job(&self, job_id: &str) -> ForceResult<String> {
        // Ensure the job exists before anything else.
        let status = self.poll_job(job_id).await?;
        if let Some(token) = self.running.lock().await.get(job_id) {
            token.cancel();
            return Ok(json!({"job_id": job_id, "status": "cancellation_requested"}).to_string());
        }
        Ok(json!({"job_id": job_id, "status": status.status, "note": "already finished"})
            .to_string())
    }

    async fn set_status(&self, job_id: &str, status: &str) -> ForceResult<()> {
        let (id, status) = (job_id.to_string(), status.to_string());
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE jobs SET status = ?2 WHERE job_id = ?1",
                    rusqlite::params![id, status],
                )
                .map(|_| ())
            })
            .await
    }

    /// Single-row write: result, error, finished_at, and the terminal status
    /// land atomically.
    async fn finish(
        &self,
        job_id: &str,
        status: &str,
        result: Option<&str>,
        error: Option<&str>,
    ) -> ForceResult<()> {
        let (id, status) = (job_id.to_string(), status.to_string());
        let result = result.map(String::from);
        let error = error.map(String::from);
        let now = unix_now();
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE jobs SET status = ?2, result = ?3, error = ?4, finished_at = ?5
                     WHERE job_id = ?1",
                    rusqlite::params![id, status, result, error, now],
                )
                .map(|_| ())
            })
            .await
    }
}
