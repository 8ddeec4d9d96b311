use crate::adapters::capabilities::AdapterCapabilities;
use crate::errors::{ForceError, ForceResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Ambient context for one tool invocation, threaded from the executor down
/// into adapters and the tool dispatcher.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub project: String,
    pub tool: String,
    pub session_id: String,
    pub vector_store_ids: Vec<String>,
}

/// Adapter-routed parameters, plus the opaque structured-output contract.
#[derive(Debug, Clone, Default)]
pub struct AdapterParams {
    pub kwargs: Map<String, Value>,
    pub structured_output: Option<Value>,
}

impl AdapterParams {
    pub fn temperature(&self) -> Option<f64> {
        self.kwargs.get("temperature").and_then(Value::as_f64)
    }

    /// Caller-supplied reasoning effort. Explicit values are never upgraded
    /// or downgraded; the capability default applies only when this is None.
    pub fn reasoning_effort(&self) -> Option<&str> {
        self.kwargs.get("reasoning_effort").and_then(Value::as_str)
    }

    pub fn disable_history_search(&self) -> bool {
        self.kwargs
            .get("disable_history_search")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// One tool declaration handed to a provider.
#[derive(Debug, Clone)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Interface adapters use to declare and invoke tools during a model turn.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Tool declarations appropriate for the adapter's capabilities. When the
    /// provider has native file search the internal task-file search tool is
    /// suppressed.
    fn get_tool_declarations(
        &self,
        capabilities: &AdapterCapabilities,
        disable_history_search: bool,
    ) -> Vec<ToolDeclaration>;

    /// Execute a nested tool call. Failures are converted to a textual
    /// `"Error: ..."` result so the model can recover; they never abort the
    /// turn.
    async fn execute(&self, tool_name: &str, tool_args: &str, ctx: &CallContext) -> String;
}

/// Result of one `generate` call.
#[derive(Debug, Clone, Default)]
pub struct GenerateResult {
    pub content: String,
    pub response_id: Option<String>,
    pub citations: Vec<String>,
    pub usage: Option<Value>,
}

/// Uniform contract over heterogeneous providers. Instances are shared
/// across callers and hold no per-call mutable state.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn model_name(&self) -> &str;
    fn display_name(&self) -> &str;
    fn capabilities(&self) -> &AdapterCapabilities;

    async fn generate(
        &self,
        prompt: &str,
        params: &AdapterParams,
        ctx: &CallContext,
        dispatcher: &dyn ToolDispatcher,
        cancel: &CancellationToken,
    ) -> ForceResult<GenerateResult>;
}

impl std::fmt::Debug for dyn Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("model_name", &self.model_name())
            .finish()
    }
}

const MAX_RETRIES: usize = 3;
const INITIAL_DELAY_MS: u64 = 1000;
const MAX_DELAY_MS: u64 = 10_000;
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Run a provider request with retry on transient errors.
///
/// Non-transient errors return immediately; cancellation aborts the wait.
pub async fn retry_transient<T, F, Fut>(
    op: &str,
    cancel: &CancellationToken,
    mut f: F,
) -> ForceResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ForceResult<T>>,
{
    let mut last_error: Option<ForceError> = None;
    for attempt in 0..=MAX_RETRIES {
        if cancel.is_cancelled() {
            return Err(ForceError::Cancelled);
        }
        if attempt > 0 {
            warn!(
                "{op}: retry attempt {attempt}/{MAX_RETRIES} after error: {}",
                last_error.as_ref().map(|e| e.to_string()).unwrap_or_default()
            );
        }
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                let retry_after = match &e {
                    ForceError::BackendTransient { retry_after, .. } => *retry_after,
                    _ => None,
                };
                let delay_ms = match retry_after {
                    Some(secs) => {
                        debug!("{op}: using retry-after hint: {secs}s");
                        secs * 1000
                    }
                    None => {
                        let base = (INITIAL_DELAY_MS as f64
                            * BACKOFF_MULTIPLIER.powi(attempt as i32))
                        .min(MAX_DELAY_MS as f64) as u64;
                        // Jitter up to 25% to avoid thundering herd.
                        base + (base as f64 * 0.25 * fastrand::f64()) as u64
                    }
                };
                last_error = Some(e);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ForceError::Cancelled),
                    _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| ForceError::BackendUnavailable(format!("{op}: retries exhausted"))))
}

/// Map an HTTP response to success JSON or a classified error.
pub async fn check_response(
    resp: reqwest::Response,
    provider: &str,
) -> ForceResult<Value> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json()
            .await
            .map_err(|e| ForceError::Parse(format!("{provider} response: {e}")));
    }
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = resp.text().await.unwrap_or_default();
    if status.as_u16() == 429 || status.is_server_error() {
        Err(ForceError::BackendTransient {
            message: format!("{provider} {status}: {body}"),
            retry_after,
        })
    } else {
        Err(ForceError::BackendRejected(format!(
            "{provider} {status}: {body}"
        )))
    }
}

/// Await a request future, aborting when the call is cancelled.
pub async fn send_cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, reqwest::Error>>,
    provider: &str,
) -> ForceResult<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ForceError::Cancelled),
        result = fut => result.map_err(|e| ForceError::BackendTransient {
            message: format!("{provider} request failed: {e}"),
            retry_after: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retry_gives_up_on_rejection() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let cancel = CancellationToken::new();
        let result: ForceResult<()> = retry_transient("test", &cancel, move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ForceError::BackendRejected("bad request".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_recovers_from_transient() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let cancel = CancellationToken::new();
        let result = retry_transient("test", &cancel, move || {
            let calls = calls2.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ForceError::BackendTransient {
                        message: "503".into(),
                        retry_after: Some(0),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_respects_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: ForceResult<()> =
            retry_transient("test", &cancel, || async { Ok(()) }).await;
        assert!(matches!(result, Err(ForceError::Cancelled)));
    }

    #[test]
    fn adapter_params_accessors() {
        let mut kwargs = Map::new();
        kwargs.insert("temperature".into(), serde_json::json!(0.4));
        kwargs.insert("reasoning_effort".into(), serde_json::json!("high"));
        let params = AdapterParams {
            kwargs,
            structured_output: None,
        };
        assert_eq!(params.temperature(), Some(0.4));
        assert_eq!(params.reasoning_effort(), Some("high"));
        assert!(!params.disable_history_search());
    }
}
