use crate::adapters::{AdapterParams, AdapterRegistry, CallContext};
use crate::cli_agents::{CliAgentService, Compactor, WorkWithRequest, consult_tool_candidates};
use crate::config::Settings;
use crate::context::{StableListCache, build_context_with_stable_list};
use crate::errors::{ForceError, ForceResult};
use crate::jobs::JobManager;
use crate::session::{CROSS_TOOL, ChatMessage, HistoryItem, UnifiedSessionCache};
use crate::tools::dispatcher::Dispatcher;
use crate::tools::local;
use crate::tools::prompt::build_prompt;
use crate::tools::registry::{LocalService, ToolMetadata, ToolRegistry};
use crate::tools::route::route_params;
use crate::tools::validate::ParameterValidator;
use crate::utils::tokens::count_text_tokens;
use crate::vectorstore::VectorStoreManager;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Floor for the inline context budget after reserving prompt overhead.
const MIN_CONTEXT_BUDGET: usize = 1_024;

fn get_str(params: &Map<String, Value>, name: &str) -> ForceResult<String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| ForceError::InvalidParameter {
            param: name.into(),
            message: "required string parameter is missing".into(),
        })
}

fn get_u64(params: &Map<String, Value>, name: &str, default: u64) -> u64 {
    params.get(name).and_then(Value::as_u64).unwrap_or(default)
}

fn get_paths(params: &Map<String, Value>, name: &str) -> Vec<PathBuf> {
    params
        .get(name)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(PathBuf::from))
                .collect()
        })
        .unwrap_or_default()
}

fn get_strings(params: &Map<String, Value>, name: &str) -> Vec<String> {
    params
        .get(name)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// The orchestration core: validate → route → build context → create vector
/// store → call adapter → persist, with utility tools dispatched to local
/// services instead of an adapter.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    adapters: Arc<AdapterRegistry>,
    sessions: UnifiedSessionCache,
    stable_lists: StableListCache,
    vector_stores: Arc<VectorStoreManager>,
    jobs: Arc<JobManager>,
    cli_service: Arc<CliAgentService>,
    compactor: Arc<Compactor>,
    settings: Arc<Settings>,
    validator: ParameterValidator,
}

impl ToolExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ToolRegistry>,
        adapters: Arc<AdapterRegistry>,
        sessions: UnifiedSessionCache,
        stable_lists: StableListCache,
        vector_stores: Arc<VectorStoreManager>,
        jobs: Arc<JobManager>,
        cli_service: Arc<CliAgentService>,
        compactor: Arc<Compactor>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            registry,
            adapters,
            sessions,
            stable_lists,
            vector_stores,
            jobs,
            cli_service,
            compactor,
            settings,
            validator: ParameterValidator::new(false),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &UnifiedSessionCache {
        &self.sessions
    }

    /// Execute one tool call end to end.
    pub async fn execute(
        self: &Arc<Self>,
        tool_id: &str,
        kwargs: Map<String, Value>,
        cancel: CancellationToken,
    ) -> ForceResult<String> {
        let metadata = self
            .registry
            .get_tool(tool_id)
            .ok_or_else(|| ForceError::NotFound(format!("tool '{tool_id}'")))?;

        let started = std::time::Instant::now();
        let result = match metadata.service {
            Some(service) => {
                self.dispatch_local(service, &metadata, kwargs, &cancel)
                    .await
            }
            None => self.execute_model_tool(&metadata, kwargs, &cancel).await,
        };
        match &result {
            Ok(_) => info!("{tool_id} completed in {:.2}s", started.elapsed().as_secs_f64()),
            Err(e) => warn!(
                "{tool_id} failed after {:.2}s: {e}",
                started.elapsed().as_secs_f64()
            ),
        }
        result
    }

    /// Utility tools backed by local services.
    async fn dispatch_local(
        self: &Arc<Self>,
        service: LocalService,
        metadata: &ToolMetadata,
        kwargs: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> ForceResult<String> {
        let params = self.validator.validate(metadata, &kwargs, None)?;
        let project = self.settings.project_name();

        match service {
            LocalService::ListSessions => {
                let limit = get_u64(&params, "limit", 10) as usize;
                let sessions = self.sessions.list_sessions(&project, limit).await?;
                serde_json::to_string_pretty(&sessions)
                    .map_err(|e| ForceError::Internal(e.into()))
            }
            LocalService::DescribeSession => {
                let session_id = get_str(&params, "session_id")?;
                let history = self
                    .sessions
                    .get_history(&project, CROSS_TOOL, &session_id)
                    .await?;
                if history.is_empty() {
                    return Ok(format!("No history found for session '{session_id}'."));
                }
                if let Some(cached) = self
                    .compactor
                    .get_cached_summary(&project, CROSS_TOOL, &session_id)
                    .await?
                {
                    return Ok(cached);
                }
                let summary = self
                    .compactor
                    .compact_history(&history, cancel)
                    .await?
                    .unwrap_or_else(|| "Session history is empty.".into());
                self.compactor
                    .set_cached_summary(&project, CROSS_TOOL, &session_id, &summary)
                    .await?;
                Ok(summary)
            }
            LocalService::CountProjectTokens => {
                let items = get_paths(&params, "items");
                let top_n = get_u64(&params, "top_n", 10) as usize;
                let report = local::count_project_tokens(items, top_n).await?;
                serde_json::to_string_pretty(&report).map_err(|e| ForceError::Internal(e.into()))
            }
            LocalService::GetInstructions => {
                let ids: Vec<String> =
                    self.registry.list_tools().iter().map(|t| t.id.clone()).collect();
                Ok(local::get_instructions(&ids))
            }
            LocalService::ListForceGuides => {
                let names = local::list_force_guides(&self.settings.project_dir())?;
                serde_json::to_string_pretty(&names).map_err(|e| ForceError::Internal(e.into()))
            }
            LocalService::ReadForceGuide => {
                let name = get_str(&params, "name")?;
                local::read_force_guide(&self.settings.project_dir(), &name)
            }
            LocalService::StartJob => {
                let target_tool = get_str(&params, "target_tool")?;
                let args = params
                    .get("args")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let max_runtime = get_u64(&params, "max_runtime_s", 3600);
                let job_id = self
                    .jobs
                    .start_job(Arc::clone(self), target_tool, args, max_runtime)
                    .await?;
                Ok(json!({
                    "job_id": job_id,
                    "note": "call poll_job with this job_id to retrieve status and result"
                })
                .to_string())
            }
            LocalService::PollJob => {
                let job_id = get_str(&params, "job_id")?;
                let status = self.jobs.poll_job(&job_id).await?;
                serde_json::to_string_pretty(&status).map_err(|e| ForceError::Internal(e.into()))
            }
            LocalService::CancelJob => {
                let job_id = get_str(&params, "job_id")?;
                self.jobs.cancel_job(&job_id).await
            }
            LocalService::SearchProjectHistory => {
                let query = get_str(&params, "query")?;
                let max_results = get_u64(&params, "max_results", 40) as usize;
                let hits = self
                    .sessions
                    .search_history(&project, &query, max_results)
                    .await?;
                serde_json::to_string_pretty(&hits).map_err(|e| ForceError::Internal(e.into()))
            }
            LocalService::TaskFilesSearch => {
                let query = get_str(&params, "query")?;
                let session_id = get_str(&params, "session_id")?;
                let max_results = get_u64(&params, "max_results", 20) as usize;
                let store_ids = self.vector_stores.get_all_for_session(&session_id).await;
                if store_ids.is_empty() {
                    return Ok("No task files are attached to this session.".into());
                }
                let hits = self
                    .vector_stores
                    .client()
                    .search(&store_ids, &query, max_results)
                    .await?;
                serde_json::to_string_pretty(&hits).map_err(|e| ForceError::Internal(e.into()))
            }
            LocalService::WorkWith => {
                let request = WorkWithRequest {
                    agent: get_str(&params, "agent")?,
                    task: get_str(&params, "task")?,
                    session_id: get_str(&params, "session_id")?,
                    role: get_str(&params, "role").unwrap_or_else(|_| "default".into()),
                    context: get_paths(&params, "context"),
                    reasoning_effort: get_str(&params, "reasoning_effort")
                        .unwrap_or_else(|_| "medium".into()),
                    cli_flags: get_strings(&params, "cli_flags"),
                    timeout_secs: get_u64(&params, "timeout", 14_400),
                };
                self.cli_service.work_with(request, cancel).await
            }
            LocalService::ConsultWith => self.consult_with(&params, cancel).await,
        }
    }

    /// `consult_with`: resolve the model to an internal chat tool, inject
    /// compacted cross-tool history, and record the turn back into the
    /// shared session.
    async fn consult_with(
        self: &Arc<Self>,
        params: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> ForceResult<String> {
        let model = get_str(params, "model")?;
        let mut question = get_str(params, "question")?;
        let session_id = get_str(params, "session_id")?;
        let output_format = get_str(params, "output_format").unwrap_or_else(|_| "markdown".into());
        let context = get_strings(params, "context");
        let project = self.settings.project_name();

        let metadata = consult_tool_candidates(&model)
            .into_iter()
            .find_map(|id| self.registry.get_tool(&id))
            .ok_or_else(|| ForceError::NotFound(format!("unknown model: {model}")))?;

        let history = self
            .sessions
            .get_history(&project, CROSS_TOOL, &session_id)
            .await?;
        if !history.is_empty() {
            if let Some(compacted) = self.compactor.compact_history(&history, cancel).await? {
                debug!("consult_with: injected {} prior turns", history.len());
                question = format!("{compacted}\n\nCurrent question: {question}");
            }
        }

        let mut kwargs = Map::new();
        kwargs.insert("instructions".into(), Value::String(question.clone()));
        kwargs.insert("output_format".into(), Value::String(output_format));
        kwargs.insert("session_id".into(), Value::String(session_id.clone()));
        kwargs.insert("context".into(), json!(context));
        let response = self.execute_model_tool(&metadata, kwargs, cancel).await?;

        self.sessions
            .append_message(
                &project,
                CROSS_TOOL,
                &session_id,
                HistoryItem::Chat(ChatMessage::new("user", question).with_tool("consult_with")),
            )
            .await?;
        self.sessions
            .append_message(
                &project,
                CROSS_TOOL,
                &session_id,
                HistoryItem::Chat(
                    ChatMessage::new("assistant", response.clone())
                        .with_tool("consult_with")
                        .with_metadata(json!({"model": model})),
                ),
            )
            .await?;
        self.compactor
            .clear_cached_summary(&project, CROSS_TOOL, &session_id)
            .await?;

        Ok(response)
    }

    /// Adapter-backed tools: the full context → vector store → prompt →
    /// generate pipeline.
    async fn execute_model_tool(
        &self,
        metadata: &ToolMetadata,
        kwargs: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> ForceResult<String> {
        let validated =
            self.validator
                .validate(metadata, &kwargs, metadata.capabilities.as_ref())?;
        let mut routed = route_params(metadata, validated);

        let session_id = routed
            .session_id()
            .map(String::from)
            .ok_or_else(|| ForceError::InvalidParameter {
                param: "session_id".into(),
                message: "required session parameter is missing".into(),
            })?;
        let project = self.settings.project_name();

        // Inline budget: a fraction of the context window minus what the
        // instructions and output format already consume.
        let instructions_tokens = routed
            .prompt_value("instructions")
            .and_then(Value::as_str)
            .map(count_text_tokens)
            .unwrap_or(0);
        let format_tokens = routed
            .prompt_value("output_format")
            .and_then(Value::as_str)
            .map(count_text_tokens)
            .unwrap_or(0);
        let budget = ((metadata.model_config.context_window as f64
            * self.settings.context_percentage) as usize)
            .saturating_sub(instructions_tokens + format_tokens)
            .max(MIN_CONTEXT_BUDGET);

        let context_paths: Vec<PathBuf> = routed
            .take_prompt_value("context")
            .and_then(|v| {
                v.as_array().map(|arr| {
                    arr.iter()
                        .filter_map(|p| p.as_str().map(PathBuf::from))
                        .collect()
                })
            })
            .unwrap_or_default();
        let attachments: Vec<PathBuf> =
            routed.vector_store.iter().map(PathBuf::from).collect();

        // Acquire the adapter before any provider-side resource exists, so a
        // failed lookup cannot leak a vector store.
        let adapter = self.adapters.get_adapter(
            &metadata.model_config.adapter_key,
            &metadata.model_config.model_name,
        )?;

        let built = build_context_with_stable_list(
            &context_paths,
            &attachments,
            &session_id,
            &self.stable_lists,
            budget,
        )
        .await?;

        let created_vs = self
            .vector_stores
            .create(&built.overflow, Some(&session_id))
            .await?;
        let mut vector_store_ids = routed.vector_store_ids.clone();
        if let Some(id) = &created_vs {
            vector_store_ids.push(id.clone());
        }

        let prompt = build_prompt(&routed.prompt, &built.inline_files, !built.overflow.is_empty());
        let mut adapter_kwargs = routed.adapter.clone();
        adapter_kwargs.insert("vector_store_ids".into(), json!(vector_store_ids));
        let params = AdapterParams {
            kwargs: adapter_kwargs,
            structured_output: routed.structured_output.clone(),
        };
        let ctx = CallContext {
            project,
            tool: metadata.id.clone(),
            session_id: session_id.clone(),
            vector_store_ids: vector_store_ids.clone(),
        };
        let dispatcher = Dispatcher::new(
            self.sessions.clone(),
            Arc::clone(&self.vector_stores),
            vector_store_ids,
        );

        let timeout = Duration::from_secs(metadata.model_config.timeout_secs);
        let generate = adapter.generate(&prompt, &params, &ctx, &dispatcher, cancel);
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ForceError::Cancelled),
            r = tokio::time::timeout(timeout, generate) => match r {
                Ok(inner) => inner,
                Err(_) => Err(ForceError::Timeout {
                    seconds: timeout.as_secs(),
                }),
            },
        };

        // Ephemeral stores are released no matter how the call ended; the
        // manager leaves session-scoped stores alone.
        if let Some(vs_id) = &created_vs {
            if let Err(e) = self.vector_stores.delete(vs_id).await {
                warn!("Failed to delete vector store {vs_id}: {e}");
            }
        }

        result.map(|r| r.content)
    }
}

/// Transport-facing wrapper: a raw cancellation becomes an empty success
/// (the host aborted, nobody is waiting for an error); everything else
/// passes through.
pub struct SafeExecutor {
    inner: Arc<ToolExecutor>,
}

impl SafeExecutor {
    pub fn new(inner: Arc<ToolExecutor>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<ToolExecutor> {
        &self.inner
    }

    pub async fn execute(
        &self,
        tool_id: &str,
        kwargs: Map<String, Value>,
        cancel: CancellationToken,
    ) -> ForceResult<String> {
        match self.inner.execute(tool_id, kwargs, cancel).await {
            Err(ForceError::Cancelled) => {
                info!("Tool {tool_id} cancelled - returning empty success");
                Ok(String::new())
            }
            other => other,
        }
    }
}
