use crate::cli_agents::compactor::Compactor;
use crate::cli_agents::environment::build_isolated_env;
use crate::cli_agents::executor::{CliRunResult, IDLE_OUTPUT_TIMEOUT, run_cli};
use crate::cli_agents::output::{
    clean_output, format_summary_with_link, save_output_file,
};
use crate::cli_agents::plugin::get_cli_plugin;
use crate::cli_agents::resolver::{ensure_cli_available, resolve_model_to_cli};
use crate::cli_agents::roles::get_role;
use crate::cli_agents::session_bridge::SessionBridge;
use crate::config::ProviderKeys;
use crate::errors::{ForceError, ForceResult};
use crate::session::{CROSS_TOOL, ChatMessage, HistoryItem, UnifiedSessionCache};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Validated inputs for one `work_with` call.
#[derive(Debug, Clone)]
pub struct WorkWithRequest {
    pub agent: String,
    pub task: String,
    pub session_id: String,
    pub role: String,
    pub context: Vec<PathBuf>,
    pub reasoning_effort: String,
    pub cli_flags: Vec<String>,
    pub timeout_secs: u64,
}

/// Where injected cross-tool context came from.
pub fn context_source(history: &[HistoryItem]) -> Option<String> {
    let mut tools: Vec<&str> = history
        .iter()
        .filter_map(|i| i.as_chat())
        .filter_map(|m| m.tool.as_deref())
        .collect();
    tools.sort_unstable();
    tools.dedup();
    match tools.len() {
        0 => None,
        1 => Some(tools[0].to_string()),
        _ => Some("mixed".to_string()),
    }
}

/// Resume only when the previous assistant turn came from the same CLI.
/// Anything else means a cross-tool handoff, where starting fresh with
/// injected context keeps the prior conversation visible.
pub fn should_resume(history: &[HistoryItem], has_binding: bool, cli_name: &str) -> bool {
    if !has_binding {
        return false;
    }
    let last_assistant = history
        .iter()
        .rev()
        .find(|i| i.role() == Some("assistant"));
    let Some(item) = last_assistant else {
        // Binding exists but no assistant turns yet.
        return true;
    };
    let Some(msg) = item.as_chat() else {
        return false;
    };
    if msg.tool.as_deref() != Some("work_with") {
        return false;
    }
    let last_cli = msg
        .metadata
        .as_ref()
        .and_then(|m| m["cli_name"].as_str())
        .unwrap_or("");
    last_cli.is_empty() || last_cli == cli_name
}

/// Executes CLI agents (claude, gemini, codex) as subprocesses: resolves the
/// model to a CLI, decides between resume and fresh-with-context, runs the
/// process in an isolated environment, parses its stream, and records the
/// turn into the shared session history.
pub struct CliAgentService {
    sessions: UnifiedSessionCache,
    bridge: SessionBridge,
    compactor: Arc<Compactor>,
    keys: ProviderKeys,
    project_dir: PathBuf,
    project: String,
}

impl CliAgentService {
    pub fn new(
        sessions: UnifiedSessionCache,
        bridge: SessionBridge,
        compactor: Arc<Compactor>,
        keys: ProviderKeys,
        project_dir: PathBuf,
        project: String,
    ) -> Self {
        Self {
            sessions,
            bridge,
            compactor,
            keys,
            project_dir,
            project,
        }
    }

    pub async fn work_with(
        &self,
        req: WorkWithRequest,
        cancel: &CancellationToken,
    ) -> ForceResult<String> {
        debug!(
            "work_with: agent={}, session_id={}",
            req.agent, req.session_id
        );
        let cli_name = resolve_model_to_cli(&req.agent)?;
        let plugin = get_cli_plugin(cli_name)
            .ok_or_else(|| ForceError::NotFound(format!("no CLI plugin for {cli_name}")))?;
        ensure_cli_available(plugin)?;

        let existing_cli_session = self
            .bridge
            .get_cli_session_id(&self.project, &req.session_id, cli_name)
            .await?;
        let history = self
            .sessions
            .get_history(&self.project, CROSS_TOOL, &req.session_id)
            .await?;

        let use_resume = should_resume(&history, existing_cli_session.is_some(), cli_name);
        info!(
            "work_with session {}: history={} turns, cli_session={}, resume={use_resume}",
            req.session_id,
            history.len(),
            existing_cli_session.as_deref().unwrap_or("none")
        );

        // Cross-tool handoff: prepend compacted history so the new CLI sees
        // what happened elsewhere.
        let mut task = req.task.clone();
        let mut context_injected = false;
        let mut source = None;
        if !history.is_empty() && !use_resume {
            source = context_source(&history);
            if let Some(compacted) = self.compactor.compact_history(&history, cancel).await? {
                task = format!("{compacted}\n\nCurrent task: {task}");
                context_injected = true;
                info!(
                    "work_with: injected cross-tool context from {}",
                    source.as_deref().unwrap_or("unknown")
                );
            }
        }

        // Tell the agent where to work, both in the task text and via the
        // plugin's directory arguments.
        task = format!(
            "Work from this directory: {}\n\n{task}",
            self.project_dir.display()
        );

        let command = if use_resume {
            let cli_session = existing_cli_session.clone().expect("checked by should_resume");
            plugin.build_resume_args(&cli_session, &task, &req.reasoning_effort)
        } else {
            let mut context_dirs = vec![self.project_dir.clone()];
            context_dirs.extend(req.context.iter().cloned());
            let role = get_role(&self.project_dir, &req.role);
            plugin.build_new_session_args(
                &task,
                &context_dirs,
                Some(&role),
                &req.reasoning_effort,
            )
        };
        let mut full_command = vec![plugin.executable().to_string()];
        full_command.extend(command);
        full_command.extend(req.cli_flags.iter().cloned());

        let mut env = build_isolated_env(&self.project_dir, cli_name, &self.keys);
        for (k, v) in plugin.reasoning_env_vars(&req.reasoning_effort) {
            env.insert(k, v);
        }

        let result = run_cli(
            &full_command,
            &env,
            &self.project_dir,
            Duration::from_secs(req.timeout_secs),
            IDLE_OUTPUT_TIMEOUT,
            cancel,
        )
        .await?;

        let parsed = plugin.parse_output(&result.stdout);
        if let Some(cli_session_id) = &parsed.session_id {
            self.bridge
                .store_cli_session_id(&self.project, &req.session_id, cli_name, cli_session_id)
                .await?;
        }

        let final_response = self
            .build_response(&result, parsed.content, &req.session_id, cancel)
            .await?;

        // Persist the turn with its handoff metadata.
        let mut metadata = json!({"cli_name": cli_name});
        if context_injected {
            metadata["context_injected"] = json!(true);
            if let Some(source) = &source {
                metadata["context_source"] = json!(source);
            }
        }
        if use_resume {
            metadata["used_resume_flag"] = json!(true);
            if let Some(resumed_from) = &existing_cli_session {
                metadata["resumed_from"] = json!(resumed_from);
            }
        }
        self.sessions
            .append_message(
                &self.project,
                CROSS_TOOL,
                &req.session_id,
                HistoryItem::Chat(ChatMessage::new("user", task).with_tool("work_with")),
            )
            .await?;
        self.sessions
            .append_message(
                &self.project,
                CROSS_TOOL,
                &req.session_id,
                HistoryItem::Chat(
                    ChatMessage::new("assistant", final_response.clone())
                        .with_tool("work_with")
                        .with_metadata(metadata),
                ),
            )
            .await?;
        self.compactor
            .clear_cached_summary(&self.project, CROSS_TOOL, &req.session_id)
            .await?;

        Ok(final_response)
    }

    /// Assemble the returned content: annotate timeouts, fall back to stderr
    /// on a silent failure, and spill oversized outputs to a file behind a
    /// summary.
    async fn build_response(
        &self,
        result: &CliRunResult,
        parsed_content: String,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> ForceResult<String> {
        let mut raw = if !parsed_content.is_empty() {
            parsed_content
        } else {
            result.stdout.clone()
        };
        if result.timed_out {
            raw.push_str("\n\n[CLI execution timed out - partial output shown]");
        }
        if result.idle_timed_out {
            raw.push_str("\n\n[CLI process killed due to idle timeout - may be hung]");
        }
        if result.exit_code.unwrap_or(0) != 0 && raw.trim().is_empty() {
            raw = format!(
                "CLI error (exit code {}):\n{}",
                result.exit_code.unwrap_or(-1),
                result.stderr
            );
        }

        let cleaned = clean_output(&raw);
        if !cleaned.exceeds_threshold {
            return Ok(cleaned.markdown);
        }

        let output_file = save_output_file(&self.project_dir, session_id, &cleaned.markdown)?;
        info!(
            "CLI output is {} tokens, saved to {}",
            cleaned.tokens,
            output_file.display()
        );
        let summary = self
            .compactor
            .summarize_output(&cleaned.markdown, cancel)
            .await?;
        Ok(format_summary_with_link(&summary, &output_file))
    }
}

/// Candidate internal tool names for a user-supplied model string
/// (`gpt-5.2` → `chat_with_gpt52`, …). Tried in order by `consult_with`.
pub fn consult_tool_candidates(model: &str) -> Vec<String> {
    let mut variants = vec![
        model.to_string(),
        model.replace(['-', '.'], ""),
        model.replace('-', "_"),
        model.replace('.', ""),
        model.replace('-', "_").replace('.', ""),
        model.to_lowercase(),
        model.to_lowercase().replace(['-', '.'], ""),
    ];
    let mut seen = std::collections::HashSet::new();
    variants.retain(|v| seen.insert(v.clone()));
    variants
        .into_iter()
        .map(|v| format!("chat_with_{v}"))
        .collect()
}
