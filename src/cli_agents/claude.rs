use crate::cli_agents::plugin::{CliPlugin, ParsedOutput};
use serde_json::Value;
use std::path::PathBuf;

/// Plugin for the Claude Code CLI. Output is line-delimited JSON in
/// `--output-format stream-json` mode; the terminal `result` event carries
/// the final content.
pub struct ClaudePlugin;

impl CliPlugin for ClaudePlugin {
    fn name(&self) -> &'static str {
        "Claude Code"
    }

    fn executable(&self) -> &'static str {
        "claude"
    }

    fn install_command(&self) -> &'static str {
        "npm install -g @anthropic-ai/claude-code"
    }

    fn documentation_url(&self) -> &'static str {
        "https://docs.anthropic.com/claude-code"
    }

    fn build_new_session_args(
        &self,
        task: &str,
        context_dirs: &[PathBuf],
        role: Option<&str>,
        _reasoning_effort: &str,
    ) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            task.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        for dir in context_dirs {
            args.push("--add-dir".to_string());
            args.push(dir.to_string_lossy().to_string());
        }
        if let Some(role) = role {
            args.push("--append-system-prompt".to_string());
            args.push(role.to_string());
        }
        args
    }

    fn build_resume_args(
        &self,
        cli_session_id: &str,
        task: &str,
        _reasoning_effort: &str,
    ) -> Vec<String> {
        vec![
            "-p".to_string(),
            "--resume".to_string(),
            cli_session_id.to_string(),
            task.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ]
    }

    fn parse_output(&self, stdout: &str) -> ParsedOutput {
        let mut session_id = None;
        let mut result_text = None;
        let mut assistant_texts: Vec<String> = Vec::new();

        for line in stdout.lines() {
            let Ok(event) = serde_json::from_str::<Value>(line.trim()) else {
                continue;
            };
            if session_id.is_none() {
                if let Some(id) = event["session_id"].as_str() {
                    session_id = Some(id.to_string());
                }
            }
            match event["type"].as_str() {
                Some("result") => {
                    if let Some(text) = event["result"].as_str() {
                        result_text = Some(text.to_string());
                    }
                }
                Some("assistant") => {
                    if let Some(blocks) = event["message"]["content"].as_array() {
                        for block in blocks {
                            if block["type"] == "text" {
                                if let Some(t) = block["text"].as_str() {
                                    assistant_texts.push(t.to_string());
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        ParsedOutput {
            content: result_text.unwrap_or_else(|| assistant_texts.join("\n")),
            session_id,
        }
    }

    fn reasoning_env_vars(&self, reasoning_effort: &str) -> Vec<(String, String)> {
        let budget = match reasoning_effort {
            "low" => "4096",
            "medium" => "8192",
            "high" => "16384",
            "xhigh" => "31999",
            _ => return Vec::new(),
        };
        vec![("MAX_THINKING_TOKENS".to_string(), budget.to_string())]
    }
}
