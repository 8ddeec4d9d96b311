use crate::cli_agents::plugin::{CliPlugin, ParsedOutput};
use serde_json::Value;
use std::path::PathBuf;

/// Plugin for the Codex CLI. `codex exec --json` emits line-delimited
/// events; the thread id doubles as the resumable session id.
pub struct CodexPlugin;

impl CliPlugin for CodexPlugin {
    fn name(&self) -> &'static str {
        "Codex CLI"
    }

    fn executable(&self) -> &'static str {
        "codex"
    }

    fn install_command(&self) -> &'static str {
        "npm install -g @openai/codex"
    }

    fn documentation_url(&self) -> &'static str {
        "https://developers.openai.com/codex/cli"
    }

    fn build_new_session_args(
        &self,
        task: &str,
        context_dirs: &[PathBuf],
        role: Option<&str>,
        reasoning_effort: &str,
    ) -> Vec<String> {
        let prompt = match role {
            Some(role) => format!("{role}\n\n{task}"),
            None => task.to_string(),
        };
        let mut args = vec!["exec".to_string(), "--json".to_string()];
        args.push("-c".to_string());
        args.push(format!("model_reasoning_effort={reasoning_effort}"));
        for dir in context_dirs {
            args.push("--cd".to_string());
            args.push(dir.to_string_lossy().to_string());
        }
        args.push(prompt);
        args
    }

    fn build_resume_args(
        &self,
        cli_session_id: &str,
        task: &str,
        reasoning_effort: &str,
    ) -> Vec<String> {
        vec![
            "exec".to_string(),
            "resume".to_string(),
            cli_session_id.to_string(),
            "--json".to_string(),
            "-c".to_string(),
            format!("model_reasoning_effort={reasoning_effort}"),
            task.to_string(),
        ]
    }

    fn parse_output(&self, stdout: &str) -> ParsedOutput {
        let mut session_id = None;
        let mut messages: Vec<String> = Vec::new();
        for line in stdout.lines() {
            let Ok(event) = serde_json::from_str::<Value>(line.trim()) else {
                continue;
            };
            match event["type"].as_str() {
                Some("thread.started") => {
                    session_id = event["thread_id"].as_str().map(String::from);
                }
                Some("item.completed") => {
                    if event["item"]["type"] == "agent_message" {
                        if let Some(text) = event["item"]["text"].as_str() {
                            messages.push(text.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        ParsedOutput {
            content: messages.join("\n"),
            session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_thread_and_agent_messages() {
        let stdout = concat!(
            r#"{"type":"thread.started","thread_id":"th_42"}"#,
            "\n",
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"first"}}"#,
            "\n",
            r#"{"type":"item.completed","item":{"type":"command_execution","command":"ls"}}"#,
            "\n",
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"second"}}"#,
            "\n",
        );
        let parsed = CodexPlugin.parse_output(stdout);
        assert_eq!(parsed.content, "first\nsecond");
        assert_eq!(parsed.session_id.as_deref(), Some("th_42"));
    }

    #[test]
    fn reasoning_effort_is_passed_as_config() {
        let args = CodexPlugin.build_new_session_args("t", &[], None, "high");
        assert!(args.contains(&"model_reasoning_effort=high".to_string()));
    }

    #[test]
    fn resume_args_use_exec_resume() {
        let args = CodexPlugin.build_resume_args("th_42", "continue", "medium");
        assert_eq!(&args[..3], &["exec", "resume", "th_42"]);
    }
}
