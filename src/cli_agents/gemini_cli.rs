use crate::cli_agents::plugin::{CliPlugin, ParsedOutput};
use serde_json::Value;
use std::path::PathBuf;

/// Plugin for the Gemini CLI. Output in `--output-format json` mode is a
/// single JSON document with `response` and `sessionId`.
pub struct GeminiPlugin;

impl CliPlugin for GeminiPlugin {
    fn name(&self) -> &'static str {
        "Gemini CLI"
    }

    fn executable(&self) -> &'static str {
        "gemini"
    }

    fn install_command(&self) -> &'static str {
        "npm install -g @google/gemini-cli"
    }

    fn documentation_url(&self) -> &'static str {
        "https://ai.google.dev/gemini-api/docs/cli"
    }

    fn build_new_session_args(
        &self,
        task: &str,
        context_dirs: &[PathBuf],
        role: Option<&str>,
        _reasoning_effort: &str,
    ) -> Vec<String> {
        // Gemini has no system-prompt flag; the role is folded into the task.
        let prompt = match role {
            Some(role) => format!("{role}\n\n{task}"),
            None => task.to_string(),
        };
        let mut args = vec![
            "-p".to_string(),
            prompt,
            "--output-format".to_string(),
            "json".to_string(),
        ];
        if !context_dirs.is_empty() {
            args.push("--include-directories".to_string());
            args.push(
                context_dirs
                    .iter()
                    .map(|d| d.to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            );
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
            "--resume".to_string(),
            cli_session_id.to_string(),
            "-p".to_string(),
            task.to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ]
    }

    fn parse_output(&self, stdout: &str) -> ParsedOutput {
        if let Ok(doc) = serde_json::from_str::<Value>(stdout.trim()) {
            return ParsedOutput {
                content: doc["response"].as_str().unwrap_or("").to_string(),
                session_id: doc["sessionId"].as_str().map(String::from),
            };
        }
        // Some versions emit line-delimited events instead.
        let mut content = String::new();
        let mut session_id = None;
        for line in stdout.lines() {
            let Ok(event) = serde_json::from_str::<Value>(line.trim()) else {
                continue;
            };
            if let Some(text) = event["response"].as_str() {
                content.push_str(text);
            }
            if session_id.is_none() {
                session_id = event["sessionId"].as_str().map(String::from);
            }
        }
        ParsedOutput {
            content,
            session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_json_document() {
        let parsed = GeminiPlugin
            .parse_output(r#"{"response": "voila", "sessionId": "gs_9", "stats": {}}"#);
        assert_eq!(parsed.content, "voila");
        assert_eq!(parsed.session_id.as_deref(), Some("gs_9"));
    }

    #[test]
    fn role_is_folded_into_prompt() {
        let args = GeminiPlugin.build_new_session_args(
            "review this",
            &[],
            Some("act as a reviewer"),
            "medium",
        );
        assert!(args[1].starts_with("act as a reviewer"));
    }

    #[test]
    fn context_dirs_are_comma_joined() {
        let args = GeminiPlugin.build_new_session_args(
            "t",
            &[PathBuf::from("/a"), PathBuf::from("/b")],
            None,
            "medium",
        );
        let idx = args
            .iter()
            .position(|a| a == "--include-directories")
            .unwrap();
        assert_eq!(args[idx + 1], "/a,/b");
    }
}
