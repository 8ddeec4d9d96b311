use std::path::PathBuf;

/// What a CLI plugin extracted from the subprocess's stdout.
#[derive(Debug, Clone, Default)]
pub struct ParsedOutput {
    pub content: String,
    /// Upstream CLI session id, when the CLI reported one. Stored so the
    /// next turn can resume.
    pub session_id: Option<String>,
}

/// Per-CLI glue: executable name, argument builders, and output parsing.
pub trait CliPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn executable(&self) -> &'static str;
    fn install_command(&self) -> &'static str;
    fn documentation_url(&self) -> &'static str;

    fn build_new_session_args(
        &self,
        task: &str,
        context_dirs: &[PathBuf],
        role: Option<&str>,
        reasoning_effort: &str,
    ) -> Vec<String>;

    fn build_resume_args(
        &self,
        cli_session_id: &str,
        task: &str,
        reasoning_effort: &str,
    ) -> Vec<String>;

    fn parse_output(&self, stdout: &str) -> ParsedOutput;

    /// Reasoning knobs injected as environment variables, for CLIs that
    /// take them that way.
    fn reasoning_env_vars(&self, _reasoning_effort: &str) -> Vec<(String, String)> {
        Vec::new()
    }
}

pub fn get_cli_plugin(name: &str) -> Option<&'static dyn CliPlugin> {
    match name {
        "claude" => Some(&super::claude::ClaudePlugin),
        "gemini" => Some(&super::gemini_cli::GeminiPlugin),
        "codex" => Some(&super::codex::CodexPlugin),
        _ => None,
    }
}
