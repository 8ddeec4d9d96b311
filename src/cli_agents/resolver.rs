use crate::cli_agents::plugin::{CliPlugin, get_cli_plugin};
use crate::errors::{ForceError, ForceResult};
use tracing::warn;

/// Model name → CLI executable key. Several chat models per family share one
/// CLI.
const MODEL_CLI_TABLE: &[(&str, &str)] = &[
    ("claude-opus-4-5", "claude"),
    ("claude-sonnet-4-5", "claude"),
    ("claude-haiku-4-5", "claude"),
    ("gemini-3-pro", "gemini"),
    ("gemini-3-flash", "gemini"),
    ("gpt-5.2", "codex"),
    ("gpt-5.2-codex", "codex"),
];

/// Resolve a model name to its CLI key. Unknown models and models without a
/// CLI mapping are errors the caller surfaces directly.
pub fn resolve_model_to_cli(model: &str) -> ForceResult<&'static str> {
    MODEL_CLI_TABLE
        .iter()
        .find(|(m, _)| *m == model)
        .map(|(_, cli)| *cli)
        .ok_or_else(|| ForceError::NotFound(format!("no CLI mapping for model '{model}'")))
}

/// Check that a CLI is installed and resolvable on PATH; the error carries
/// install guidance.
pub fn ensure_cli_available(plugin: &dyn CliPlugin) -> ForceResult<()> {
    match which::which(plugin.executable()) {
        Ok(_) => Ok(()),
        Err(_) => {
            warn!("CLI not available: {}", plugin.executable());
            Err(ForceError::BackendUnavailable(format!(
                "{} is not installed or not in PATH.\nInstall with: {}\nDocumentation: {}",
                plugin.name(),
                plugin.install_command(),
                plugin.documentation_url()
            )))
        }
    }
}

/// Resolve model → plugin, verifying the CLI exists.
pub fn resolve_plugin(model: &str) -> ForceResult<&'static dyn CliPlugin> {
    let cli_name = resolve_model_to_cli(model)?;
    let plugin = get_cli_plugin(cli_name)
        .ok_or_else(|| ForceError::NotFound(format!("no CLI plugin registered for {cli_name}")))?;
    ensure_cli_available(plugin)?;
    Ok(plugin)
}
