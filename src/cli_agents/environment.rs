use crate::config::ProviderKeys;
use std::collections::HashMap;
use std::path::Path;

/// Environment variables copied from the parent process into CLI children.
/// Everything else is dropped so credentials never leak by accident.
const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TZ",
    "TERM",
    "TMPDIR",
    "XDG_RUNTIME_DIR",
];

/// Build the child environment for a CLI agent: a minimal allowlist plus the
/// provider API key the CLI needs.
///
/// Claude's user config directory must NOT be linked into the child
/// environment; it makes the CLI detect a different "current project". The
/// API key goes in as a plain environment variable instead.
pub fn build_isolated_env(
    project_dir: &Path,
    cli_name: &str,
    keys: &ProviderKeys,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for var in ALLOWED_ENV_VARS {
        if let Ok(value) = std::env::var(var) {
            env.insert(var.to_string(), value);
        }
    }
    env.insert("PWD".to_string(), project_dir.to_string_lossy().to_string());

    let key = match cli_name {
        "claude" => keys.anthropic.as_ref().map(|k| ("ANTHROPIC_API_KEY", k)),
        "gemini" => keys.gemini.as_ref().map(|k| ("GEMINI_API_KEY", k)),
        "codex" => keys.openai.as_ref().map(|k| ("OPENAI_API_KEY", k)),
        _ => None,
    };
    if let Some((name, value)) = key {
        env.insert(name.to_string(), value.clone());
    }
    env
}
