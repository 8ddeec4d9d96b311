use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

fn default_session_ttl() -> u64 {
    // 7 days
    7 * 24 * 3600
}

fn default_cleanup_probability() -> f64 {
    0.01
}

fn default_context_percentage() -> f64 {
    0.85
}

fn default_timeout() -> u64 {
    300
}

/// Provider credentials. Values come from the config file or from
/// `OPENAI_API_KEY`-style environment variables; env wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderKeys {
    #[serde(default)]
    pub openai: Option<String>,
    #[serde(default)]
    pub anthropic: Option<String>,
    #[serde(default)]
    pub gemini: Option<String>,
    #[serde(default)]
    pub xai: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the embedded database file. Defaults to
    /// `<data_dir>/mcp-the-force/sessions.sqlite3`.
    #[serde(default)]
    pub session_db_path: Option<PathBuf>,

    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,

    /// Probability that a write triggers a sweep of expired rows.
    #[serde(default = "default_cleanup_probability")]
    pub session_cleanup_probability: f64,

    /// Fraction of a model's context window available to inline file context.
    #[serde(default = "default_context_percentage")]
    pub context_percentage: f64,

    /// Default per-tool timeout in seconds when a blueprint does not set one.
    #[serde(default = "default_timeout")]
    pub default_timeout_seconds: u64,

    /// Project directory the gateway operates on. The session `project` key
    /// is derived from its basename.
    #[serde(default)]
    pub project_dir: Option<PathBuf>,

    /// Route every adapter call to the deterministic mock adapter instead of
    /// the network. Used by end-to-end tests.
    #[serde(default)]
    pub adapter_mock: bool,

    #[serde(default)]
    pub providers: ProviderKeys,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            session_db_path: None,
            session_ttl_seconds: default_session_ttl(),
            session_cleanup_probability: default_cleanup_probability(),
            context_percentage: default_context_percentage(),
            default_timeout_seconds: default_timeout(),
            project_dir: None,
            adapter_mock: false,
            providers: ProviderKeys::default(),
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file, then apply environment
    /// overrides. A missing file yields defaults rather than an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file: {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file: {}", p.display()))?
            }
            _ => Settings::default(),
        };
        settings.apply_env();
        debug!(
            "Loaded settings (ttl={}s, mock={})",
            settings.session_ttl_seconds, settings.adapter_mock
        );
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.providers.openai = Some(v);
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            self.providers.anthropic = Some(v);
        }
        if let Ok(v) = std::env::var("GEMINI_API_KEY") {
            self.providers.gemini = Some(v);
        }
        if let Ok(v) = std::env::var("XAI_API_KEY") {
            self.providers.xai = Some(v);
        }
        if let Ok(v) = std::env::var("THE_FORCE_SESSION_DB") {
            self.session_db_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("THE_FORCE_ADAPTER_MOCK") {
            self.adapter_mock = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }

    /// Resolved database path, creating the parent directory's default
    /// location lazily when unset.
    pub fn db_path(&self) -> PathBuf {
        if let Some(ref p) = self.session_db_path {
            return p.clone();
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mcp-the-force")
            .join("sessions.sqlite3")
    }

    /// Project directory, falling back to the current working directory.
    pub fn project_dir(&self) -> PathBuf {
        self.project_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Session `project` key: basename of the project directory.
    pub fn project_name(&self) -> String {
        self.project_dir()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "default".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.session_ttl_seconds, 7 * 24 * 3600);
        assert!(s.session_cleanup_probability > 0.0);
        assert!(s.context_percentage > 0.5 && s.context_percentage < 1.0);
        assert!(!s.adapter_mock);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let s = Settings::load(Some(Path::new("/nonexistent/the-force.toml"))).unwrap();
        assert_eq!(s.default_timeout_seconds, 300);
    }

    #[test]
    fn parse_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
session_ttl_seconds = 3600
adapter_mock = true

[providers]
openai = "sk-test"
"#,
        )
        .unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.session_ttl_seconds, 3600);
        assert!(s.adapter_mock);
    }

    #[test]
    fn project_name_is_basename() {
        let s = Settings {
            project_dir: Some(PathBuf::from("/home/user/myproject")),
            ..Default::default()
        };
        assert_eq!(s.project_name(), "myproject");
    }
}
