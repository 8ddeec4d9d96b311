use crate::errors::{ForceError, ForceResult};
use crate::utils::tokens::count_text_tokens;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const OUTPUTS_DIR: &str = ".mcp-the-force/outputs";
/// Cleaned outputs beyond this many tokens are spilled to a file and
/// replaced by a summary.
pub const OUTPUT_TOKEN_THRESHOLD: usize = 8_000;

/// CLI output after JSONL → markdown conversion.
#[derive(Debug)]
pub struct CleanedOutput {
    pub markdown: String,
    pub tokens: usize,
    pub exceeds_threshold: bool,
}

fn ansi_escapes() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("static regex"))
}

fn event_text(event: &Value) -> Option<String> {
    for key in ["result", "response", "text"] {
        if let Some(text) = event[key].as_str() {
            return Some(text.to_string());
        }
    }
    if let Some(blocks) = event["message"]["content"].as_array() {
        let texts: Vec<&str> = blocks
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .collect();
        if !texts.is_empty() {
            return Some(texts.join("\n"));
        }
    }
    if event["item"]["type"] == "agent_message" {
        return event["item"]["text"].as_str().map(String::from);
    }
    None
}

/// Convert raw CLI output (often JSONL) into readable markdown and count its
/// tokens. Non-JSON lines pass through untouched; JSON events without any
/// recognizable text are dropped.
pub fn clean_output(raw: &str) -> CleanedOutput {
    let raw = ansi_escapes().replace_all(raw, "");
    let mut parts: Vec<String> = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(event) if event.is_object() => {
                if let Some(text) = event_text(&event) {
                    parts.push(text);
                }
            }
            _ => parts.push(line.to_string()),
        }
    }
    let markdown = parts.join("\n");
    let tokens = count_text_tokens(&markdown);
    CleanedOutput {
        exceeds_threshold: tokens > OUTPUT_TOKEN_THRESHOLD,
        markdown,
        tokens,
    }
}

/// Write a full CLI output under `<project>/.mcp-the-force/outputs/`.
pub fn save_output_file(
    project_dir: &Path,
    session_id: &str,
    markdown: &str,
) -> ForceResult<PathBuf> {
    let dir = project_dir.join(OUTPUTS_DIR);
    std::fs::create_dir_all(&dir)
        .map_err(|e| ForceError::Storage(format!("cannot create outputs dir: {e}")))?;
    let safe_session: String = session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let path = dir.join(format!(
        "{safe_session}-{}.md",
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::write(&path, markdown)
        .map_err(|e| ForceError::Storage(format!("cannot write output file: {e}")))?;
    Ok(path)
}

pub fn format_summary_with_link(summary: &str, output_file: &Path) -> String {
    format!(
        "{summary}\n\n---\nFull output saved to: {}",
        output_file.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_events_become_markdown() {
        let raw = concat!(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"step one"}]}}"#,
            "\n",
            r#"{"type":"tool_use","name":"bash"}"#,
            "\n",
            r#"{"type":"result","result":"final text"}"#,
            "\n",
            "plain non-json trailer\n",
        );
        let cleaned = clean_output(raw);
        assert_eq!(cleaned.markdown, "step one\nfinal text\nplain non-json trailer");
        assert!(!cleaned.exceeds_threshold);
    }

    #[test]
    fn ansi_escapes_are_stripped() {
        let raw = "\x1b[32mgreen text\x1b[0m plain";
        let cleaned = clean_output(raw);
        assert_eq!(cleaned.markdown, "green text plain");
    }

    #[test]
    fn large_output_exceeds_threshold() {
        let raw = "word ".repeat(OUTPUT_TOKEN_THRESHOLD * 2);
        let cleaned = clean_output(&raw);
        assert!(cleaned.exceeds_threshold);
        assert!(cleaned.tokens > OUTPUT_TOKEN_THRESHOLD);
    }

    #[test]
    fn output_file_lands_under_project() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_output_file(dir.path(), "sess/1", "# Full output").unwrap();
        assert!(path.starts_with(dir.path().join(OUTPUTS_DIR)));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("sess_1-"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Full output");
    }

    #[test]
    fn summary_link_format() {
        let text = format_summary_with_link("short version", Path::new("/p/out.md"));
        assert!(text.starts_with("short version"));
        assert!(text.contains("Full output saved to: /p/out.md"));
    }
}
