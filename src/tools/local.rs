use crate::errors::{ForceError, ForceResult};
use crate::utils::fs::gather_file_paths;
use crate::utils::tokens::count_text_tokens;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const GUIDES_DIR: &str = ".mcp-the-force/guides";

/// Count tokens for the given files/directories using the same filtering as
/// the `context` parameter. Returns totals plus the top-N files and
/// directories by token count.
pub async fn count_project_tokens(items: Vec<PathBuf>, top_n: usize) -> ForceResult<Value> {
    if items.is_empty() {
        return Err(ForceError::InvalidParameter {
            param: "items".into(),
            message: "at least one file or directory path must be provided".into(),
        });
    }

    let report = tokio::task::spawn_blocking(move || {
        let files = gather_file_paths(&items, false);
        let mut total_tokens = 0usize;
        let mut per_file: Vec<(PathBuf, usize)> = Vec::new();
        let mut per_dir: HashMap<PathBuf, (usize, usize)> = HashMap::new();

        for path in files {
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let tokens = count_text_tokens(&content);
            total_tokens += tokens;
            // Aggregate into every ancestor directory.
            let mut dir = path.parent();
            while let Some(d) = dir {
                if d.as_os_str().is_empty() {
                    break;
                }
                let entry = per_dir.entry(d.to_path_buf()).or_insert((0, 0));
                entry.0 += tokens;
                entry.1 += 1;
                dir = d.parent();
            }
            per_file.push((path, tokens));
        }

        per_file.sort_by(|a, b| b.1.cmp(&a.1));
        let mut dirs: Vec<(PathBuf, usize, usize)> = per_dir
            .into_iter()
            .map(|(path, (tokens, count))| (path, tokens, count))
            .collect();
        dirs.sort_by(|a, b| b.1.cmp(&a.1));

        json!({
            "total_tokens": total_tokens,
            "total_files": per_file.len(),
            "largest_files": per_file
                .iter()
                .take(top_n)
                .map(|(p, t)| json!({"path": p.to_string_lossy(), "tokens": t}))
                .collect::<Vec<_>>(),
            "largest_directories": dirs
                .iter()
                .take(top_n)
                .map(|(p, t, c)| json!({
                    "path": p.to_string_lossy(),
                    "tokens": t,
                    "file_count": c
                }))
                .collect::<Vec<_>>(),
        })
    })
    .await
    .map_err(|e| ForceError::Internal(anyhow::anyhow!("token counting task failed: {e}")))?;

    Ok(report)
}

/// Operating instructions surfaced through the `get_instructions` tool.
pub fn get_instructions(tool_ids: &[String]) -> String {
    format!(
        "This gateway routes tool calls to AI models and CLI agents.\n\
         \n\
         Chat tools (chat_with_*) hold per-session conversation history; pass the\n\
         same session_id to continue a conversation. File context goes in the\n\
         `context` parameter; files that do not fit inline are searchable through\n\
         the file-search tool. Use work_with to delegate to an interactive CLI\n\
         agent and consult_with to ask an API model inside the same session.\n\
         Long-running calls can be wrapped with start_job / poll_job / cancel_job.\n\
         \n\
         Available tools:\n{}",
        tool_ids
            .iter()
            .map(|id| format!("  - {id}"))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

/// List guide documents under `<project>/.mcp-the-force/guides`.
pub fn list_force_guides(project_dir: &Path) -> ForceResult<Vec<String>> {
    let dir = project_dir.join(GUIDES_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = std::fs::read_dir(&dir)
        .map_err(|e| ForceError::Storage(format!("cannot read guides dir: {e}")))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| {
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("md") | Some("txt") => path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string()),
                _ => None,
            }
        })
        .collect();
    names.sort();
    Ok(names)
}

/// Read one guide document by name.
pub fn read_force_guide(project_dir: &Path, name: &str) -> ForceResult<String> {
    // Reject anything that could escape the guides directory.
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(ForceError::InvalidParameter {
            param: "name".into(),
            message: format!("invalid guide name: {name:?}"),
        });
    }
    let dir = project_dir.join(GUIDES_DIR);
    for ext in ["md", "txt"] {
        let path = dir.join(format!("{name}.{ext}"));
        if path.is_file() {
            return std::fs::read_to_string(&path)
                .map_err(|e| ForceError::Storage(format!("cannot read guide {name}: {e}")));
        }
    }
    Err(ForceError::NotFound(format!("guide '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_count_reports_totals_and_top_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "word ".repeat(400)).unwrap();
        std::fs::write(dir.path().join("small.txt"), "tiny").unwrap();

        let report = count_project_tokens(vec![dir.path().to_path_buf()], 10)
            .await
            .unwrap();
        assert_eq!(report["total_files"], 2);
        assert!(report["total_tokens"].as_u64().unwrap() > 0);
        let largest = report["largest_files"][0]["path"].as_str().unwrap();
        assert!(largest.ends_with("big.txt"));
        assert!(!report["largest_directories"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn token_count_requires_items() {
        let err = count_project_tokens(Vec::new(), 10).await.unwrap_err();
        assert_eq!(err.kind(), "invalid-parameter");
    }

    #[test]
    fn guides_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let guides = dir.path().join(GUIDES_DIR);
        std::fs::create_dir_all(&guides).unwrap();
        std::fs::write(guides.join("deploy.md"), "# Deploying\nrun the thing").unwrap();
        std::fs::write(guides.join("style.txt"), "tabs, never spaces").unwrap();
        std::fs::write(guides.join("ignore.bin"), [0u8]).unwrap();

        let names = list_force_guides(dir.path()).unwrap();
        assert_eq!(names, vec!["deploy", "style"]);
        let content = read_force_guide(dir.path(), "deploy").unwrap();
        assert!(content.contains("run the thing"));
    }

    #[test]
    fn guide_name_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_force_guide(dir.path(), "../secrets").is_err());
        assert!(read_force_guide(dir.path(), "a/b").is_err());
    }

    #[test]
    fn missing_guide_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_force_guide(dir.path(), "nope").unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }

    #[test]
    fn instructions_list_tools() {
        let text = get_instructions(&["chat_with_gpt52".into(), "work_with".into()]);
        assert!(text.contains("chat_with_gpt52"));
        assert!(text.contains("work_with"));
    }
}
