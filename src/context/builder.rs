use crate::context::stable_list::{StableListCache, stat_file};
use crate::errors::ForceResult;
use crate::utils::fs::gather_file_paths;
use crate::utils::tokens::{count_text_tokens, estimate_tokens_from_bytes};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// A file selected for the inline payload, with its content and precise
/// token count.
#[derive(Debug, Clone)]
pub struct ContextFile {
    pub path: PathBuf,
    pub content: String,
    pub tokens: usize,
}

/// The inline/overflow partition for one call.
#[derive(Debug, Clone, Default)]
pub struct BuiltContext {
    /// Files to send inline this turn (full set on the first turn, changed
    /// files only afterwards).
    pub inline_files: Vec<ContextFile>,
    /// Files routed to the vector store.
    pub overflow: Vec<PathBuf>,
}

/// Load file contents and tokenize precisely. Unreadable files are skipped
/// with a warning; BPE runs off the async loop.
async fn load_files(paths: Vec<PathBuf>) -> Vec<ContextFile> {
    tokio::task::spawn_blocking(move || {
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let tokens = count_text_tokens(&content);
                    out.push(ContextFile {
                        path,
                        content,
                        tokens,
                    });
                }
                Err(e) => warn!("Skipping unreadable file {}: {e}", path.display()),
            }
        }
        out
    })
    .await
    .unwrap_or_default()
}

/// Sort candidate files by fast-estimated tokens ascending, then path. This
/// puts more small files inline, maximizing the number of complete files the
/// model sees.
fn sort_for_stable_list(files: Vec<PathBuf>) -> Vec<(PathBuf, usize)> {
    let mut info: Vec<(PathBuf, usize)> = files
        .into_iter()
        .filter_map(|path| {
            let est = match stat_file(&path) {
                Some(s) => estimate_tokens_from_bytes(s.size),
                None => {
                    warn!("Skipping unstattable file {}", path.display());
                    return None;
                }
            };
            Some((path, est))
        })
        .collect();
    info.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    info
}

/// Build the inline/overflow partition for a tool call.
///
/// On the first call with overflow, the inline set is frozen as the session's
/// stable list. On subsequent calls only changed stable-list files are
/// re-sent; everything outside the list goes to the vector store. Attachments
/// always go to overflow and bypass the text safety heuristic.
pub async fn build_context_with_stable_list(
    context_paths: &[PathBuf],
    attachments: &[PathBuf],
    session_id: &str,
    cache: &StableListCache,
    token_budget: usize,
) -> ForceResult<BuiltContext> {
    let paths = context_paths.to_vec();
    let all_files =
        tokio::task::spawn_blocking(move || gather_file_paths(&paths, false))
            .await
            .unwrap_or_default();
    debug!("Gathered {} files from context paths", all_files.len());

    let mut built = match cache.get_stable_list(session_id).await? {
        None => first_call_split(all_files, session_id, cache, token_budget).await?,
        Some(stable) => resend_changed(all_files, stable, session_id, cache).await?,
    };

    if !attachments.is_empty() {
        let att = attachments.to_vec();
        let attachment_files =
            tokio::task::spawn_blocking(move || gather_file_paths(&att, true))
                .await
                .unwrap_or_default();
        info!(
            "Added {} attachment files to vector store",
            attachment_files.len()
        );
        built.overflow.extend(attachment_files);
    }

    Ok(built)
}

async fn first_call_split(
    all_files: Vec<PathBuf>,
    session_id: &str,
    cache: &StableListCache,
    token_budget: usize,
) -> ForceResult<BuiltContext> {
    info!("No stable list for session {session_id}, creating one");

    // First pass: size-based estimates decide the split without reading
    // anything from disk.
    let mut inline_paths: Vec<PathBuf> = Vec::new();
    let mut overflow: Vec<PathBuf> = Vec::new();
    let mut remaining = token_budget;
    for (path, est) in sort_for_stable_list(all_files) {
        if est <= remaining {
            remaining -= est;
            inline_paths.push(path);
        } else {
            overflow.push(path);
        }
    }

    // Second pass: load and precisely tokenize only the inline candidates,
    // then trim if the estimates were optimistic. Keeping in ascending token
    // order drops the largest offenders first.
    let mut file_data = load_files(inline_paths.clone()).await;
    file_data.sort_by_key(|f| f.tokens);
    let mut used = 0usize;
    let mut inline_files: Vec<ContextFile> = Vec::new();
    for file in file_data {
        if used + file.tokens <= token_budget {
            used += file.tokens;
            inline_files.push(file);
        } else {
            inline_paths.retain(|p| p != &file.path);
            overflow.push(file.path);
        }
    }

    if !overflow.is_empty() {
        cache.save_stable_list(session_id, &inline_paths).await?;
    } else {
        info!("All files fit inline, no stable list needed");
    }

    // Baseline for change detection, recorded whether or not a stable list
    // was created.
    let baseline: Vec<_> = inline_files
        .iter()
        .filter_map(|f| stat_file(&f.path).map(|info| (f.path.clone(), info)))
        .collect();
    cache.batch_update_sent_files(session_id, baseline).await?;

    Ok(BuiltContext {
        inline_files,
        overflow,
    })
}

async fn resend_changed(
    all_files: Vec<PathBuf>,
    stable: Vec<PathBuf>,
    session_id: &str,
    cache: &StableListCache,
) -> ForceResult<BuiltContext> {
    info!("Using existing stable list for session {session_id}");
    let stable_set: HashSet<&PathBuf> = stable.iter().collect();

    let mut changed: Vec<PathBuf> = Vec::new();
    let mut overflow: Vec<PathBuf> = Vec::new();
    for path in all_files {
        if stable_set.contains(&path) {
            if cache.file_changed_since_last_send(session_id, &path).await? {
                changed.push(path);
            }
            // Unchanged stable files are skipped: the model already has them.
        } else {
            overflow.push(path);
        }
    }

    let inline_files = load_files(changed).await;
    let baseline: Vec<_> = inline_files
        .iter()
        .filter_map(|f| stat_file(&f.path).map(|info| (f.path.clone(), info)))
        .collect();
    cache.batch_update_sent_files(session_id, baseline).await?;

    info!("Sending {} changed files inline", inline_files.len());
    Ok(BuiltContext {
        inline_files,
        overflow,
    })
}
