use std::collections::HashSet;
use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Max characters handed to the BPE encoder; larger inputs fall back to the
/// fast estimate (the encoder degrades badly on huge inputs).
pub const TOKEN_ENCODE_CHAR_CAP: usize = 250_000;
/// Inputs shorter than this never trigger the pathological-content guard.
const PATHOLOGICAL_MIN_CHARS: usize = 10_000;
/// Distinct-char ratio below which content is considered pathological.
const PATHOLOGICAL_THRESHOLD: f64 = 0.15;

fn encoder() -> Option<&'static CoreBPE> {
    static ENC: OnceLock<Option<CoreBPE>> = OnceLock::new();
    ENC.get_or_init(|| match tiktoken_rs::cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            warn!("Failed to load cl100k_base encoder, using estimates: {e}");
            None
        }
    })
    .as_ref()
}

/// Fast token estimate from a byte count. Conservative ~2 bytes per token to
/// account for dense code.
pub fn estimate_tokens_from_bytes(size_bytes: u64) -> usize {
    std::cmp::max(1, (size_bytes / 2) as usize)
}

/// Fast token estimate from text, ~4 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    std::cmp::max(1, text.chars().count() / 4)
}

/// Detect low-entropy content that makes BPE encoding pathologically slow.
pub fn looks_pathological(text: &str) -> bool {
    let len = text.chars().count();
    if len < PATHOLOGICAL_MIN_CHARS {
        return false;
    }
    let distinct: HashSet<char> = text.chars().collect();
    (distinct.len() as f64) / (len as f64) < PATHOLOGICAL_THRESHOLD
}

/// Count tokens precisely where safe, falling back to the fast estimate for
/// oversized or highly repetitive inputs.
pub fn count_tokens(texts: &[&str]) -> usize {
    let Some(bpe) = encoder() else {
        return texts.iter().map(|t| estimate_tokens(t)).sum();
    };

    let mut total = 0;
    for text in texts {
        if text.len() > TOKEN_ENCODE_CHAR_CAP || looks_pathological(text) {
            debug!(
                "Using estimate for large/repetitive content ({} chars)",
                text.len()
            );
            total += estimate_tokens(text);
        } else {
            total += bpe.encode_ordinary(text).len();
        }
    }
    total
}

/// Count tokens for one string.
pub fn count_text_tokens(text: &str) -> usize {
    count_tokens(&[text])
}

/// Off-loop token counting for large payloads. BPE encoding is CPU-bound, so
/// callers on latency-sensitive paths go through here.
pub async fn count_tokens_off_thread(texts: Vec<String>) -> usize {
    tokio::task::spawn_blocking(move || {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        count_tokens(&refs)
    })
    .await
    .unwrap_or_else(|e| {
        warn!("Token counting task failed: {e}");
        0
    })
}
