//! History sanitization applied immediately before persistence.
//!
//! Base64 image payloads are replaced by short text placeholders that keep
//! the mime type (and original path when available). Without this, a single
//! vision turn can balloon a stored session by megabytes.

use serde_json::{Map, Value};
use tracing::debug;

use super::history::HistoryItem;

/// Recursion cap for nested structures (tool results, multi-part responses).
const MAX_DEPTH: usize = 10;
/// Minimum length for a raw `data` string to be considered an image payload.
const MIN_PAYLOAD_CHARS: usize = 1000;

fn placeholder(mime: &str, original_path: Option<&str>) -> Value {
    let text = match original_path {
        Some(path) if !path.is_empty() => {
            format!("[Image was provided: {mime}, source: {path}]")
        }
        _ => format!("[Image was provided: {mime}]"),
    };
    serde_json::json!({"type": "text", "text": text})
}

fn looks_like_base64(data: &str) -> bool {
    data.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '-' | '_' | '='))
}

/// Sanitize a single content item. Returns `None` when the item is untouched.
fn sanitize_content_item(item: &Value) -> Option<Value> {
    let obj = item.as_object()?;
    let item_type = obj.get("type").and_then(Value::as_str).unwrap_or("");

    // Anthropic shape: {"type": "image", "source": {"media_type": ..., "data": ...}}
    if item_type == "image" {
        let mime = obj
            .get("source")
            .and_then(Value::as_object)
            .and_then(|s| s.get("media_type"))
            .and_then(Value::as_str)
            .or_else(|| obj.get("mime_type").and_then(Value::as_str))
            .unwrap_or("image/unknown");
        let original_path = obj.get("original_path").and_then(Value::as_str);
        return Some(placeholder(mime, original_path));
    }

    // OpenAI shape: {"type": "image_url", "image_url": {"url": "data:..."}}
    if item_type == "image_url" {
        let url = obj
            .get("image_url")
            .and_then(Value::as_object)
            .and_then(|u| u.get("url"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if let Some(rest) = url.strip_prefix("data:") {
            let mime = rest.split(';').next().filter(|m| !m.is_empty());
            return Some(placeholder(mime.unwrap_or("image/unknown"), None));
        }
        // Plain URL references are small; keep them.
        return None;
    }

    // Gemini shape: {"inline_data": {"data": ..., "mime_type": ...}}
    if let Some(inline) = obj.get("inline_data").and_then(Value::as_object) {
        let mime = inline
            .get("mime_type")
            .and_then(Value::as_str)
            .unwrap_or("image/unknown");
        return Some(placeholder(mime, None));
    }

    // Raw base64 payloads carried in a bare "data" field.
    if let Some(data) = obj.get("data").and_then(Value::as_str) {
        if data.len() > MIN_PAYLOAD_CHARS && looks_like_base64(data) {
            let mime = obj
                .get("mime_type")
                .or_else(|| obj.get("media_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/unknown");
            return Some(placeholder(mime, None));
        }
    }

    None
}

fn sanitize_nested(value: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return value.clone();
    }
    match value {
        Value::Object(obj) => {
            if obj.contains_key("type")
                || obj.contains_key("inline_data")
                || (obj.contains_key("data") && obj.contains_key("mime_type"))
            {
                if let Some(replaced) = sanitize_content_item(value) {
                    return replaced;
                }
            }
            let mut out = Map::with_capacity(obj.len());
            for (k, v) in obj {
                out.insert(k.clone(), sanitize_nested(v, depth + 1));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| sanitize_nested(v, depth + 1)).collect())
        }
        other => other.clone(),
    }
}

/// Strip image payloads from a message list, returning a new list.
///
/// The input is never mutated, and the operation is idempotent: placeholders
/// are plain text items that no rule matches again.
pub fn strip_images_from_values(messages: &[Value]) -> Vec<Value> {
    let mut replaced = 0usize;
    let result = messages
        .iter()
        .map(|msg| {
            let Some(obj) = msg.as_object() else {
                return msg.clone();
            };
            let mut out = obj.clone();

            match out.get("content") {
                Some(Value::Array(parts)) => {
                    let sanitized: Vec<Value> = parts
                        .iter()
                        .map(|part| match sanitize_content_item(part) {
                            Some(v) => {
                                replaced += 1;
                                v
                            }
                            None => part.clone(),
                        })
                        .collect();
                    out.insert("content".into(), Value::Array(sanitized));
                }
                Some(content @ Value::Object(_)) => {
                    if let Some(v) = sanitize_content_item(content) {
                        replaced += 1;
                        out.insert("content".into(), v);
                    }
                }
                _ => {}
            }

            // Tool results and provider payloads can nest image parts.
            for key in ["output", "result", "response", "data"] {
                if let Some(v) = out.get(key) {
                    let sanitized = sanitize_nested(v, 0);
                    if &sanitized != v {
                        out.insert(key.into(), sanitized);
                    }
                }
            }

            Value::Object(out)
        })
        .collect();

    if replaced > 0 {
        debug!("Stripped {replaced} image payload(s) from history");
    }
    result
}

/// Typed convenience wrapper over [`strip_images_from_values`].
pub fn sanitize_history(items: &[HistoryItem]) -> Vec<HistoryItem> {
    let values: Vec<Value> = items
        .iter()
        .map(|i| serde_json::to_value(i).unwrap_or(Value::Null))
        .collect();
    strip_images_from_values(&values)
        .into_iter()
        .zip(items.iter())
        .map(|(v, original)| serde_json::from_value(v).unwrap_or_else(|_| original.clone()))
        .collect()
}
