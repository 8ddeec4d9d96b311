use crate::context::ContextFile;
use serde_json::Value;
use std::fmt::Write as _;

const NOTICE: &str =
    "Note: additional project files are accessible via the file-search tool.";

/// Escape text for an XML element body.
fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Escape text for an XML attribute value.
fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Combine instructions, output format, and inline context into the
/// provider-neutral prompt.
///
/// Extra prompt-routed parameters not referenced by the template are appended
/// as `<name>value</name>` blocks. Inline files are wrapped in
/// `<file path="...">` elements; when some context overflowed to the vector
/// store, a one-line notice tells the model how to reach it.
pub fn build_prompt(
    prompt_params: &[(String, Value)],
    inline_files: &[ContextFile],
    has_overflow: bool,
) -> String {
    let get = |name: &str| {
        prompt_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| value_text(v))
            .unwrap_or_default()
    };

    let mut context = String::new();
    for file in inline_files {
        let _ = writeln!(
            context,
            "<file path=\"{}\">\n{}\n</file>",
            escape_attr(&file.path.to_string_lossy()),
            escape_text(&file.content)
        );
    }
    if has_overflow {
        context.push_str(NOTICE);
    }

    let mut prompt = format!(
        "<instructions>\n{}\n</instructions>\n\n<output_format>\n{}\n</output_format>\n\n<file_context>\n{}\n</file_context>",
        get("instructions"),
        get("output_format"),
        context.trim_end()
    );

    for (name, value) in prompt_params {
        if name == "instructions" || name == "output_format" || name == "context" {
            continue;
        }
        let _ = write!(
            prompt,
            "\n<{name}>{}</{name}>",
            escape_text(&value_text(value))
        );
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn params(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn template_sections_are_filled() {
        let prompt = build_prompt(
            &params(&[
                ("instructions", json!("summarize the repo")),
                ("output_format", json!("bullet points")),
            ]),
            &[],
            false,
        );
        assert!(prompt.contains("<instructions>\nsummarize the repo\n</instructions>"));
        assert!(prompt.contains("<output_format>\nbullet points\n</output_format>"));
        assert!(prompt.contains("<file_context>"));
        assert!(!prompt.contains("file-search tool"));
    }

    #[test]
    fn inline_files_are_wrapped_and_escaped() {
        let files = vec![ContextFile {
            path: PathBuf::from("/src/a<b>.rs"),
            content: "if a < b && b > c {}".into(),
            tokens: 8,
        }];
        let prompt = build_prompt(
            &params(&[("instructions", json!("x")), ("output_format", json!("y"))]),
            &files,
            false,
        );
        assert!(prompt.contains("<file path=\"/src/a&lt;b&gt;.rs\">"));
        assert!(prompt.contains("if a &lt; b &amp;&amp; b &gt; c {}"));
    }

    #[test]
    fn overflow_notice_is_appended() {
        let prompt = build_prompt(
            &params(&[("instructions", json!("x")), ("output_format", json!("y"))]),
            &[],
            true,
        );
        assert!(prompt.contains("file-search tool"));
    }

    #[test]
    fn extra_params_become_elements() {
        let prompt = build_prompt(
            &params(&[
                ("instructions", json!("x")),
                ("output_format", json!("y")),
                ("audience", json!("developers")),
                ("max_items", json!(5)),
            ]),
            &[],
            false,
        );
        assert!(prompt.contains("<audience>developers</audience>"));
        assert!(prompt.contains("<max_items>5</max_items>"));
    }
}
