use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Which provider message layout a session's history uses. All items within
/// one session share the same shape; changing shape requires clearing or
/// rewriting the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFormat {
    Chat,
    Responses,
    OpenaiNative,
}

impl ApiFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiFormat::Chat => "chat",
            ApiFormat::Responses => "responses",
            ApiFormat::OpenaiNative => "openai_native",
        }
    }
}

impl fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(ApiFormat::Chat),
            "responses" => Ok(ApiFormat::Responses),
            "openai_native" => Ok(ApiFormat::OpenaiNative),
            other => Err(format!("unknown api format: {other}")),
        }
    }
}

/// One Chat Completions-shape message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    /// Gateway tool that produced this turn (`work_with`, `consult_with`,
    /// `chat_with_*`). Used for cross-tool handoff decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Value::String(content.into()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
            tool: None,
            metadata: None,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn content_text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

/// One Responses-shape item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesItem {
    Message { role: String, content: Vec<Value> },
    FunctionCall {
        name: String,
        arguments: String,
        call_id: String,
    },
    FunctionCallOutput { call_id: String, output: String },
}

impl ResponsesItem {
    /// Text message in the Responses layout. Non-assistant roles carry
    /// `input_text` parts, the assistant carries `output_text`.
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        let role = role.into();
        let part_type = if role == "assistant" {
            "output_text"
        } else {
            "input_text"
        };
        ResponsesItem::Message {
            role,
            content: vec![serde_json::json!({"type": part_type, "text": text.into()})],
        }
    }
}

/// A single history entry in whichever shape the adapter produced.
///
/// Serialization is untagged: Responses items are recognized by their `type`
/// tag, everything else with `role` + `content` is a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryItem {
    Responses(ResponsesItem),
    Chat(ChatMessage),
}

impl HistoryItem {
    pub fn chat(role: impl Into<String>, content: impl Into<String>) -> Self {
        HistoryItem::Chat(ChatMessage::new(role, content))
    }

    pub fn as_chat(&self) -> Option<&ChatMessage> {
        match self {
            HistoryItem::Chat(m) => Some(m),
            HistoryItem::Responses(_) => None,
        }
    }

    pub fn role(&self) -> Option<&str> {
        match self {
            HistoryItem::Chat(m) => Some(m.role.as_str()),
            HistoryItem::Responses(ResponsesItem::Message { role, .. }) => Some(role.as_str()),
            HistoryItem::Responses(_) => None,
        }
    }
}

/// Disambiguate duplicate tool-call ids in a Responses-shape history.
///
/// Duplicate `call_id`s are renamed sequentially (`X`, `X-dup2`, `X-dup3`, …)
/// on both the call and its paired output, with outputs paired to calls FIFO.
pub fn dedup_tool_ids(items: &mut [HistoryItem]) {
    let mut call_counts: HashMap<String, usize> = HashMap::new();
    let mut pending: HashMap<String, VecDeque<String>> = HashMap::new();

    for item in items.iter_mut() {
        match item {
            HistoryItem::Responses(ResponsesItem::FunctionCall { call_id, .. }) => {
                let count = call_counts.entry(call_id.clone()).or_insert(0);
                *count += 1;
                let assigned = if *count == 1 {
                    call_id.clone()
                } else {
                    format!("{call_id}-dup{count}")
                };
                pending
                    .entry(call_id.clone())
                    .or_default()
                    .push_back(assigned.clone());
                *call_id = assigned;
            }
            HistoryItem::Responses(ResponsesItem::FunctionCallOutput { call_id, .. }) => {
                if let Some(queue) = pending.get_mut(call_id.as_str()) {
                    if let Some(assigned) = queue.pop_front() {
                        *call_id = assigned;
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> HistoryItem {
        HistoryItem::Responses(ResponsesItem::FunctionCall {
            name: "search".into(),
            arguments: "{}".into(),
            call_id: id.into(),
        })
    }

    fn output(id: &str) -> HistoryItem {
        HistoryItem::Responses(ResponsesItem::FunctionCallOutput {
            call_id: id.into(),
            output: "ok".into(),
        })
    }

    fn ids(items: &[HistoryItem]) -> Vec<String> {
        items
            .iter()
            .map(|i| match i {
                HistoryItem::Responses(ResponsesItem::FunctionCall { call_id, .. })
                | HistoryItem::Responses(ResponsesItem::FunctionCallOutput { call_id, .. }) => {
                    call_id.clone()
                }
                _ => String::new(),
            })
            .collect()
    }

    #[test]
    fn dedup_interleaved_pairs() {
        let mut items = vec![call("X"), output("X"), call("X"), output("X")];
        dedup_tool_ids(&mut items);
        assert_eq!(ids(&items), vec!["X", "X", "X-dup2", "X-dup2"]);
    }

    #[test]
    fn dedup_batched_calls_pair_fifo() {
        let mut items = vec![call("X"), call("X"), call("X"), output("X"), output("X"), output("X")];
        dedup_tool_ids(&mut items);
        assert_eq!(
            ids(&items),
            vec!["X", "X-dup2", "X-dup3", "X", "X-dup2", "X-dup3"]
        );
    }

    #[test]
    fn dedup_leaves_unique_ids_alone() {
        let mut items = vec![call("A"), output("A"), call("B"), output("B")];
        dedup_tool_ids(&mut items);
        assert_eq!(ids(&items), vec!["A", "A", "B", "B"]);
    }

    #[test]
    fn chat_message_round_trips() {
        let item = HistoryItem::Chat(
            ChatMessage::new("assistant", "done")
                .with_tool("work_with")
                .with_metadata(json!({"cli_name": "claude"})),
        );
        let raw = serde_json::to_value(&item).unwrap();
        assert_eq!(raw["role"], "assistant");
        assert_eq!(raw["tool"], "work_with");
        let back: HistoryItem = serde_json::from_value(raw).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn responses_item_round_trips() {
        let item = HistoryItem::Responses(ResponsesItem::text("user", "hello"));
        let raw = serde_json::to_value(&item).unwrap();
        assert_eq!(raw["type"], "message");
        assert_eq!(raw["content"][0]["type"], "input_text");
        let back: HistoryItem = serde_json::from_value(raw).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn untagged_decode_prefers_responses_shape() {
        let raw = json!({
            "type": "function_call",
            "name": "lookup",
            "arguments": "{\"q\": 1}",
            "call_id": "c1"
        });
        let item: HistoryItem = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            item,
            HistoryItem::Responses(ResponsesItem::FunctionCall { .. })
        ));
    }

    #[test]
    fn api_format_parses() {
        assert_eq!(ApiFormat::from_str("chat").unwrap(), ApiFormat::Chat);
        assert_eq!(
            ApiFormat::from_str("responses").unwrap(),
            ApiFormat::Responses
        );
        assert!(ApiFormat::from_str("bogus").is_err());
    }
}
