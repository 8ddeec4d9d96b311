use crate::adapters::base::{
    Adapter, AdapterParams, CallContext, GenerateResult, ToolDispatcher, check_response,
    retry_transient, send_cancellable,
};
use crate::adapters::capabilities::{AdapterCapabilities, model_capabilities};
use crate::errors::{ForceError, ForceResult};
use crate::session::{ApiFormat, ChatMessage, HistoryItem, UnifiedSessionCache};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const API_URL: &str = "https://api.x.ai";
const CONNECT_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 600;
const MAX_TOOL_ROUNDS: usize = 16;

/// Grok adapter: OpenAI-compatible chat completions plus Live Search.
pub struct GrokAdapter {
    model: String,
    api_key: String,
    base_url: String,
    capabilities: AdapterCapabilities,
    sessions: UnifiedSessionCache,
    client: reqwest::Client,
}

impl GrokAdapter {
    pub fn new(model: &str, api_key: String, sessions: UnifiedSessionCache) -> ForceResult<Self> {
        Self::with_base_url(model, api_key, sessions, API_URL.to_string())
    }

    pub fn with_base_url(
        model: &str,
        api_key: String,
        sessions: UnifiedSessionCache,
        base_url: String,
    ) -> ForceResult<Self> {
        let capabilities = model_capabilities("xai", model)
            .ok_or_else(|| ForceError::NotFound(format!("unknown grok model: {model}")))?;
        Ok(Self {
            model: model.to_string(),
            api_key,
            base_url,
            capabilities,
            sessions,
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        })
    }

    fn build_messages(&self, history: &[HistoryItem], prompt: &str) -> Vec<Value> {
        let mut messages = Vec::new();
        for item in history {
            let Some(msg) = item.as_chat() else { continue };
            let mut m = json!({"role": msg.role, "content": msg.content});
            if let Some(calls) = &msg.tool_calls {
                m["tool_calls"] = json!(
                    calls
                        .as_array()
                        .map(|arr| arr
                            .iter()
                            .map(|c| json!({
                                "id": c["id"],
                                "type": "function",
                                "function": {
                                    "name": c["name"],
                                    "arguments": serde_json::to_string(&c["arguments"])
                                        .unwrap_or_default(),
                                }
                            }))
                            .collect::<Vec<_>>())
                        .unwrap_or_default()
                );
            }
            if let Some(id) = &msg.tool_call_id {
                m["tool_call_id"] = json!(id);
            }
            messages.push(m);
        }
        messages.push(json!({"role": "user", "content": prompt}));
        messages
    }

    fn build_payload(
        &self,
        messages: &[Value],
        params: &AdapterParams,
        declarations: &[crate::adapters::base::ToolDeclaration],
    ) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });
        if self.capabilities.supports_temperature {
            if let Some(t) = params.temperature() {
                payload["temperature"] = json!(t);
            }
        }
        let effort = params
            .reasoning_effort()
            .or(self.capabilities.default_reasoning_effort);
        if self.capabilities.supports_reasoning_effort {
            if let Some(effort) = effort {
                payload["reasoning_effort"] = json!(effort);
            }
        }
        if self.capabilities.supports_live_search {
            let mode = params
                .kwargs
                .get("search_mode")
                .and_then(Value::as_str)
                .unwrap_or("auto");
            if mode != "off" {
                payload["search_parameters"] = json!({
                    "mode": mode,
                    "return_citations": params
                        .kwargs
                        .get("return_citations")
                        .and_then(Value::as_bool)
                        .unwrap_or(true),
                });
            }
        }
        if !declarations.is_empty() {
            payload["tools"] = json!(
                declarations
                    .iter()
                    .map(|d| json!({
                        "type": "function",
                        "function": {
                            "name": d.name,
                            "description": d.description,
                            "parameters": d.parameters,
                        }
                    }))
                    .collect::<Vec<_>>()
            );
        }
        if let Some(schema) = &params.structured_output {
            payload["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {"name": "structured_output", "schema": schema},
            });
        }
        payload
    }
}

struct Parsed {
    text: String,
    calls: Vec<(String, String, Value)>,
    citations: Vec<String>,
    usage: Option<Value>,
}

fn parse_response(body: &Value) -> ForceResult<Parsed> {
    let message = body["choices"]
        .as_array()
        .and_then(|c| c.first())
        .map(|c| &c["message"])
        .ok_or_else(|| ForceError::Parse("grok response missing choices".into()))?;
    let text = message["content"].as_str().unwrap_or("").to_string();
    let mut calls = Vec::new();
    if let Some(tool_calls) = message["tool_calls"].as_array() {
        for tc in tool_calls {
            let args = tc["function"]["arguments"]
                .as_str()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_else(|| json!({}));
            calls.push((
                tc["id"].as_str().unwrap_or("").to_string(),
                tc["function"]["name"].as_str().unwrap_or("").to_string(),
                args,
            ));
        }
    }
    let citations = body["citations"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|c| c.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    Ok(Parsed {
        text,
        calls,
        citations,
        usage: body.get("usage").cloned(),
    })
}

#[async_trait]
impl Adapter for GrokAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn display_name(&self) -> &str {
        "xAI Grok"
    }

    fn capabilities(&self) -> &AdapterCapabilities {
        &self.capabilities
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &AdapterParams,
        ctx: &CallContext,
        dispatcher: &dyn ToolDispatcher,
        cancel: &CancellationToken,
    ) -> ForceResult<GenerateResult> {
        let format = self
            .sessions
            .get_api_format(&ctx.project, &ctx.tool, &ctx.session_id)
            .await?;
        if matches!(format, Some(f) if f != ApiFormat::Chat) {
            return Err(ForceError::BackendRejected(format!(
                "session {} uses api_format={}, grok requires chat",
                ctx.session_id,
                format.expect("checked").as_str()
            )));
        }

        let history = self
            .sessions
            .get_history(&ctx.project, &ctx.tool, &ctx.session_id)
            .await?;
        let declarations =
            dispatcher.get_tool_declarations(&self.capabilities, params.disable_history_search());

        let mut messages = self.build_messages(&history, prompt);
        let mut new_items: Vec<HistoryItem> = vec![HistoryItem::chat("user", prompt)];
        let mut citations: Vec<String> = Vec::new();
        let mut usage = None;
        let url = format!("{}/v1/chat/completions", self.base_url);

        for round in 0..MAX_TOOL_ROUNDS {
            let payload = self.build_payload(&messages, params, &declarations);
            let body = retry_transient("grok", cancel, || {
                let req = self
                    .client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&payload)
                    .send();
                async {
                    let resp = send_cancellable(cancel, req, "grok").await?;
                    check_response(resp, "grok").await
                }
            })
            .await?;

            let parsed = parse_response(&body)?;
            usage = parsed.usage.or(usage);
            citations.extend(parsed.citations);

            if parsed.calls.is_empty() {
                new_items.push(HistoryItem::chat("assistant", parsed.text.clone()));
                let mut updated = history;
                updated.extend(new_items);
                self.sessions
                    .set_history(&ctx.project, &ctx.tool, &ctx.session_id, updated)
                    .await?;
                self.sessions
                    .set_api_format(&ctx.project, &ctx.tool, &ctx.session_id, ApiFormat::Chat)
                    .await?;
                return Ok(GenerateResult {
                    content: parsed.text,
                    citations,
                    usage,
                    ..Default::default()
                });
            }

            debug!("grok round {round}: {} tool call(s)", parsed.calls.len());

            let calls_json: Vec<Value> = parsed
                .calls
                .iter()
                .map(|(id, name, args)| json!({"id": id, "name": name, "arguments": args}))
                .collect();
            let mut assistant = ChatMessage::new("assistant", parsed.text.clone());
            assistant.tool_calls = Some(json!(calls_json));
            new_items.push(HistoryItem::Chat(assistant));

            messages.push(json!({
                "role": "assistant",
                "content": parsed.text,
                "tool_calls": parsed.calls.iter().map(|(id, name, args)| json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": serde_json::to_string(args).unwrap_or_default(),
                    }
                })).collect::<Vec<_>>(),
            }));

            if cancel.is_cancelled() {
                return Err(ForceError::Cancelled);
            }
            let results = join_all(parsed.calls.iter().map(|(_, name, args)| {
                let args = serde_json::to_string(args).unwrap_or_else(|_| "{}".into());
                async move { dispatcher.execute(name, &args, ctx).await }
            }))
            .await;

            for ((id, _, _), result) in parsed.calls.iter().zip(results) {
                let mut tool_msg = ChatMessage::new("tool", result.clone());
                tool_msg.tool_call_id = Some(id.clone());
                new_items.push(HistoryItem::Chat(tool_msg));
                messages.push(json!({
                    "role": "tool",
                    "content": result,
                    "tool_call_id": id,
                }));
            }
        }

        Err(ForceError::BackendRejected(format!(
            "grok: no terminal message after {MAX_TOOL_ROUNDS} tool rounds"
        )))
    }
}
