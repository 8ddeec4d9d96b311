use crate::adapters::base::{
    Adapter, AdapterParams, CallContext, GenerateResult, ToolDispatcher, check_response,
    retry_transient, send_cancellable,
};
use crate::adapters::capabilities::{AdapterCapabilities, model_capabilities};
use crate::errors::{ForceError, ForceResult};
use crate::session::{ApiFormat, HistoryItem, ResponsesItem, UnifiedSessionCache, dedup_tool_ids};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const API_URL: &str = "https://api.openai.com";
const CONNECT_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 600;
const MAX_TOOL_ROUNDS: usize = 16;
const BACKGROUND_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// OpenAI adapter speaking the Responses API, with `previous_response_id`
/// continuation and background mode for long-horizon models.
pub struct OpenAIAdapter {
    model: String,
    api_key: String,
    base_url: String,
    capabilities: AdapterCapabilities,
    sessions: UnifiedSessionCache,
    client: reqwest::Client,
}

impl OpenAIAdapter {
    pub fn new(model: &str, api_key: String, sessions: UnifiedSessionCache) -> ForceResult<Self> {
        Self::with_base_url(model, api_key, sessions, API_URL.to_string())
    }

    pub fn with_base_url(
        model: &str,
        api_key: String,
        sessions: UnifiedSessionCache,
        base_url: String,
    ) -> ForceResult<Self> {
        let capabilities = model_capabilities("openai", model)
            .ok_or_else(|| ForceError::NotFound(format!("unknown openai model: {model}")))?;
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

    fn item_to_wire(item: &HistoryItem) -> Option<Value> {
        match item {
            HistoryItem::Responses(r) => serde_json::to_value(r).ok(),
            HistoryItem::Chat(_) => None,
        }
    }

    fn build_payload(
        &self,
        input: &[Value],
        previous_response_id: Option<&str>,
        params: &AdapterParams,
        declarations: &[crate::adapters::base::ToolDeclaration],
    ) -> Value {
        let mut payload = json!({
            "model": self.model,
            "input": input,
        });
        if let Some(prev) = previous_response_id {
            payload["previous_response_id"] = json!(prev);
        }
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
                payload["reasoning"] = json!({"effort": effort});
            }
        }
        if self.capabilities.force_background {
            payload["background"] = json!(true);
        }
        if !declarations.is_empty() {
            let mut tools: Vec<Value> = declarations
                .iter()
                .map(|d| {
                    json!({
                        "type": "function",
                        "name": d.name,
                        "description": d.description,
                        "parameters": d.parameters,
                    })
                })
                .collect();
            // Native file search reads our vector stores directly.
            tools.extend(self.native_tools(params));
            payload["tools"] = json!(tools);
        } else {
            let native = self.native_tools(params);
            if !native.is_empty() {
                payload["tools"] = json!(native);
            }
        }
        if let Some(schema) = &params.structured_output {
            payload["text"] = json!({
                "format": {
                    "type": "json_schema",
                    "name": "structured_output",
                    "schema": schema,
                }
            });
        }
        payload
    }

    fn native_tools(&self, params: &AdapterParams) -> Vec<Value> {
        let mut tools = Vec::new();
        if let Some(ids) = params.kwargs.get("vector_store_ids").and_then(Value::as_array) {
            if self.capabilities.native_vector_store_provider.is_some() && !ids.is_empty() {
                tools.push(json!({"type": "file_search", "vector_store_ids": ids}));
            }
        }
        if self.capabilities.supports_web_search {
            tools.push(json!({"type": "web_search_preview"}));
        }
        tools
    }

    async fn post_and_settle(
        &self,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> ForceResult<Value> {
        let url = format!("{}/v1/responses", self.base_url);
        let mut body = retry_transient("openai", cancel, || {
            let req = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(payload)
                .send();
            async {
                let resp = send_cancellable(cancel, req, "openai").await?;
                check_response(resp, "openai").await
            }
        })
        .await?;

        // Background requests settle asynchronously; poll until terminal.
        loop {
            match body["status"].as_str() {
                Some("queued") | Some("in_progress") => {
                    let id = body["id"]
                        .as_str()
                        .ok_or_else(|| ForceError::Parse("openai: background response missing id".into()))?
                        .to_string();
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ForceError::Cancelled),
                        _ = tokio::time::sleep(BACKGROUND_POLL_INTERVAL) => {}
                    }
                    let poll_url = format!("{}/v1/responses/{id}", self.base_url);
                    body = retry_transient("openai-poll", cancel, || {
                        let req = self.client.get(&poll_url).bearer_auth(&self.api_key).send();
                        async {
                            let resp = send_cancellable(cancel, req, "openai").await?;
                            check_response(resp, "openai").await
                        }
                    })
                    .await?;
                }
                Some("failed") | Some("cancelled") => {
                    return Err(ForceError::BackendRejected(format!(
                        "openai response {}: {}",
                        body["status"].as_str().unwrap_or(""),
                        body["error"]
                    )));
                }
                _ => return Ok(body),
            }
        }
    }
}

struct Parsed {
    text: String,
    calls: Vec<(String, String, String)>,
    response_id: Option<String>,
    usage: Option<Value>,
}

fn parse_response(body: &Value) -> ForceResult<Parsed> {
    let output = body["output"]
        .as_array()
        .ok_or_else(|| ForceError::Parse("openai response missing output".into()))?;
    let mut text = String::new();
    let mut calls = Vec::new();
    for item in output {
        match item["type"].as_str() {
            Some("message") => {
                if let Some(parts) = item["content"].as_array() {
                    for part in parts {
                        if part["type"] == "output_text" {
                            text.push_str(part["text"].as_str().unwrap_or(""));
                        }
                    }
                }
            }
            Some("function_call") => {
                calls.push((
                    item["call_id"].as_str().unwrap_or("").to_string(),
                    item["name"].as_str().unwrap_or("").to_string(),
                    item["arguments"].as_str().unwrap_or("{}").to_string(),
                ));
            }
            _ => {}
        }
    }
    Ok(Parsed {
        text,
        calls,
        response_id: body["id"].as_str().map(String::from),
        usage: body.get("usage").cloned(),
    })
}

#[async_trait]
impl Adapter for OpenAIAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn display_name(&self) -> &str {
        "OpenAI"
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
        if matches!(format, Some(f) if f != ApiFormat::Responses) {
            return Err(ForceError::BackendRejected(format!(
                "session {} uses api_format={}, openai requires responses",
                ctx.session_id,
                format.expect("checked").as_str()
            )));
        }

        let mut history = self
            .sessions
            .get_history(&ctx.project, &ctx.tool, &ctx.session_id)
            .await?;
        dedup_tool_ids(&mut history);

        let previous_response_id = self
            .sessions
            .get_response_id(&ctx.project, &ctx.tool, &ctx.session_id)
            .await?;

        let declarations =
            dispatcher.get_tool_declarations(&self.capabilities, params.disable_history_search());

        let user_item = ResponsesItem::text("user", prompt);
        // With a continuation token the provider already has the prior turns;
        // without one the full history is replayed.
        let mut input: Vec<Value> = if previous_response_id.is_some() {
            vec![serde_json::to_value(&user_item).unwrap_or(Value::Null)]
        } else {
            let mut items: Vec<Value> =
                history.iter().filter_map(Self::item_to_wire).collect();
            items.push(serde_json::to_value(&user_item).unwrap_or(Value::Null));
            items
        };

        let mut new_items: Vec<HistoryItem> = vec![HistoryItem::Responses(user_item)];
        let mut prev_id = previous_response_id;
        let mut usage = None;

        for round in 0..MAX_TOOL_ROUNDS {
            let payload = self.build_payload(&input, prev_id.as_deref(), params, &declarations);
            let body = self.post_and_settle(&payload, cancel).await?;
            let parsed = parse_response(&body)?;
            usage = parsed.usage.or(usage);
            if parsed.response_id.is_some() {
                prev_id = parsed.response_id.clone();
            }

            if parsed.calls.is_empty() {
                new_items.push(HistoryItem::Responses(ResponsesItem::text(
                    "assistant",
                    parsed.text.clone(),
                )));
                let mut updated = history;
                updated.extend(new_items);
                self.sessions
                    .set_history(&ctx.project, &ctx.tool, &ctx.session_id, updated)
                    .await?;
                self.sessions
                    .set_api_format(&ctx.project, &ctx.tool, &ctx.session_id, ApiFormat::Responses)
                    .await?;
                if let Some(id) = &prev_id {
                    self.sessions
                        .set_response_id(&ctx.project, &ctx.tool, &ctx.session_id, id)
                        .await?;
                }
                return Ok(GenerateResult {
                    content: parsed.text,
                    response_id: prev_id,
                    usage,
                    ..Default::default()
                });
            }

            debug!("openai round {round}: {} function call(s)", parsed.calls.len());

            for (call_id, name, arguments) in &parsed.calls {
                new_items.push(HistoryItem::Responses(ResponsesItem::FunctionCall {
                    name: name.clone(),
                    arguments: arguments.clone(),
                    call_id: call_id.clone(),
                }));
            }

            if cancel.is_cancelled() {
                return Err(ForceError::Cancelled);
            }
            let results = join_all(
                parsed
                    .calls
                    .iter()
                    .map(|(_, name, args)| async move { dispatcher.execute(name, args, ctx).await }),
            )
            .await;

            // The continuation request carries only the outputs; the provider
            // pairs them with the calls via previous_response_id.
            input = Vec::new();
            for ((call_id, _, _), result) in parsed.calls.iter().zip(results) {
                new_items.push(HistoryItem::Responses(ResponsesItem::FunctionCallOutput {
                    call_id: call_id.clone(),
                    output: result.clone(),
                }));
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": result,
                }));
            }
        }

        Err(ForceError::BackendRejected(format!(
            "openai: no terminal message after {MAX_TOOL_ROUNDS} tool rounds"
        )))
    }
}
