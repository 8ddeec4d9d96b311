use crate::adapters::base::{
    Adapter, AdapterParams, CallContext, GenerateResult, ToolDispatcher, check_response,
    retry_transient, send_cancellable,
};
use crate::adapters::capabilities::{
    AdapterCapabilities, gemini_thinking_budget, model_capabilities,
};
use crate::errors::{ForceError, ForceResult};
use crate::session::{ApiFormat, ChatMessage, HistoryItem, UnifiedSessionCache};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const API_URL: &str = "https://generativelanguage.googleapis.com";
const CONNECT_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 600;
const MAX_TOOL_ROUNDS: usize = 16;

pub struct GeminiAdapter {
    model: String,
    api_key: String,
    base_url: String,
    capabilities: AdapterCapabilities,
    sessions: UnifiedSessionCache,
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(model: &str, api_key: String, sessions: UnifiedSessionCache) -> ForceResult<Self> {
        Self::with_base_url(model, api_key, sessions, API_URL.to_string())
    }

    pub fn with_base_url(
        model: &str,
        api_key: String,
        sessions: UnifiedSessionCache,
        base_url: String,
    ) -> ForceResult<Self> {
        let capabilities = model_capabilities("google", model)
            .ok_or_else(|| ForceError::NotFound(format!("unknown gemini model: {model}")))?;
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

    fn build_contents(&self, history: &[HistoryItem], prompt: &str) -> Vec<Value> {
        let mut contents = Vec::new();
        for item in history {
            let Some(msg) = item.as_chat() else { continue };
            match msg.role.as_str() {
                "assistant" => {
                    let mut parts = Vec::new();
                    if let Some(text) = msg.content_text() {
                        if !text.is_empty() {
                            parts.push(json!({"text": text}));
                        }
                    }
                    if let Some(calls) = msg.tool_calls.as_ref().and_then(Value::as_array) {
                        for call in calls {
                            parts.push(json!({
                                "functionCall": {"name": call["name"], "args": call["arguments"]}
                            }));
                        }
                    }
                    if !parts.is_empty() {
                        contents.push(json!({"role": "model", "parts": parts}));
                    }
                }
                "tool" => {
                    contents.push(json!({
                        "role": "user",
                        "parts": [{
                            "functionResponse": {
                                "name": msg.tool_call_id,
                                "response": {"content": msg.content},
                            }
                        }]
                    }));
                }
                _ => {
                    contents.push(json!({"role": "user", "parts": [{"text": msg.content}]}));
                }
            }
        }
        contents.push(json!({"role": "user", "parts": [{"text": prompt}]}));
        contents
    }

    fn build_payload(
        &self,
        contents: &[Value],
        params: &AdapterParams,
        declarations: &[crate::adapters::base::ToolDeclaration],
    ) -> Value {
        let mut generation_config = json!({});
        if self.capabilities.supports_temperature {
            if let Some(t) = params.temperature() {
                generation_config["temperature"] = json!(t);
            }
        }
        let effort = params
            .reasoning_effort()
            .or(self.capabilities.default_reasoning_effort);
        if self.capabilities.supports_reasoning_effort {
            if let Some(budget) = effort.and_then(gemini_thinking_budget) {
                generation_config["thinkingConfig"] = json!({"thinkingBudget": budget});
            }
        }
        if let Some(schema) = &params.structured_output {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = schema.clone();
        }

        let mut payload = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if !declarations.is_empty() {
            payload["tools"] = json!([{
                "functionDeclarations": declarations
                    .iter()
                    .map(|d| json!({
                        "name": d.name,
                        "description": d.description,
                        "parameters": d.parameters,
                    }))
                    .collect::<Vec<_>>()
            }]);
        }
        payload
    }
}

struct Parsed {
    text: String,
    // Gemini function calls carry no id; the name doubles as the pairing key.
    calls: Vec<(String, Value)>,
    usage: Option<Value>,
}

fn parse_response(body: &Value) -> ForceResult<Parsed> {
    let parts = body["candidates"]
        .as_array()
        .and_then(|c| c.first())
        .and_then(|c| c["content"]["parts"].as_array())
        .ok_or_else(|| ForceError::Parse("gemini response missing candidates".into()))?;
    let mut text = String::new();
    let mut calls = Vec::new();
    for part in parts {
        if let Some(t) = part["text"].as_str() {
            text.push_str(t);
        }
        if let Some(fc) = part.get("functionCall") {
            calls.push((
                fc["name"].as_str().unwrap_or("").to_string(),
                fc["args"].clone(),
            ));
        }
    }
    Ok(Parsed {
        text,
        calls,
        usage: body.get("usageMetadata").cloned(),
    })
}

#[async_trait]
impl Adapter for GeminiAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn display_name(&self) -> &str {
        "Google Gemini"
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
                "session {} uses api_format={}, gemini requires chat",
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

        let mut contents = self.build_contents(&history, prompt);
        let mut new_items: Vec<HistoryItem> = vec![HistoryItem::chat("user", prompt)];
        let mut usage = None;

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        for round in 0..MAX_TOOL_ROUNDS {
            let payload = self.build_payload(&contents, params, &declarations);
            let body = retry_transient("gemini", cancel, || {
                let req = self.client.post(&url).json(&payload).send();
                async {
                    let resp = send_cancellable(cancel, req, "gemini").await?;
                    check_response(resp, "gemini").await
                }
            })
            .await?;

            let parsed = parse_response(&body)?;
            usage = parsed.usage.or(usage);

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
                    usage,
                    ..Default::default()
                });
            }

            debug!("gemini round {round}: {} function call(s)", parsed.calls.len());

            let calls_json: Vec<Value> = parsed
                .calls
                .iter()
                .map(|(name, args)| json!({"id": name, "name": name, "arguments": args}))
                .collect();
            let mut assistant = ChatMessage::new("assistant", parsed.text.clone());
            assistant.tool_calls = Some(json!(calls_json));
            new_items.push(HistoryItem::Chat(assistant));

            let mut model_parts = Vec::new();
            if !parsed.text.is_empty() {
                model_parts.push(json!({"text": parsed.text}));
            }
            for (name, args) in &parsed.calls {
                model_parts.push(json!({"functionCall": {"name": name, "args": args}}));
            }
            contents.push(json!({"role": "model", "parts": model_parts}));

            // Fan out tool calls concurrently; results are appended in
            // call order.
            if cancel.is_cancelled() {
                return Err(ForceError::Cancelled);
            }
            let results = join_all(parsed.calls.iter().map(|(name, args)| {
                let args = serde_json::to_string(args).unwrap_or_else(|_| "{}".into());
                async move { dispatcher.execute(name, &args, ctx).await }
            }))
            .await;

            for ((name, _), result) in parsed.calls.iter().zip(results) {
                let mut tool_msg = ChatMessage::new("tool", result.clone());
                tool_msg.tool_call_id = Some(name.clone());
                new_items.push(HistoryItem::Chat(tool_msg));
                contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {"name": name, "response": {"content": result}}
                    }]
                }));
            }
        }

        Err(ForceError::BackendRejected(format!(
            "gemini: no terminal message after {MAX_TOOL_ROUNDS} tool rounds"
        )))
    }
}
