use crate::adapters::base::{
    Adapter, AdapterParams, CallContext, GenerateResult, ToolDispatcher, check_response,
    retry_transient, send_cancellable,
};
use crate::adapters::capabilities::{AdapterCapabilities, model_capabilities};
use crate::errors::{ForceError, ForceResult};
use crate::session::{ApiFormat, ChatMessage, HistoryItem, UnifiedSessionCache};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const API_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 600;
const DEFAULT_MAX_TOKENS: usize = 8192;
/// Upper bound on model-turn iterations within one call.
const MAX_TOOL_ROUNDS: usize = 16;

pub struct AnthropicAdapter {
    model: String,
    api_key: String,
    base_url: String,
    capabilities: AdapterCapabilities,
    sessions: UnifiedSessionCache,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(
        model: &str,
        api_key: String,
        sessions: UnifiedSessionCache,
    ) -> ForceResult<Self> {
        Self::with_base_url(model, api_key, sessions, API_URL.to_string())
    }

    pub fn with_base_url(
        model: &str,
        api_key: String,
        sessions: UnifiedSessionCache,
        base_url: String,
    ) -> ForceResult<Self> {
        let capabilities = model_capabilities("anthropic", model)
            .ok_or_else(|| ForceError::NotFound(format!("unknown anthropic model: {model}")))?;
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

    /// Convert generic chat history plus the current prompt into the wire
    /// message array.
    fn build_messages(&self, history: &[HistoryItem], prompt: &str) -> Vec<Value> {
        let mut messages = Vec::new();
        for item in history {
            let Some(msg) = item.as_chat() else { continue };
            match msg.role.as_str() {
                "assistant" => {
                    let mut blocks = Vec::new();
                    if let Some(text) = msg.content_text() {
                        if !text.is_empty() {
                            blocks.push(json!({"type": "text", "text": text}));
                        }
                    }
                    if let Some(calls) = msg.tool_calls.as_ref().and_then(Value::as_array) {
                        for call in calls {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call["id"],
                                "name": call["name"],
                                "input": call["arguments"],
                            }));
                        }
                    }
                    if !blocks.is_empty() {
                        messages.push(json!({"role": "assistant", "content": blocks}));
                    }
                }
                "tool" => {
                    messages.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": msg.tool_call_id,
                            "content": msg.content,
                        }]
                    }));
                }
                _ => {
                    messages.push(json!({"role": "user", "content": msg.content}));
                }
            }
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
            "max_tokens": self.capabilities.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
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
            if let Some(budget) = effort.and_then(thinking_budget) {
                payload["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
            }
        }

        if !declarations.is_empty() {
            payload["tools"] = json!(
                declarations
                    .iter()
                    .map(|d| json!({
                        "name": d.name,
                        "description": d.description,
                        "input_schema": d.parameters,
                    }))
                    .collect::<Vec<_>>()
            );
        }

        // No native structured-output mode; pass the contract as a system
        // instruction.
        if let Some(schema) = &params.structured_output {
            payload["system"] = json!(format!(
                "Respond with JSON matching this schema exactly:\n{schema}"
            ));
        }

        payload
    }
}

fn thinking_budget(effort: &str) -> Option<u32> {
    match effort {
        "low" => Some(4_096),
        "medium" => Some(16_384),
        "high" | "xhigh" => Some(32_768),
        _ => None,
    }
}

/// Parsed response: text plus any tool-use blocks.
struct Parsed {
    text: String,
    tool_calls: Vec<(String, String, Value)>,
    usage: Option<Value>,
}

fn parse_response(body: &Value) -> ForceResult<Parsed> {
    let content = body["content"]
        .as_array()
        .ok_or_else(|| ForceError::Parse("anthropic response missing content".into()))?;
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in content {
        match block["type"].as_str() {
            Some("text") => {
                text.push_str(block["text"].as_str().unwrap_or(""));
            }
            Some("tool_use") => {
                tool_calls.push((
                    block["id"].as_str().unwrap_or("").to_string(),
                    block["name"].as_str().unwrap_or("").to_string(),
                    block["input"].clone(),
                ));
            }
            _ => {}
        }
    }
    Ok(Parsed {
        text,
        tool_calls,
        usage: body.get("usage").cloned(),
    })
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn display_name(&self) -> &str {
        "Anthropic Claude"
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
        // Sessions are tagged with their message shape; refuse to mix.
        let format = self
            .sessions
            .get_api_format(&ctx.project, &ctx.tool, &ctx.session_id)
            .await?;
        if matches!(format, Some(f) if f != ApiFormat::Chat) {
            return Err(ForceError::BackendRejected(format!(
                "session {} uses api_format={}, anthropic requires chat",
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
        // The turn's new items, persisted only on completion.
        let mut new_items: Vec<HistoryItem> = vec![HistoryItem::chat("user", prompt)];
        let mut usage = None;

        for round in 0..MAX_TOOL_ROUNDS {
            let payload = self.build_payload(&messages, params, &declarations);
            let url = format!("{}/v1/messages", self.base_url);
            let body = retry_transient("anthropic", cancel, || {
                let req = self
                    .client
                    .post(&url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", API_VERSION)
                    .json(&payload)
                    .send();
                async {
                    let resp = send_cancellable(cancel, req, "anthropic").await?;
                    check_response(resp, "anthropic").await
                }
            })
            .await?;

            let parsed = parse_response(&body)?;
            usage = parsed.usage.or(usage);

            if parsed.tool_calls.is_empty() {
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

            debug!(
                "anthropic round {round}: {} tool call(s)",
                parsed.tool_calls.len()
            );

            // Record the assistant turn with its tool calls.
            let calls_json: Vec<Value> = parsed
                .tool_calls
                .iter()
                .map(|(id, name, input)| json!({"id": id, "name": name, "arguments": input}))
                .collect();
            let mut assistant = ChatMessage::new("assistant", parsed.text.clone());
            assistant.tool_calls = Some(json!(calls_json));
            new_items.push(HistoryItem::Chat(assistant));

            // Assistant content blocks echoed back on the wire.
            let mut blocks = Vec::new();
            if !parsed.text.is_empty() {
                blocks.push(json!({"type": "text", "text": parsed.text}));
            }
            for (id, name, input) in &parsed.tool_calls {
                blocks.push(json!({"type": "tool_use", "id": id, "name": name, "input": input}));
            }
            messages.push(json!({"role": "assistant", "content": blocks}));

            // Anthropic executes tool calls sequentially; results are
            // appended in call order either way.
            for (id, name, input) in &parsed.tool_calls {
                if cancel.is_cancelled() {
                    return Err(ForceError::Cancelled);
                }
                let args = serde_json::to_string(input).unwrap_or_else(|_| "{}".into());
                let result = dispatcher.execute(name, &args, ctx).await;

                let mut tool_msg = ChatMessage::new("tool", result.clone());
                tool_msg.tool_call_id = Some(id.clone());
                new_items.push(HistoryItem::Chat(tool_msg));
                messages.push(json!({
                    "role": "user",
                    "content": [{"type": "tool_result", "tool_use_id": id, "content": result}]
                }));
            }
        }

        Err(ForceError::BackendRejected(format!(
            "anthropic: no terminal message after {MAX_TOOL_ROUNDS} tool rounds"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::base::ToolDeclaration;
    use crate::session::SessionDb;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct NoTools;

    #[async_trait]
    impl ToolDispatcher for NoTools {
        fn get_tool_declarations(
            &self,
            _capabilities: &AdapterCapabilities,
            _disable_history_search: bool,
        ) -> Vec<ToolDeclaration> {
            Vec::new()
        }

        async fn execute(&self, _name: &str, _args: &str, _ctx: &CallContext) -> String {
            "unused".into()
        }
    }

    struct EchoTool;

    #[async_trait]
    impl ToolDispatcher for EchoTool {
        fn get_tool_declarations(
            &self,
            _capabilities: &AdapterCapabilities,
            _disable_history_search: bool,
        ) -> Vec<ToolDeclaration> {
            vec![ToolDeclaration {
                name: "echo".into(),
                description: "echo args".into(),
                parameters: json!({"type": "object"}),
            }]
        }

        async fn execute(&self, name: &str, args: &str, _ctx: &CallContext) -> String {
            format!("{name}: {args}")
        }
    }

    fn sessions() -> UnifiedSessionCache {
        UnifiedSessionCache::new(SessionDb::open_in_memory(3600).unwrap())
    }

    fn ctx() -> CallContext {
        CallContext {
            project: "proj".into(),
            tool: "chat_with_claudeopus45".into(),
            session_id: "s1".into(),
            vector_store_ids: Vec::new(),
        }
    }

    fn adapter(uri: String, sessions: UnifiedSessionCache) -> AnthropicAdapter {
        AnthropicAdapter::with_base_url("claude-opus-4-5", "test_key".into(), sessions, uri)
            .unwrap()
    }

    #[tokio::test]
    async fn simple_generation_persists_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "Hello there"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 3}
            })))
            .mount(&server)
            .await;

        let sessions = sessions();
        let adapter = adapter(server.uri(), sessions.clone());
        let result = adapter
            .generate(
                "hi",
                &AdapterParams::default(),
                &ctx(),
                &NoTools,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.content, "Hello there");
        let history = sessions
            .get_history("proj", "chat_with_claudeopus45", "s1")
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role(), Some("user"));
        assert_eq!(history[1].role(), Some("assistant"));
        assert_eq!(
            sessions
                .get_api_format("proj", "chat_with_claudeopus45", "s1")
                .await
                .unwrap(),
            Some(ApiFormat::Chat)
        );
    }

    #[tokio::test]
    async fn tool_loop_executes_and_continues() {
        let server = MockServer::start().await;
        // First call returns a tool_use, second returns the final text.
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "tool_use", "id": "tu_1", "name": "echo", "input": {"q": "x"}}
                ],
                "stop_reason": "tool_use"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "final answer"}],
                "stop_reason": "end_turn"
            })))
            .mount(&server)
            .await;

        let sessions = sessions();
        let adapter = adapter(server.uri(), sessions.clone());
        let result = adapter
            .generate(
                "run the tool",
                &AdapterParams::default(),
                &ctx(),
                &EchoTool,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.content, "final answer");
        let history = sessions
            .get_history("proj", "chat_with_claudeopus45", "s1")
            .await
            .unwrap();
        // user, assistant(tool_calls), tool result, final assistant
        assert_eq!(history.len(), 4);
        let tool_msg = history[2].as_chat().unwrap();
        assert_eq!(tool_msg.role, "tool");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("tu_1"));
    }

    #[tokio::test]
    async fn responses_tagged_session_is_rejected() {
        let sessions = sessions();
        sessions
            .set_api_format("proj", "chat_with_claudeopus45", "s1", ApiFormat::Responses)
            .await
            .unwrap();
        let server = MockServer::start().await;
        let adapter = adapter(server.uri(), sessions);
        let err = adapter
            .generate(
                "hi",
                &AdapterParams::default(),
                &ctx(),
                &NoTools,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "backend-rejected");
    }

    #[tokio::test]
    async fn cancellation_leaves_no_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(30))
                    .set_body_json(json!({"content": [{"type": "text", "text": "late"}]})),
            )
            .mount(&server)
            .await;

        let sessions = sessions();
        let adapter = adapter(server.uri(), sessions.clone());
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel2.cancel();
        });

        let err = adapter
            .generate(
                "hi",
                &AdapterParams::default(),
                &ctx(),
                &NoTools,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ForceError::Cancelled));
        assert!(
            sessions
                .get_history("proj", "chat_with_claudeopus45", "s1")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn unknown_model_is_rejected() {
        let result = AnthropicAdapter::new("claude-1", "k".into(), sessions());
        assert!(result.is_err());
    }
}
