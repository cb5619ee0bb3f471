//! The chat-completion client: request/response types, the [`LlmClient`]
//! trait, and the OpenAI-compatible HTTP adapter.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use vox_domain::error::{Error, Result};
use vox_domain::message::{Message, Role};
use vox_domain::stream::{BoxStream, StreamEvent, Usage};
use vox_domain::tool::ToolCall;

use crate::compat;
use crate::sse::{sse_event_stream, SseParser};

/// Metadata key under which an assistant [`Message`] carries the wire-shape
/// tool calls it issued. The request builder re-emits them so follow-up
/// turns can reference tool results.
pub const TOOL_CALLS_METADATA_KEY: &str = "tool_calls";

/// How many bytes of an upstream error body to keep in the error message.
const ERROR_BODY_PREFIX: usize = 300;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChoice {
    /// Let the model decide (`"auto"`).
    #[default]
    Auto,
    /// Forbid tool use (`"none"`).
    None,
}

impl ToolChoice {
    fn as_wire(&self) -> &'static str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Dropped on the wire for families that refuse it.
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// OpenAI function-calling tool schemas. Empty ⇒ no `tools` field.
    pub tools: Vec<Value>,
    pub tool_choice: ToolChoice,
}

/// The aggregate of a completion: text content and/or tool calls.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub model: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Chat-completion client boundary.
///
/// No retry policy lives here; retries are the orchestrator's call.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Blocking completion: wait for the full response.
    async fn complete(&self, req: &ChatRequest) -> Result<ChatOutcome>;

    /// Streaming completion. Dropping the stream closes the upstream read.
    async fn stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OpenAI-compatible adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    request_timeout: Duration,
    /// Retry a blocking call once on a transient failure. Off by
    /// default; streaming never retries.
    retry_transient: bool,
}

impl OpenAiCompatClient {
    pub fn new(base_url: &str, api_key: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("building HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            request_timeout,
            retry_transient: false,
        })
    }

    pub fn with_transient_retry(mut self, enabled: bool) -> Self {
        self.retry_transient = enabled;
        self
    }

    fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();
        let rules = compat::rules_for(&req.model);

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "stream": stream,
        });

        if let Some(temp) = req.temperature {
            if rules.supports_temperature {
                body["temperature"] = serde_json::json!(temp);
            }
        }
        if let Some(max) = req.max_tokens {
            body[rules.max_tokens_param] = serde_json::json!(max);
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.clone());
            body["tool_choice"] = Value::String(req.tool_choice.as_wire().into());
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

impl OpenAiCompatClient {
    async fn complete_once(&self, req: &ChatRequest) -> Result<ChatOutcome> {
        let url = self.chat_url();
        let body = self.build_chat_body(req, false);

        tracing::debug!(model = %req.model, url = %url, "chat completion request");

        let resp = self
            .authed_post(&url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(map_reqwest_err)?;

        if !status.is_success() {
            return Err(upstream_error(status.as_u16(), &resp_text));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&resp_json)
    }
}

/// Whether a failed first attempt earns a second one.
fn should_retry(error: &Error, retry_enabled: bool) -> bool {
    retry_enabled && matches!(error, Error::Transient(_) | Error::Timeout(_))
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatOutcome> {
        match self.complete_once(req).await {
            Err(e) if should_retry(&e, self.retry_transient) => {
                tracing::info!(error = %e, "transient completion failure, retrying once");
                self.complete_once(req).await
            }
            outcome => outcome,
        }
    }

    async fn stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = self.chat_url();
        let body = self.build_chat_body(req, true);

        tracing::debug!(model = %req.model, url = %url, "chat stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(map_reqwest_err)?;
            return Err(upstream_error(status.as_u16(), &err_text));
        }

        Ok(sse_event_stream(resp, ChunkParser::default()))
    }
}

fn map_reqwest_err(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("LLM request: {e}"))
    } else {
        Error::Transient(format!("LLM request: {e}"))
    }
}

fn upstream_error(status: u16, body: &str) -> Error {
    let mut prefix = body.trim().to_string();
    if prefix.len() > ERROR_BODY_PREFIX {
        let mut end = ERROR_BODY_PREFIX;
        while !prefix.is_char_boundary(end) {
            end -= 1;
        }
        prefix.truncate(end);
    }
    Error::Upstream { status, message: prefix }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content,
        }),
        Role::Assistant => {
            let mut obj = serde_json::json!({
                "role": "assistant",
                "content": if msg.content.is_empty() { Value::Null } else { Value::String(msg.content.clone()) },
            });
            // An assistant message that issued tool calls re-emits them.
            if let Some(calls) = msg.metadata.get(TOOL_CALLS_METADATA_KEY) {
                obj["tool_calls"] = calls.clone();
            }
            obj
        }
        _ => serde_json::json!({
            "role": msg.role.as_str(),
            "content": msg.content,
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blocking-path response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(body: &Value) -> Result<ChatOutcome> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Upstream {
            status: 200,
            message: "no choices in completion response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Upstream {
        status: 200,
        message: "no message in completion choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let tool_calls = parse_wire_tool_calls(message);
    let usage = body.get("usage").and_then(parse_wire_usage);

    Ok(ChatOutcome {
        content,
        tool_calls,
        usage,
        model,
    })
}

fn parse_wire_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall::with_id(call_id, tool_name, arguments))
        })
        .collect()
}

fn parse_wire_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming-path chunk parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-index assembly buffer for a fragmented tool call.
#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    args_buf: String,
}

/// Interprets streamed chat-completion chunks.
///
/// The server may fragment a tool call across frames: `id` + partial
/// `function.name` in one, `function.arguments` pieces in later ones, all
/// correlated by `index`. Fragments accumulate per index and a single
/// consolidated [`StreamEvent::ToolCalls`] is emitted when the stream
/// terminates naturally (finish chunk, `[DONE]`, or body close).
#[derive(Default)]
pub(crate) struct ChunkParser {
    partials: BTreeMap<u64, PartialCall>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    tool_calls_emitted: bool,
    done_emitted: bool,
}

impl ChunkParser {
    fn consolidate(&mut self) -> Option<StreamEvent> {
        if self.tool_calls_emitted || self.partials.is_empty() {
            return None;
        }
        self.tool_calls_emitted = true;
        let calls = std::mem::take(&mut self.partials)
            .into_values()
            .map(|p| {
                let arguments: Value = if p.args_buf.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&p.args_buf).unwrap_or_else(|e| {
                        tracing::warn!(
                            tool = %p.name,
                            error = %e,
                            "streamed tool arguments are not valid JSON; using empty object"
                        );
                        Value::Object(Default::default())
                    })
                };
                ToolCall::with_id(p.id, p.name, arguments)
            })
            .collect();
        Some(StreamEvent::ToolCalls { calls })
    }

    fn terminal_events(&mut self) -> Vec<Result<StreamEvent>> {
        let mut events = Vec::new();
        if let Some(tc) = self.consolidate() {
            events.push(Ok(tc));
        }
        if !self.done_emitted {
            self.done_emitted = true;
            events.push(Ok(StreamEvent::Done {
                usage: self.usage.clone(),
                finish_reason: self.finish_reason.take(),
            }));
        }
        events
    }

    fn parse_chunk(&mut self, v: &Value) -> Vec<Result<StreamEvent>> {
        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        // Usage-only chunk (stream_options.include_usage) has no choices.
        let choice = match choice {
            Some(c) => c,
            None => {
                if let Some(usage) = v.get("usage").and_then(parse_wire_usage) {
                    self.usage = Some(usage);
                }
                return Vec::new();
            }
        };

        if let Some(usage) = v.get("usage").and_then(parse_wire_usage) {
            self.usage = Some(usage);
        }

        // A finish chunk closes the logical stream; the `[DONE]` sentinel
        // that follows is then a no-op.
        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            self.finish_reason = Some(fr.to_string());
            return self.terminal_events();
        }

        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tc_arr {
                let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let slot = self.partials.entry(index).or_default();
                if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                    slot.id = id.to_string();
                }
                if let Some(name) = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                {
                    slot.name.push_str(name);
                }
                if let Some(args) = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                {
                    slot.args_buf.push_str(args);
                }
            }
            return Vec::new();
        }

        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                return vec![Ok(StreamEvent::Token { text: text.to_string() })];
            }
        }

        Vec::new()
    }
}

impl SseParser for ChunkParser {
    fn data(&mut self, payload: &str) -> Vec<Result<StreamEvent>> {
        if payload.trim() == "[DONE]" {
            return self.terminal_events();
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(v) => self.parse_chunk(&v),
            Err(e) => vec![Err(Error::Json(e))],
        }
    }

    fn finish(&mut self) -> Vec<Result<StreamEvent>> {
        self.terminal_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(parser: &mut ChunkParser, frames: &[&str]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for frame in frames {
            for e in parser.data(frame) {
                events.push(e.unwrap());
            }
        }
        for e in parser.finish() {
            events.push(e.unwrap());
        }
        events
    }

    #[test]
    fn body_uses_family_parameter_names() {
        let client =
            OpenAiCompatClient::new("http://x", "k", Duration::from_secs(30)).unwrap();
        let mut req = ChatRequest {
            model: "gpt-5-mini".into(),
            messages: vec![Message::user("hi")],
            temperature: Some(0.7),
            max_tokens: Some(100),
            ..Default::default()
        };

        let body = client.build_chat_body(&req, false);
        assert_eq!(body["max_completion_tokens"], 100);
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());

        req.model = "gpt-4".into();
        let body = client.build_chat_body(&req, false);
        assert_eq!(body["max_tokens"], 100);
        assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn tools_attach_with_tool_choice() {
        let client =
            OpenAiCompatClient::new("http://x", "k", Duration::from_secs(30)).unwrap();
        let req = ChatRequest {
            model: "gpt-4".into(),
            messages: vec![Message::user("hi")],
            tools: vec![serde_json::json!({"type": "function"})],
            tool_choice: ToolChoice::Auto,
            ..Default::default()
        };
        let body = client.build_chat_body(&req, true);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn retry_only_on_transient_when_enabled() {
        let transient = Error::Transient("connection reset".into());
        let timeout = Error::Timeout("LLM request".into());
        let upstream = Error::Upstream { status: 500, message: "boom".into() };

        assert!(should_retry(&transient, true));
        assert!(should_retry(&timeout, true));
        assert!(!should_retry(&upstream, true));
        assert!(!should_retry(&transient, false));
    }

    #[test]
    fn tool_message_carries_call_id() {
        let wire = msg_to_wire(&Message::tool("call_9", "42"));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_9");
        assert_eq!(wire["content"], "42");
    }

    #[test]
    fn assistant_message_reemits_tool_calls() {
        let msg = Message::assistant("").with_metadata(
            TOOL_CALLS_METADATA_KEY,
            serde_json::json!([{"id": "c1", "type": "function",
                "function": {"name": "calculator", "arguments": "{}"}}]),
        );
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["tool_calls"][0]["id"], "c1");
        assert!(wire["content"].is_null());
    }

    #[test]
    fn blocking_response_parses_tool_calls() {
        let body = serde_json::json!({
            "model": "gpt-4",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "calculator", "arguments": "{\"expression\":\"7*6\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let outcome = parse_chat_response(&body).unwrap();
        assert!(outcome.content.is_empty());
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].tool_name, "calculator");
        assert_eq!(outcome.tool_calls[0].arguments["expression"], "7*6");
        assert_eq!(outcome.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn stream_tokens_then_done() {
        let mut parser = ChunkParser::default();
        let events = parse_all(
            &mut parser,
            &[
                r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
                r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
                r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                "[DONE]",
            ],
        );
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], StreamEvent::Token { text } if text == "Hel"));
        assert!(matches!(&events[1], StreamEvent::Token { text } if text == "lo"));
        assert!(
            matches!(&events[2], StreamEvent::Done { finish_reason: Some(fr), .. } if fr == "stop")
        );
    }

    #[test]
    fn fragmented_tool_call_is_consolidated_once() {
        let mut parser = ChunkParser::default();
        let events = parse_all(
            &mut parser,
            &[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_7","function":{"name":"calculator"}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"expr"}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ession\":\"7*6\"}"}}]}}]}"#,
                r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
                "[DONE]",
            ],
        );
        let tool_events: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolCalls { .. }))
            .collect();
        assert_eq!(tool_events.len(), 1);
        match tool_events[0] {
            StreamEvent::ToolCalls { calls } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].call_id, "call_7");
                assert_eq!(calls[0].arguments["expression"], "7*6");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn parallel_tool_calls_keep_index_order() {
        let mut parser = ChunkParser::default();
        let events = parse_all(
            &mut parser,
            &[
                r#"{"choices":[{"delta":{"tool_calls":[
                    {"index":0,"id":"a","function":{"name":"alpha","arguments":"{}"}},
                    {"index":1,"id":"b","function":{"name":"beta","arguments":"{}"}}
                ]}}]}"#,
                "[DONE]",
            ],
        );
        match &events[0] {
            StreamEvent::ToolCalls { calls } => {
                assert_eq!(calls[0].tool_name, "alpha");
                assert_eq!(calls[1].tool_name, "beta");
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn body_close_without_done_still_terminates() {
        let mut parser = ChunkParser::default();
        let _ = parser.data(r#"{"choices":[{"delta":{"content":"hi"}}]}"#);
        let tail = parser.finish();
        assert_eq!(tail.len(), 1);
        assert!(matches!(tail[0].as_ref().unwrap(), StreamEvent::Done { .. }));
        // finish() is idempotent.
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn usage_only_chunk_recorded() {
        let mut parser = ChunkParser::default();
        let events = parse_all(
            &mut parser,
            &[
                r#"{"choices":[{"delta":{"content":"x"}}]}"#,
                r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
                "[DONE]",
            ],
        );
        match events.last().unwrap() {
            StreamEvent::Done { usage: Some(u), .. } => assert_eq!(u.total_tokens, 5),
            other => panic!("expected done with usage, got {other:?}"),
        }
    }
}
