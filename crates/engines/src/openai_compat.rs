//! OpenAI-compatible chat backend — the representative HTTP adapter.
//!
//! Speaks `POST {base_url}/chat/completions` with `stream: true` and
//! translates the SSE chunk protocol into [`StreamEvent`]s. Tool-call
//! fragments are assembled internally per stream and surfaced as
//! complete `ToolCallFinished` events when the turn's finish reason
//! arrives.

use std::collections::BTreeMap;

use serde_json::Value;

use ua_domain::{
    AgentError, BoxStream, ContentPart, Message, MessageContent, Result, Role, StreamEvent,
    ToolSpec, Usage,
};

use crate::backend::{BackendRequest, ChatBackend};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct OpenAiCompatBackend {
    id: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AgentError::Http(e.to_string()))?;
        Ok(Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            client,
        })
    }

    fn build_body(&self, req: &BackendRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();
        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant => assistant_to_wire(msg),
        Role::Tool => tool_result_to_wire(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_wire(msg: &Message) -> Value {
    let mut obj = serde_json::json!({ "role": "assistant" });
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    obj["content"] = if text_parts.is_empty() {
        Value::Null
    } else {
        Value::String(text_parts.join("\n"))
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_wire(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
                ..
            } = part
            {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.extract_all_text(),
    })
}

fn tool_to_wire(spec: &ToolSpec) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.input_schema,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE buffering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulates raw SSE bytes and yields complete `data:` payloads.
/// Events are delimited by `\n\n`; a trailing partial event stays
/// buffered for the next push.
#[derive(Default)]
struct SseBuffer {
    buf: String,
}

impl SseBuffer {
    fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let block: String = self.buf.drain(..pos + 2).collect();
            for line in block.lines() {
                if let Some(data) = line.trim().strip_prefix("data:") {
                    let data = data.trim();
                    if !data.is_empty() {
                        payloads.push(data.to_owned());
                    }
                }
            }
        }
        payloads
    }

    /// Drain whatever remains when the body closes.
    fn finish(&mut self) -> Vec<String> {
        if self.buf.trim().is_empty() {
            self.buf.clear();
            return Vec::new();
        }
        self.push("\n\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunk parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct ToolCallBuf {
    id: String,
    name: String,
    args: String,
}

/// Stateful translation of `chat.completion.chunk` payloads into stream
/// events. Tool-call fragments accumulate per choice index and flush as
/// `ToolCallFinished` when the finish reason arrives.
#[derive(Default)]
struct ChunkParser {
    tool_bufs: BTreeMap<u64, ToolCallBuf>,
    done_emitted: bool,
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        input_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        output_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

impl ChunkParser {
    fn flush_tool_calls(&mut self) -> Vec<StreamEvent> {
        let bufs = std::mem::take(&mut self.tool_bufs);
        bufs.into_values()
            .filter(|b| !b.name.is_empty())
            .map(|b| {
                let arguments: Value = if b.args.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&b.args).unwrap_or_else(|e| {
                        tracing::warn!(
                            tool = %b.name,
                            error = %e,
                            "tool call arguments are not valid JSON; defaulting to empty object"
                        );
                        Value::Object(Default::default())
                    })
                };
                StreamEvent::ToolCallFinished {
                    call_id: b.id,
                    tool_name: b.name,
                    arguments,
                }
            })
            .collect()
    }

    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data == "[DONE]" {
            if self.done_emitted {
                return Vec::new();
            }
            self.done_emitted = true;
            return vec![Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            })];
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(AgentError::Json(e))],
        };

        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        // Usage-only trailer chunk (stream_options.include_usage).
        let Some(choice) = choice else {
            if let Some(usage) = v.get("usage").and_then(parse_usage) {
                self.done_emitted = true;
                return vec![Ok(StreamEvent::Done {
                    usage: Some(usage),
                    finish_reason: None,
                })];
            }
            return Vec::new();
        };

        let mut events: Vec<Result<StreamEvent>> = Vec::new();
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for tc in tc_arr {
                let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let buf = self.tool_bufs.entry(index).or_default();
                if let Some(id) = tc.get("id").and_then(|i| i.as_str()) {
                    buf.id = id.to_owned();
                }
                if let Some(func) = tc.get("function") {
                    if let Some(name) = func.get("name").and_then(|n| n.as_str()) {
                        buf.name.push_str(name);
                    }
                    if let Some(args) = func.get("arguments").and_then(|a| a.as_str()) {
                        buf.args.push_str(args);
                    }
                }
            }
        }

        if let Some(text) = delta.get("reasoning_content").and_then(|t| t.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Thinking {
                    text: text.to_owned(),
                }));
            }
        }
        if let Some(text) = delta.get("content").and_then(|t| t.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Token {
                    text: text.to_owned(),
                }));
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            events.extend(self.flush_tool_calls().into_iter().map(Ok));
            self.done_emitted = true;
            events.push(Ok(StreamEvent::Done {
                usage: v.get("usage").and_then(parse_usage),
                finish_reason: Some(reason.to_owned()),
            }));
        }

        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ChatBackend for OpenAiCompatBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn chat_stream(
        &self,
        req: &BackendRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req);

        tracing::debug!(provider = %self.id, url = %url, model = %req.model, "stream request");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::ProviderUnavailable {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        let stream = async_stream::stream! {
            let mut response = response;
            let mut buffer = SseBuffer::default();
            let mut parser = ChunkParser::default();

            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        for data in buffer.push(&String::from_utf8_lossy(&bytes)) {
                            for event in parser.parse(&data) {
                                yield event;
                            }
                        }
                    }
                    Ok(None) => {
                        for data in buffer.finish() {
                            for event in parser.parse(&data) {
                                yield event;
                            }
                        }
                        break;
                    }
                    Err(e) => {
                        yield Err(AgentError::Http(e.to_string()));
                        break;
                    }
                }
            }

            if !parser.done_emitted {
                yield Ok(StreamEvent::Done {
                    usage: None,
                    finish_reason: Some("stop".into()),
                });
            }
        };
        Ok(Box::pin(stream))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sse_buffer_handles_partial_events() {
        let mut buf = SseBuffer::default();
        assert!(buf.push("data: first").is_empty());
        assert_eq!(buf.push("\n\ndata: second\n\n"), vec!["first", "second"]);
        assert!(buf.push("data: tail").is_empty());
        assert_eq!(buf.finish(), vec!["tail"]);
    }

    #[test]
    fn sse_buffer_ignores_non_data_lines() {
        let mut buf = SseBuffer::default();
        let payloads = buf.push("event: ping\nid: 1\ndata: payload\n\n");
        assert_eq!(payloads, vec!["payload"]);
    }

    #[test]
    fn parser_emits_tokens_and_thinking() {
        let mut parser = ChunkParser::default();
        let events = parser.parse(
            &json!({"choices": [{"delta": {"content": "hi", "reasoning_content": "hm"}}]})
                .to_string(),
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(StreamEvent::Thinking { .. })));
        assert!(matches!(events[1], Ok(StreamEvent::Token { .. })));
    }

    #[test]
    fn parser_assembles_fragmented_tool_call() {
        let mut parser = ChunkParser::default();
        parser.parse(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_abc", "function": {"name": "echo"}}
            ]}}]})
            .to_string(),
        );
        parser.parse(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"x\":"}}
            ]}}]})
            .to_string(),
        );
        parser.parse(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"a\"}"}}
            ]}}]})
            .to_string(),
        );
        let events = parser.parse(
            &json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}).to_string(),
        );

        assert_eq!(events.len(), 2);
        match &events[0] {
            Ok(StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            }) => {
                assert_eq!(call_id, "call_abc");
                assert_eq!(tool_name, "echo");
                assert_eq!(arguments, &json!({"x": "a"}));
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &events[1] {
            Ok(StreamEvent::Done { finish_reason, .. }) => {
                assert_eq!(finish_reason.as_deref(), Some("tool_calls"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn parser_usage_trailer_chunk() {
        let mut parser = ChunkParser::default();
        let events = parser.parse(
            &json!({"choices": [], "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}})
                .to_string(),
        );
        match &events[0] {
            Ok(StreamEvent::Done { usage, .. }) => {
                let usage = usage.as_ref().expect("usage");
                assert_eq!(usage.input_tokens, 10);
                assert_eq!(usage.total_tokens, 15);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn parser_done_sentinel_only_once() {
        let mut parser = ChunkParser::default();
        let first =
            parser.parse(&json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}).to_string());
        assert_eq!(first.len(), 1);
        assert!(parser.parse("[DONE]").is_empty());
    }

    #[test]
    fn body_includes_tools_and_stream_options() {
        let backend =
            OpenAiCompatBackend::new("oai", "http://localhost:8000/v1/", Some("sk-test".into()))
                .expect("backend");
        let req = BackendRequest {
            model: "m1".into(),
            messages: vec![Message::user("hi")],
            tools: vec![ToolSpec::new("echo", "echo", json!({"type": "object"}), &[])],
            temperature: Some(0.2),
            max_tokens: Some(512),
        };
        let body = backend.build_body(&req);
        assert_eq!(body["model"], "m1");
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["stream_options"]["include_usage"], json!(true));
        assert_eq!(body["tools"][0]["function"]["name"], "echo");
        assert_eq!(body["max_tokens"], json!(512));
    }

    #[test]
    fn assistant_tool_calls_round_trip_to_wire() {
        let call = ua_domain::ToolCall {
            call_id: "c1".into(),
            tool_name: "echo".into(),
            arguments: json!({"x": 1}),
        };
        let msg = Message::assistant_with_tool_calls("text", &[call]);
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["role"], "assistant");
        assert_eq!(wire["content"], "text");
        assert_eq!(wire["tool_calls"][0]["id"], "c1");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "echo");
    }

    #[test]
    fn unconfigured_backend_reports_unavailable() {
        let backend =
            OpenAiCompatBackend::new("oai", "http://localhost:8000", None).expect("backend");
        assert!(!backend.is_configured());
    }
}
