//! Session-update compatibility layer.
//!
//! Joins `tool_call` / `tool_result` pairs by call id and forwards them —
//! together with text and thinking deltas — to a [`SessionUpdateSink`],
//! so chat-session consumers get one callback per completed tool call
//! instead of raw event-stream plumbing.

use std::collections::HashMap;

use parking_lot::Mutex;

use ua_domain::{AgentEvent, AgentEventKind, ToolCall};

/// Callbacks for session-style consumers.
pub trait SessionUpdateSink: Send + Sync {
    /// Invoked once per call/result pair.
    fn on_tool_call(&self, tool_name: &str, args_json: &str, result_json: &str);
    fn on_message(&self, text: &str);
    fn on_thought(&self, text: &str);
}

impl<T: SessionUpdateSink + ?Sized> SessionUpdateSink for std::sync::Arc<T> {
    fn on_tool_call(&self, tool_name: &str, args_json: &str, result_json: &str) {
        (**self).on_tool_call(tool_name, args_json, result_json);
    }
    fn on_message(&self, text: &str) {
        (**self).on_message(text);
    }
    fn on_thought(&self, text: &str) {
        (**self).on_thought(text);
    }
}

/// Stateful joiner feeding a [`SessionUpdateSink`] from a run event stream.
pub struct ToolCallAggregator<S> {
    sink: S,
    pending: Mutex<HashMap<String, ToolCall>>,
}

impl<S: SessionUpdateSink> ToolCallAggregator<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one event. Unmatched results (a result whose call was never
    /// observed) are dropped silently.
    pub fn feed(&self, event: &AgentEvent) {
        match &event.kind {
            AgentEventKind::ToolCall { call } => {
                self.pending.lock().insert(call.call_id.clone(), call.clone());
            }
            AgentEventKind::ToolResult { result } => {
                let call = self.pending.lock().remove(&result.call_id);
                if let Some(call) = call {
                    let args = call.arguments.to_string();
                    let out = result.result.to_string();
                    self.sink.on_tool_call(&call.tool_name, &args, &out);
                }
            }
            AgentEventKind::TextDelta { text } => self.sink.on_message(text),
            AgentEventKind::ThinkingDelta { text } => self.sink.on_thought(text),
            _ => {}
        }
    }

    /// Calls still waiting for a result (for end-of-run diagnostics).
    pub fn unresolved(&self) -> Vec<String> {
        self.pending.lock().keys().cloned().collect()
    }
}
