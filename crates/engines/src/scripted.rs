//! Deterministic scripted backend for tests and offline development.
//!
//! Each call to `chat_stream` pops the next scripted turn and replays it
//! as stream events. Turns can respond with text, emit tool calls, or
//! fail mid-stream to exercise failover paths.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde_json::Value;

use ua_domain::{AgentError, BoxStream, Message, Result, StreamEvent, Usage};

use crate::backend::{BackendRequest, ChatBackend};

/// One scripted model turn.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStep {
    pub thinking: Option<String>,
    pub text: String,
    /// (tool_name, arguments) pairs emitted as complete tool calls.
    pub tool_calls: Vec<(String, Value)>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

enum Turn {
    Respond(ScriptedStep),
    /// `chat_stream` itself fails.
    FailToConnect(String),
    /// The stream yields an error mid-turn.
    FailMidStream { text_before: String, error: String },
}

pub struct ScriptedBackend {
    id: String,
    configured: bool,
    emit_call_ids: bool,
    turns: Mutex<VecDeque<Turn>>,
    /// Requests observed by this backend (assertion helper).
    requests: Mutex<Vec<Vec<Message>>>,
    /// Run-wide counter so generated call ids never collide across steps.
    call_seq: std::sync::atomic::AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            configured: true,
            emit_call_ids: true,
            turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            call_seq: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Mark the backend as missing credentials.
    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    /// Omit call ids from tool-call events, forcing hash-queue joining.
    pub fn without_call_ids(mut self) -> Self {
        self.emit_call_ids = false;
        self
    }

    pub fn respond(self, text: impl Into<String>) -> Self {
        self.push(Turn::Respond(ScriptedStep {
            text: text.into(),
            finish_reason: Some("stop".into()),
            ..Default::default()
        }))
    }

    pub fn respond_step(self, step: ScriptedStep) -> Self {
        self.push(Turn::Respond(step))
    }

    /// A turn that emits tool calls (and optional text).
    pub fn call_tools(self, text: impl Into<String>, calls: Vec<(&str, Value)>) -> Self {
        self.push(Turn::Respond(ScriptedStep {
            text: text.into(),
            tool_calls: calls
                .into_iter()
                .map(|(name, args)| (name.to_owned(), args))
                .collect(),
            finish_reason: Some("tool_calls".into()),
            ..Default::default()
        }))
    }

    pub fn fail_to_connect(self, message: impl Into<String>) -> Self {
        self.push(Turn::FailToConnect(message.into()))
    }

    pub fn fail_mid_stream(self, text_before: impl Into<String>, error: impl Into<String>) -> Self {
        self.push(Turn::FailMidStream {
            text_before: text_before.into(),
            error: error.into(),
        })
    }

    fn push(self, turn: Turn) -> Self {
        self.turns.lock().push_back(turn);
        self
    }

    /// Message lists seen so far, one entry per model turn.
    pub fn observed_requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl ChatBackend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn chat_stream(
        &self,
        req: &BackendRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().push(req.messages.clone());

        let turn = self.turns.lock().pop_front();
        let emit_ids = self.emit_call_ids;
        let provider = self.id.clone();

        let step = match turn {
            Some(Turn::FailToConnect(message)) => {
                return Err(AgentError::ProviderUnavailable { provider, message });
            }
            Some(Turn::FailMidStream { text_before, error }) => {
                let stream = async_stream::stream! {
                    if !text_before.is_empty() {
                        yield Ok(StreamEvent::Token { text: text_before });
                    }
                    yield Err(AgentError::Engine(error));
                };
                return Ok(Box::pin(stream));
            }
            Some(Turn::Respond(step)) => step,
            // Script exhausted: behave like a model with nothing to add.
            None => ScriptedStep {
                finish_reason: Some("stop".into()),
                ..Default::default()
            },
        };

        let base_seq = self
            .call_seq
            .fetch_add(step.tool_calls.len(), std::sync::atomic::Ordering::Relaxed);
        let stream = async_stream::stream! {
            if let Some(thinking) = step.thinking {
                yield Ok(StreamEvent::Thinking { text: thinking });
            }
            if !step.text.is_empty() {
                yield Ok(StreamEvent::Token { text: step.text });
            }
            for (idx, (tool_name, arguments)) in step.tool_calls.into_iter().enumerate() {
                let call_id = if emit_ids {
                    format!("call-{}", base_seq + idx)
                } else {
                    String::new()
                };
                if emit_ids {
                    yield Ok(StreamEvent::ToolCallStarted {
                        call_id: call_id.clone(),
                        tool_name: tool_name.clone(),
                    });
                }
                yield Ok(StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                });
            }
            yield Ok(StreamEvent::Done {
                usage: step.usage,
                finish_reason: step.finish_reason,
            });
        };
        Ok(Box::pin(stream))
    }
}
