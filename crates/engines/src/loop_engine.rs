//! The multi-step tool loop over a [`ChatBackend`].
//!
//! Each step streams one model turn, assembles tool calls from the
//! stream, dispatches them through the tool executor, feeds results back
//! into the conversation, and repeats until the model stops calling
//! tools, `max_steps` is reached, or the controller stops the run.
//! Pause/stop/cancel are observed between steps; cancellation also
//! interrupts the stream read mid-turn.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;

use ua_domain::{
    AgentEventKind, FinishReason, Message, Result, RunStatus, StreamEvent, ToolCall, ToolOutcome,
    Usage,
};
use ua_runtime::EventBus;

use crate::backend::{BackendRequest, ChatBackend};
use crate::engine::{Engine, EngineDeps, EngineRequest, EngineResult, EngineRun};

/// Hard ceiling on tool-loop iterations when the request does not set one.
pub const DEFAULT_MAX_STEPS: usize = 25;

pub struct BackendEngine {
    backend: Arc<dyn ChatBackend>,
}

impl BackendEngine {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }
}

impl Engine for BackendEngine {
    fn start(&self, req: EngineRequest, deps: EngineDeps) -> EngineRun {
        let bus = EventBus::new();
        let events = bus.clone();
        let backend = self.backend.clone();
        let handle = tokio::spawn(async move { run_loop(backend, req, deps, bus).await });
        EngineRun::new(events, handle)
    }
}

async fn run_loop(
    backend: Arc<dyn ChatBackend>,
    req: EngineRequest,
    deps: EngineDeps,
    bus: EventBus,
) -> Result<EngineResult> {
    bus.emit(AgentEventKind::RunStart {
        run_id: req.run_id.clone(),
        provider: req.provider.clone(),
        model: req.model.clone(),
        started_at: chrono::Utc::now(),
    });
    bus.emit(AgentEventKind::Status {
        status: RunStatus::Thinking,
        detail: None,
    });

    match drive(backend.as_ref(), &req, &deps, &bus).await {
        Ok(result) => {
            bus.emit(AgentEventKind::RunFinish {
                run_id: req.run_id.clone(),
                reason: result.finish_reason,
            });
            bus.close(None);
            Ok(result)
        }
        Err(e) => {
            let reason = if deps.controller.is_cancelled() {
                FinishReason::Cancelled
            } else {
                FinishReason::Error
            };
            bus.emit(AgentEventKind::Error {
                error: e.to_string(),
                raw: None,
            });
            bus.emit(AgentEventKind::RunFinish {
                run_id: req.run_id.clone(),
                reason,
            });
            bus.close(Some(e.to_string()));
            Err(e)
        }
    }
}

async fn drive(
    backend: &dyn ChatBackend,
    req: &EngineRequest,
    deps: &EngineDeps,
    bus: &EventBus,
) -> Result<EngineResult> {
    let controller = &deps.controller;
    let mut messages: Vec<Message> = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system) = &req.system {
        messages.push(Message::system(system));
    }
    messages.extend(req.messages.iter().cloned());

    let tool_specs = deps.tools.specs();
    let max_steps = req.max_steps.unwrap_or(DEFAULT_MAX_STEPS).max(1);
    let cancel_token = controller.signal();

    let mut total_usage = Usage::default();
    let mut all_calls: Vec<ToolCall> = Vec::new();
    let mut all_results: Vec<ToolOutcome> = Vec::new();
    let mut final_text = String::new();
    let mut finish = FinishReason::Stop;
    let mut steps_run = 0usize;

    'steps: for step in 0..max_steps {
        steps_run = step + 1;

        // ── Step boundary: cancel > pause > stop ──────────────────
        if controller.is_cancelled() {
            finish = FinishReason::Cancelled;
            break;
        }
        controller.wait_if_paused().await;
        if controller.is_cancelled() {
            finish = FinishReason::Cancelled;
            break;
        }
        if controller.stop_requested() {
            bus.emit(AgentEventKind::Status {
                status: RunStatus::Stopping,
                detail: Some("stop requested".into()),
            });
            finish = FinishReason::Cancelled;
            break;
        }

        // ── Stream one model turn ─────────────────────────────────
        let backend_req = BackendRequest {
            model: req.model.clone(),
            messages: messages.clone(),
            tools: tool_specs.clone(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };
        let mut stream = backend.chat_stream(&backend_req).await?;

        let mut text_buf = String::new();
        let mut responding = false;
        let mut pending: Vec<ToolCall> = Vec::new();
        // Ids minted locally (backend gave none); their dispatch goes
        // through the executor's pending queue instead of by-id.
        let mut generated_ids: std::collections::HashSet<String> = Default::default();
        // call_id -> (name, partial args json)
        let mut assembly: HashMap<String, (String, String)> = HashMap::new();
        let mut step_usage: Option<Usage> = None;
        let mut backend_finish: Option<String> = None;

        loop {
            let item = tokio::select! {
                _ = cancel_token.cancelled() => {
                    finish = FinishReason::Cancelled;
                    break 'steps;
                }
                item = stream.next() => item,
            };
            let Some(item) = item else { break };
            match item? {
                StreamEvent::Thinking { text } => {
                    bus.emit(AgentEventKind::ThinkingDelta { text });
                }
                StreamEvent::Token { text } => {
                    if !responding {
                        bus.emit(AgentEventKind::Status {
                            status: RunStatus::Responding,
                            detail: None,
                        });
                        responding = true;
                    }
                    text_buf.push_str(&text);
                    bus.emit(AgentEventKind::TextDelta { text });
                }
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    assembly.insert(call_id, (tool_name, String::new()));
                }
                StreamEvent::ToolCallDelta { call_id, delta } => {
                    if let Some((_, args)) = assembly.get_mut(&call_id) {
                        args.push_str(&delta);
                    }
                }
                StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                } => {
                    assembly.remove(&call_id);
                    // Backends without stable ids hand out empty ones; the
                    // executor's pending queue keeps call/result joined.
                    let call_id = if call_id.is_empty() {
                        let id = deps.tools.register_call(&tool_name, &arguments);
                        generated_ids.insert(id.clone());
                        id
                    } else {
                        call_id
                    };
                    pending.push(ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    });
                }
                StreamEvent::Done {
                    usage,
                    finish_reason,
                } => {
                    if usage.is_some() {
                        step_usage = usage;
                    }
                    if finish_reason.is_some() {
                        backend_finish = finish_reason;
                    }
                }
            }
        }

        // Calls that streamed start/delta but no finished marker.
        for (call_id, (tool_name, args_str)) in assembly.drain() {
            let arguments: Value = if args_str.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&args_str).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %call_id,
                        tool = %tool_name,
                        error = %e,
                        "tool call arguments are not valid JSON; defaulting to empty object"
                    );
                    Value::Object(Default::default())
                })
            };
            pending.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }

        if let Some(usage) = &step_usage {
            total_usage.add(usage);
            bus.emit(AgentEventKind::Usage {
                usage: usage.clone(),
            });
        }
        final_text = text_buf.clone();

        // ── No tool calls: this is the final answer ───────────────
        if pending.is_empty() {
            finish = backend_finish
                .as_deref()
                .map(FinishReason::from_provider)
                .unwrap_or(FinishReason::Stop);
            bus.emit(AgentEventKind::StepFinish {
                index: step,
                finish_reason: finish,
                tool_calls: Vec::new(),
                tool_results: Vec::new(),
            });
            break;
        }

        // ── Dispatch tools sequentially ───────────────────────────
        bus.emit(AgentEventKind::Status {
            status: RunStatus::Acting,
            detail: None,
        });
        messages.push(Message::assistant_with_tool_calls(&text_buf, &pending));

        // When the executor owns event emission (supervisor mode), the
        // engine stays silent; otherwise it emits the pair itself.
        let executor_emits = deps.tools.emits_tool_events();
        let mut step_results: Vec<ToolOutcome> = Vec::new();
        for call in &pending {
            if !executor_emits {
                bus.emit(AgentEventKind::ToolCall { call: call.clone() });
            }
            // Generated ids are recovered from the executor's FIFO so the
            // queue drains; backend-supplied ids pass through directly.
            let provided_id = if generated_ids.contains(&call.call_id) {
                None
            } else {
                Some(call.call_id.clone())
            };
            match deps
                .tools
                .execute_from_provider(&call.tool_name, call.arguments.clone(), provided_id)
                .await
            {
                Ok(outcome) => {
                    if !executor_emits {
                        bus.emit(AgentEventKind::ToolResult {
                            result: outcome.clone(),
                        });
                    }
                    step_results.push(outcome);
                }
                // Only cancellation escapes the executor's containment.
                Err(_) => {
                    finish = FinishReason::Cancelled;
                    all_calls.extend(pending.iter().cloned());
                    all_results.extend(step_results.iter().cloned());
                    break 'steps;
                }
            }
        }
        for outcome in &step_results {
            messages.push(Message::tool_result(outcome));
        }
        bus.emit(AgentEventKind::StepFinish {
            index: step,
            finish_reason: FinishReason::ToolCalls,
            tool_calls: pending.clone(),
            tool_results: step_results.clone(),
        });
        all_calls.extend(pending);
        all_results.extend(step_results);

        if step + 1 == max_steps {
            tracing::warn!(max_steps, "tool loop limit reached");
            finish = FinishReason::Other;
            break;
        }
        bus.emit(AgentEventKind::Status {
            status: RunStatus::Thinking,
            detail: None,
        });
    }

    if controller.is_cancelled() {
        finish = FinishReason::Cancelled;
    }
    Ok(EngineResult {
        text: final_text,
        finish_reason: finish,
        tool_calls: all_calls,
        tool_results: all_results,
        usage: total_usage,
        steps: steps_run,
    })
}
