//! Tool executor — policy decision, approval gating, dispatch, error
//! containment, and event emission for one run.
//!
//! Tool execution failures never propagate to the engine loop: they are
//! converted into an error [`ToolOutcome`] so the model always sees a
//! result and the conversation stays stable. Cancellation is the one
//! exception — it short-circuits outward.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use ua_domain::{AgentError, AgentEventKind, Result, ToolCall, ToolOutcome, ToolSpec};
use ua_runtime::{EventBus, RunController};

use crate::names::NameMapping;
use crate::policy::{PolicyDecision, ToolPolicy};
use crate::tool::{Tool, ToolExecutionContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canonical JSON hashing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Canonical form: object keys sorted recursively, arrays in order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn call_key(tool_name: &str, args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"||");
    hasher.update(canonical_json(args).as_bytes());
    hex::encode(hasher.finalize())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolExecutor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolExecutor {
    tools: HashMap<String, Arc<dyn Tool>>,
    policy: Arc<dyn ToolPolicy>,
    controller: Arc<RunController>,
    bus: EventBus,
    ctx: ToolExecutionContext,
    emit_tool_events: bool,
    /// Rewrites provider-facing tool names back to originals on every
    /// emitted event, so bus consumers never see sanitized names.
    mapping: NameMapping,
    /// FIFO of generated call ids, keyed by hash of (name, canonical args),
    /// so results from backends without stable call ids re-join their call.
    pending: Mutex<HashMap<String, VecDeque<String>>>,
}

impl ToolExecutor {
    pub fn new(
        tools: Vec<Arc<dyn Tool>>,
        policy: Arc<dyn ToolPolicy>,
        controller: Arc<RunController>,
        bus: EventBus,
        ctx: ToolExecutionContext,
        emit_tool_events: bool,
    ) -> Self {
        let tools = tools
            .into_iter()
            .map(|t| (t.spec().name.clone(), t))
            .collect();
        Self {
            tools,
            policy,
            controller,
            bus,
            ctx,
            emit_tool_events,
            mapping: NameMapping::default(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_mapping(mut self, mapping: NameMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Whether this executor owns call/result event emission. Engines that
    /// emit natively check this to avoid double emission.
    pub fn emits_tool_events(&self) -> bool {
        self.emit_tool_events
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec().clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn controller(&self) -> &Arc<RunController> {
        &self.controller
    }

    // ── Call-id joining ────────────────────────────────────────────

    /// Generate and enqueue a call id for a backend that did not supply
    /// one. The id is recovered FIFO by `take_call_id` (or implicitly by
    /// `execute_from_provider` with `call_id = None`).
    pub fn register_call(&self, tool_name: &str, args: &Value) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.pending
            .lock()
            .entry(call_key(tool_name, args))
            .or_default()
            .push_back(id.clone());
        id
    }

    /// Pop the oldest pending id for this (name, args) pair.
    pub fn take_call_id(&self, tool_name: &str, args: &Value) -> Option<String> {
        let key = call_key(tool_name, args);
        let mut pending = self.pending.lock();
        let queue = pending.get_mut(&key)?;
        let id = queue.pop_front();
        if queue.is_empty() {
            pending.remove(&key);
        }
        id
    }

    // ── Authorization (policy + approval) ──────────────────────────

    /// Gate a call: controller guard, policy decision, and — for `ask` —
    /// the approval rendezvous. Emits `tool_approval_request` before any
    /// `tool_call` can be emitted for this invocation.
    async fn authorize(&self, call: &ToolCall) -> Result<()> {
        let tool = self.tools.get(&call.tool_name).ok_or_else(|| {
            AgentError::ToolDenied {
                tool: call.tool_name.clone(),
                reason: "Unknown tool".into(),
            }
        })?;

        self.controller.guard_tool_execution(&call.tool_name).await?;

        match self.policy.decide(tool.spec(), &call.arguments) {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Deny { reason } => Err(AgentError::ToolDenied {
                tool: call.tool_name.clone(),
                reason,
            }),
            PolicyDecision::Ask { reason } => {
                let mut egress_call = call.clone();
                self.mapping.remap_call(&mut egress_call);
                self.bus.emit(AgentEventKind::ToolApprovalRequest {
                    call: egress_call,
                    reason: reason.clone(),
                    policy: self.policy.name().to_owned(),
                });
                if self.controller.request_approval(&call.call_id).await {
                    Ok(())
                } else {
                    Err(AgentError::ToolDenied {
                        tool: call.tool_name.clone(),
                        reason: "User denied".into(),
                    })
                }
            }
        }
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Invoke an already-authorized call. Failures are contained into an
    /// error outcome.
    async fn invoke(&self, call: &ToolCall) -> ToolOutcome {
        let Some(tool) = self.tools.get(&call.tool_name) else {
            return ToolOutcome::error(call, "Unknown tool");
        };
        match tool.execute(call.arguments.clone(), &self.ctx).await {
            Ok(result) => ToolOutcome::ok(call, result),
            Err(e) => {
                tracing::debug!(tool = %call.tool_name, error = %e, "tool execution failed");
                ToolOutcome::error(call, e.to_string())
            }
        }
    }

    /// The full provider-facing path: resolve the call id, authorize,
    /// dispatch, contain failures, and emit call/result events when this
    /// executor owns emission.
    ///
    /// Denials come back as an error outcome so the engine can feed a
    /// result to the model; cancellation propagates as `Err`.
    pub async fn execute_from_provider(
        &self,
        tool_name: &str,
        args: Value,
        call_id: Option<String>,
    ) -> Result<ToolOutcome> {
        let call_id = call_id
            .or_else(|| self.take_call_id(tool_name, &args))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let call = ToolCall {
            call_id,
            tool_name: tool_name.to_owned(),
            arguments: args,
        };

        match self.authorize(&call).await {
            Ok(()) => {}
            Err(e @ AgentError::ToolCancelled { .. }) => return Err(e),
            Err(e) => return Ok(ToolOutcome::error(&call, e.to_string())),
        }

        if self.emit_tool_events {
            let mut egress_call = call.clone();
            self.mapping.remap_call(&mut egress_call);
            self.bus.emit(AgentEventKind::ToolCall { call: egress_call });
        }
        let outcome = self.invoke(&call).await;
        if self.emit_tool_events {
            let mut egress_outcome = outcome.clone();
            self.mapping.remap_outcome(&mut egress_outcome);
            self.bus.emit(AgentEventKind::ToolResult {
                result: egress_outcome,
            });
        }
        Ok(outcome)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
