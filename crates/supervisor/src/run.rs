//! The run handle returned to callers: event stream, result future, and
//! lifecycle controls.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use ua_domain::{
    AgentError, AgentEvent, BoxStream, FinishReason, Result, RunStatus, ToolCall, ToolOutcome,
    Usage,
};
use ua_runtime::{EventBus, RunController};
use ua_workspace::PreviewWorkspace;

/// The terminal outcome of a run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub provider: String,
    pub model: String,
    pub text: String,
    pub finish_reason: FinishReason,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolOutcome>,
    pub usage: Usage,
}

impl RunResult {
    pub(crate) fn cancelled(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_owned(),
            provider: String::new(),
            model: String::new(),
            text: String::new(),
            finish_reason: FinishReason::Cancelled,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            usage: Usage::default(),
        }
    }
}

/// A running (or finished) invocation.
pub struct Run {
    run_id: String,
    bus: EventBus,
    controller: Arc<RunController>,
    status: Arc<Mutex<RunStatus>>,
    result_rx: Mutex<Option<oneshot::Receiver<Result<RunResult>>>>,
    preview: Option<Arc<PreviewWorkspace>>,
}

impl Run {
    pub(crate) fn new(
        run_id: String,
        bus: EventBus,
        controller: Arc<RunController>,
        status: Arc<Mutex<RunStatus>>,
        result_rx: oneshot::Receiver<Result<RunResult>>,
        preview: Option<Arc<PreviewWorkspace>>,
    ) -> Self {
        Self {
            run_id,
            bus,
            controller,
            status,
            result_rx: Mutex::new(Some(result_rx)),
            preview,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The most recent lifecycle status observed on the event stream.
    pub fn status(&self) -> RunStatus {
        *self.status.lock()
    }

    /// The unified event stream, replaying from the first event.
    pub fn events(&self) -> BoxStream<'static, Arc<AgentEvent>> {
        self.bus.stream()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn controller(&self) -> &Arc<RunController> {
        &self.controller
    }

    // ── Lifecycle controls ─────────────────────────────────────────

    pub fn pause(&self) {
        self.controller.pause();
    }

    pub fn resume(&self) {
        self.controller.resume();
    }

    /// Cooperative stop: takes effect at the engine's next step boundary.
    pub fn stop(&self) {
        self.controller.stop();
    }

    /// Immediate cancellation: pending approvals resolve as denied.
    pub fn cancel(&self, reason: Option<String>) {
        self.controller.cancel(reason);
    }

    /// Answer a pending tool approval. Returns `true` when a matching
    /// request was waiting.
    pub fn approve_tool_call(&self, call_id: &str, allowed: bool) -> bool {
        self.controller.resolve_approval(call_id, allowed)
    }

    // ── Result ─────────────────────────────────────────────────────

    /// Await the run's terminal result. May be called once.
    pub async fn result(&self) -> Result<RunResult> {
        let rx = self
            .result_rx
            .lock()
            .take()
            .ok_or_else(|| AgentError::Config("run result already consumed".into()))?;
        rx.await
            .unwrap_or_else(|_| Err(AgentError::Engine("run task dropped without a result".into())))
    }

    // ── Preview mode ───────────────────────────────────────────────

    pub fn is_preview(&self) -> bool {
        self.preview.is_some()
    }

    /// Apply the preview overlay to the base workspace.
    pub async fn commit_preview(&self) -> Result<()> {
        match &self.preview {
            Some(preview) => preview.commit().await,
            None => Err(AgentError::Config("run is not in preview mode".into())),
        }
    }

    /// Drop the preview overlay, leaving the base untouched.
    pub fn discard_preview(&self) -> Result<()> {
        match &self.preview {
            Some(preview) => {
                preview.discard();
                Ok(())
            }
            None => Err(AgentError::Config("run is not in preview mode".into())),
        }
    }
}
