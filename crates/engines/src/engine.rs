//! The backend-agnostic engine contract.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use ua_domain::{AgentError, FinishReason, Message, Result, ToolCall, ToolOutcome, Usage};
use ua_runtime::{EventBus, RunController};
use ua_tools::ToolExecutor;

/// One engine invocation.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub run_id: String,
    pub provider: String,
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_steps: Option<usize>,
    pub metadata: HashMap<String, Value>,
}

/// Collaborators the engine drives during a run.
#[derive(Clone)]
pub struct EngineDeps {
    pub controller: Arc<RunController>,
    pub tools: Arc<ToolExecutor>,
}

/// The terminal outcome of an engine run.
#[derive(Debug, Clone)]
pub struct EngineResult {
    pub text: String,
    pub finish_reason: FinishReason,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolOutcome>,
    pub usage: Usage,
    pub steps: usize,
}

impl EngineResult {
    pub fn cancelled() -> Self {
        Self {
            text: String::new(),
            finish_reason: FinishReason::Cancelled,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            usage: Usage::default(),
            steps: 0,
        }
    }
}

/// A started engine run: the event stream plus the result future.
pub struct EngineRun {
    events: EventBus,
    handle: Mutex<Option<JoinHandle<Result<EngineResult>>>>,
}

impl EngineRun {
    pub fn new(events: EventBus, handle: JoinHandle<Result<EngineResult>>) -> Self {
        Self {
            events,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Await the result. Consumes the underlying task; a second call
    /// reports the run as already joined.
    pub async fn join(&self) -> Result<EngineResult> {
        let handle = self
            .handle
            .lock()
            .take()
            .ok_or_else(|| AgentError::Engine("engine result already consumed".into()))?;
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(AgentError::Engine("engine task aborted".into())),
            Err(e) => Err(AgentError::Engine(format!("engine task panicked: {e}"))),
        }
    }

    /// Abort the driving task and close the event stream.
    pub fn close(&self) {
        if let Some(handle) = self.handle.lock().as_ref() {
            handle.abort();
        }
        self.events.close(Some("engine closed".into()));
    }
}

/// A provider engine: adapts some backend to the streaming + tool-loop
/// contract. `start` must not block; all work happens on the spawned
/// task feeding the returned [`EngineRun`].
pub trait Engine: Send + Sync {
    fn start(&self, req: EngineRequest, deps: EngineDeps) -> EngineRun;
}

impl EngineRequest {
    pub fn new(
        run_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            provider: provider.into(),
            model: model.into(),
            system: None,
            messages,
            temperature: None,
            max_tokens: None,
            max_steps: None,
            metadata: HashMap::new(),
        }
    }
}
