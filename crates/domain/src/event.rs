//! The unified run event model.
//!
//! Every observable step of a run — status changes, streamed deltas, tool
//! traffic, file effects, usage — is one [`AgentEvent`] on the run's bus.
//! Consumers pattern-match on [`AgentEventKind`]; `meta` is attached
//! uniformly and carries correlation ids only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::Usage;
use crate::tool::{ToolCall, ToolOutcome};

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Initialising,
    Thinking,
    Responding,
    Acting,
    Paused,
    Stopping,
    Finished,
    Error,
}

/// Why a run (or one model step) stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Cancelled,
    Error,
    Other,
}

impl FinishReason {
    /// Map a backend's finish-reason string onto the unified set.
    pub fn from_provider(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
            "cancelled" => FinishReason::Cancelled,
            "error" => FinishReason::Error,
            _ => FinishReason::Other,
        }
    }
}

/// The kind of file effect a tool produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Create,
    Update,
    Delete,
    Rename,
    PatchHunk,
}

/// One file effect. `preview` is set when the effect landed in a preview
/// overlay rather than the base workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub kind: FileChangeKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_path: Option<String>,
    #[serde(default)]
    pub preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hunk_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hunk_count: Option<usize>,
}

/// Correlation metadata attached uniformly to events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// One event on the run's unified stream.
#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<EventMeta>,
    #[serde(flatten)]
    pub kind: AgentEventKind,
}

impl AgentEvent {
    pub fn new(kind: AgentEventKind) -> Self {
        Self {
            at: Utc::now(),
            meta: None,
            kind,
        }
    }

    pub fn with_meta(kind: AgentEventKind, meta: EventMeta) -> Self {
        Self {
            at: Utc::now(),
            meta: Some(meta),
            kind,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEventKind {
    RunStart {
        run_id: String,
        provider: String,
        model: String,
        started_at: DateTime<Utc>,
    },
    Status {
        status: RunStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    ThinkingDelta {
        text: String,
    },
    TextDelta {
        text: String,
    },
    ToolCall {
        call: ToolCall,
    },
    ToolResult {
        result: ToolOutcome,
    },
    ToolApprovalRequest {
        call: ToolCall,
        reason: String,
        policy: String,
    },
    FileChange {
        change: FileChange,
    },
    MemoryRead {
        key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    MemoryWrite {
        key: String,
        value: Value,
    },
    RetrievalQuery {
        query: String,
        top_k: usize,
    },
    RetrievalResults {
        query: String,
        count: usize,
    },
    StepFinish {
        index: usize,
        finish_reason: FinishReason,
        tool_calls: Vec<ToolCall>,
        tool_results: Vec<ToolOutcome>,
    },
    Usage {
        usage: Usage,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },
    RunFinish {
        run_id: String,
        reason: FinishReason,
    },
}

impl AgentEventKind {
    /// Stable discriminant name, useful for logs and test assertions.
    pub fn tag(&self) -> &'static str {
        match self {
            AgentEventKind::RunStart { .. } => "run_start",
            AgentEventKind::Status { .. } => "status",
            AgentEventKind::ThinkingDelta { .. } => "thinking_delta",
            AgentEventKind::TextDelta { .. } => "text_delta",
            AgentEventKind::ToolCall { .. } => "tool_call",
            AgentEventKind::ToolResult { .. } => "tool_result",
            AgentEventKind::ToolApprovalRequest { .. } => "tool_approval_request",
            AgentEventKind::FileChange { .. } => "file_change",
            AgentEventKind::MemoryRead { .. } => "memory_read",
            AgentEventKind::MemoryWrite { .. } => "memory_write",
            AgentEventKind::RetrievalQuery { .. } => "retrieval_query",
            AgentEventKind::RetrievalResults { .. } => "retrieval_results",
            AgentEventKind::StepFinish { .. } => "step_finish",
            AgentEventKind::Usage { .. } => "usage",
            AgentEventKind::Error { .. } => "error",
            AgentEventKind::RunFinish { .. } => "run_finish",
        }
    }
}
