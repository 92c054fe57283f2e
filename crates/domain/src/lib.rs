//! Shared domain types for the unified-agent workspace.
//!
//! Everything here is provider-agnostic: the run event model, the
//! conversation message model, tool call/result types, backend stream
//! events, and the error taxonomy used by every other crate.

pub mod error;
pub mod event;
pub mod stream;
pub mod tool;

pub use error::{AgentError, Result};
pub use event::{
    AgentEvent, AgentEventKind, EventMeta, FileChange, FileChangeKind, FinishReason, RunStatus,
};
pub use stream::{BoxStream, StreamEvent, Usage};
pub use tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolOutcome, ToolSpec};
