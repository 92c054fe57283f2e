//! Per-run coordination primitives: the run controller (cancellation,
//! pause/resume, stop, approval rendezvous), the ordered multi-consumer
//! event bus, and the tool-call aggregator for session-update consumers.

pub mod aggregator;
pub mod bus;
pub mod controller;

pub use aggregator::{SessionUpdateSink, ToolCallAggregator};
pub use bus::{CloseReason, EventBus, EventHook};
pub use controller::RunController;
