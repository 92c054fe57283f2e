//! The run supervisor — owns a run end to end: builds the tool set,
//! plans provider candidates, executes attempts with automatic failover
//! and transactional workspace rollback, and fans the unified event
//! stream out to callers.

pub mod options;
pub mod providers;
pub mod run;
pub mod supervisor;

pub use options::{Prompt, RunHooks, RunOptions, WorkspaceMode};
pub use providers::ProviderRegistry;
pub use run::{Run, RunResult};
pub use supervisor::Supervisor;
