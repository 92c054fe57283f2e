use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use ua_domain::{Result, ToolSpec};
use ua_memory::MemoryScope;
use ua_workspace::Workspace;

/// Everything a tool may touch during execution.
///
/// Passed by value into `execute` so tools hold no back-pointers into the
/// runtime — the dependency graph stays acyclic.
#[derive(Clone)]
pub struct ToolExecutionContext {
    pub workspace: Arc<dyn Workspace>,
    pub memory: MemoryScope,
    pub metadata: HashMap<String, Value>,
}

impl ToolExecutionContext {
    pub fn new(workspace: Arc<dyn Workspace>, memory: MemoryScope) -> Self {
        Self {
            workspace,
            memory,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// An executable tool. Implementations translate JSON arguments into an
/// effect and return a JSON result; failures are returned, never panicked,
/// so the executor can contain them.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value>;
}
