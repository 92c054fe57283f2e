//! Built-in tools: filesystem effects, shared-memory access, and
//! retrieval. FS tools are bound to the run's event bus and the preview
//! flag at construction so `file_change` events carry the right context.

pub mod fs;
pub mod memory;
pub mod retrieval;

use std::sync::Arc;

use ua_runtime::EventBus;

use crate::tool::Tool;
use self::retrieval::Retriever;

/// All filesystem tools bound to one run.
pub fn fs_tools(bus: EventBus, preview: bool) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(fs::FsReadFile::new()),
        Arc::new(fs::FsWriteFile::new(bus.clone(), preview)),
        Arc::new(fs::FsDeletePath::new(bus.clone(), preview)),
        Arc::new(fs::FsRenamePath::new(bus.clone(), preview)),
        Arc::new(fs::FsApplyPatch::new(bus, preview)),
    ]
}

/// Shared-memory tools bound to one run.
pub fn memory_tools(bus: EventBus) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(memory::MemoryGet::new(bus.clone())),
        Arc::new(memory::MemorySet::new(bus)),
    ]
}

/// The retrieval tool, present only when a retriever is configured.
pub fn retrieval_tools(bus: EventBus, retriever: Arc<dyn Retriever>) -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(retrieval::RetrieveContext::new(bus, retriever))]
}
