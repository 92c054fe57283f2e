//! Tool layer: the `Tool` trait, execution policies, provider-boundary
//! name policy, the tool executor (policy gate, approval rendezvous,
//! dispatch, error containment), and the built-in filesystem / memory /
//! retrieval tools.

pub mod builtin;
pub mod executor;
pub mod names;
pub mod policy;
pub mod tool;

pub use builtin::retrieval::{Retriever, RetrievedChunk};
pub use executor::ToolExecutor;
pub use names::{apply_name_policy, NameMapping, ToolNamePolicy};
pub use policy::{
    AllowAllPolicy, CapabilityApprovalPolicy, CapabilityDenyListPolicy, CompositePolicy,
    DenyAllPolicy, PolicyDecision, ToolAllowListPolicy, ToolDenyListPolicy, ToolPolicy,
};
pub use tool::{Tool, ToolExecutionContext};
