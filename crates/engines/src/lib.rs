//! Provider engines — the streaming + tool-loop contract and its
//! implementations.
//!
//! [`BackendEngine`] drives the multi-step loop over any [`ChatBackend`];
//! [`OpenAiCompatBackend`] speaks OpenAI-compatible SSE over HTTP, and
//! [`ScriptedBackend`] replays deterministic turns for tests and offline
//! development.

pub mod backend;
pub mod engine;
pub mod loop_engine;
pub mod openai_compat;
pub mod scripted;

pub use backend::{BackendRequest, ChatBackend};
pub use engine::{Engine, EngineDeps, EngineRequest, EngineResult, EngineRun};
pub use loop_engine::BackendEngine;
pub use openai_compat::OpenAiCompatBackend;
pub use scripted::{ScriptedBackend, ScriptedStep};
