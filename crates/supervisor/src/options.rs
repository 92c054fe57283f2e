//! Run options — everything a caller can shape about one run.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use ua_domain::{AgentEvent, Message};
use ua_routing::{RouteConstraints, RoutePreference};
use ua_runtime::SessionUpdateSink;
use ua_tools::{AllowAllPolicy, Retriever, Tool, ToolNamePolicy, ToolPolicy};
use ua_workspace::{MemWorkspace, Workspace};

/// The user request: raw text or an ordered message list.
#[derive(Debug, Clone)]
pub enum Prompt {
    Text(String),
    Messages(Vec<Message>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkspaceMode {
    #[default]
    Live,
    Preview,
}

/// Caller-facing observation hooks, wired as bus subscribers.
#[derive(Clone, Default)]
pub struct RunHooks {
    pub on_event: Option<Arc<dyn Fn(&AgentEvent) -> anyhow::Result<()> + Send + Sync>>,
    pub on_text_delta: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_thinking_delta: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    /// Session-update compatibility: call/result pairs joined by id.
    pub session: Option<Arc<dyn SessionUpdateSink>>,
}

#[derive(Clone)]
pub struct RunOptions {
    pub prompt: Prompt,
    pub system: Option<String>,
    pub route: RoutePreference,
    pub constraints: RouteConstraints,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_steps: Option<usize>,
    pub workspace: Arc<dyn Workspace>,
    pub mode: WorkspaceMode,
    pub policy: Arc<dyn ToolPolicy>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub retriever: Option<Arc<dyn Retriever>>,
    pub name_policy: ToolNamePolicy,
    pub metadata: HashMap<String, Value>,
    pub hooks: RunHooks,
}

impl RunOptions {
    /// Sensible defaults around a plain text prompt: live in-memory
    /// workspace, allow-all policy, strict tool names.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Prompt::Text(prompt.into()),
            system: None,
            route: RoutePreference::default(),
            constraints: RouteConstraints::default(),
            temperature: None,
            max_tokens: None,
            max_steps: None,
            workspace: Arc::new(MemWorkspace::new()),
            mode: WorkspaceMode::Live,
            policy: Arc::new(AllowAllPolicy),
            tools: Vec::new(),
            retriever: None,
            name_policy: ToolNamePolicy::Strict,
            metadata: HashMap::new(),
            hooks: RunHooks::default(),
        }
    }

    pub fn messages(messages: Vec<Message>) -> Self {
        let mut options = Self::text("");
        options.prompt = Prompt::Messages(messages);
        options
    }

    /// Route to an explicit provider and/or model.
    pub fn with_target(mut self, provider: Option<&str>, model: Option<&str>) -> Self {
        self.route.provider = provider.map(str::to_owned);
        self.route.model = model.map(str::to_owned);
        self
    }
}

/// Normalize the prompt into the engine conversation: prepend nothing
/// (the system prompt rides separately), drop embedded system roles.
pub(crate) fn normalize_messages(prompt: &Prompt) -> Vec<Message> {
    match prompt {
        Prompt::Text(text) => vec![Message::user(text.clone())],
        Prompt::Messages(messages) => messages
            .iter()
            .filter(|m| m.role != ua_domain::Role::System)
            .cloned()
            .collect(),
    }
}
