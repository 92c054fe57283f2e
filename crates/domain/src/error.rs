/// Shared error type used across all unified-agent crates.
#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("provider {provider} unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("tool '{tool}' denied: {reason}")]
    ToolDenied { tool: String, reason: String },

    #[error("tool '{tool}' cancelled")]
    ToolCancelled { tool: String },

    #[error("engine: {0}")]
    Engine(String),

    #[error("workspace: {0}")]
    Workspace(String),

    #[error("patch: {0}")]
    Patch(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{message}")]
    Other {
        message: String,
        #[source]
        cause: Option<Box<AgentError>>,
    },
}

impl AgentError {
    /// Wrap another error as the cause of a terminal failure, keeping the
    /// chain intact for `source()` walkers.
    pub fn with_cause(message: impl Into<String>, cause: AgentError) -> Self {
        AgentError::Other {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        AgentError::Other {
            message: message.into(),
            cause: None,
        }
    }

    /// True when the error represents cancellation rather than failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AgentError::ToolCancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_chain_is_preserved() {
        let inner = AgentError::Engine("stream reset".into());
        let outer = AgentError::with_cause("all provider candidates failed", inner);
        assert_eq!(outer.to_string(), "all provider candidates failed");
        let source = std::error::Error::source(&outer).expect("cause");
        assert!(source.to_string().contains("stream reset"));
    }

    #[test]
    fn cancellation_predicate() {
        assert!(AgentError::ToolCancelled { tool: "x".into() }.is_cancellation());
        assert!(!AgentError::Engine("boom".into()).is_cancellation());
    }
}
