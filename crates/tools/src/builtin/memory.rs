//! Shared-memory tools — key/value access to the run's memory scope.

use serde::Deserialize;
use serde_json::{json, Value};

use ua_domain::{AgentError, AgentEventKind, Result, ToolSpec};
use ua_runtime::EventBus;

use crate::tool::{Tool, ToolExecutionContext};

#[derive(Debug, Deserialize)]
struct MemoryGetArgs {
    key: String,
}

#[derive(Debug, Deserialize)]
struct MemorySetArgs {
    key: String,
    value: Value,
}

fn bad_args(e: serde_json::Error) -> AgentError {
    AgentError::other(format!("invalid arguments: {e}"))
}

pub struct MemoryGet {
    spec: ToolSpec,
    bus: EventBus,
}

impl MemoryGet {
    pub fn new(bus: EventBus) -> Self {
        Self {
            spec: ToolSpec::new(
                "memory_get",
                "Read a value from shared memory.",
                json!({
                    "type": "object",
                    "properties": { "key": { "type": "string" } },
                    "required": ["key"]
                }),
                &["memory:read"],
            ),
            bus,
        }
    }
}

#[async_trait::async_trait]
impl Tool for MemoryGet {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value> {
        let args: MemoryGetArgs = serde_json::from_value(args).map_err(bad_args)?;
        let value = ctx.memory.kv_get(&args.key);
        self.bus.emit(AgentEventKind::MemoryRead {
            key: args.key,
            value: value.clone(),
        });
        Ok(value.unwrap_or(Value::Null))
    }
}

pub struct MemorySet {
    spec: ToolSpec,
    bus: EventBus,
}

impl MemorySet {
    pub fn new(bus: EventBus) -> Self {
        Self {
            spec: ToolSpec::new(
                "memory_set",
                "Write a value into shared memory.",
                json!({
                    "type": "object",
                    "properties": {
                        "key": { "type": "string" },
                        "value": {}
                    },
                    "required": ["key", "value"]
                }),
                &["memory:write"],
            ),
            bus,
        }
    }
}

#[async_trait::async_trait]
impl Tool for MemorySet {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value> {
        let args: MemorySetArgs = serde_json::from_value(args).map_err(bad_args)?;
        ctx.memory.kv_set(&args.key, args.value.clone());
        self.bus.emit(AgentEventKind::MemoryWrite {
            key: args.key,
            value: args.value,
        });
        Ok(json!({ "ok": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ua_memory::{MemoryPool, MemoryScope};
    use ua_workspace::MemWorkspace;

    fn context() -> (ToolExecutionContext, EventBus) {
        let pool = Arc::new(MemoryPool::default());
        let ctx = ToolExecutionContext::new(
            Arc::new(MemWorkspace::new()),
            MemoryScope::new(pool, "run-1"),
        );
        (ctx, EventBus::new())
    }

    #[tokio::test]
    async fn set_then_get_roundtrips_and_emits_events() {
        let (ctx, bus) = context();
        let set = MemorySet::new(bus.clone());
        let get = MemoryGet::new(bus.clone());

        set.execute(json!({"key": "plan", "value": {"step": 1}}), &ctx)
            .await
            .expect("set");
        let value = get
            .execute(json!({"key": "plan"}), &ctx)
            .await
            .expect("get");
        assert_eq!(value, json!({"step": 1}));

        let tags: Vec<_> = bus.snapshot().iter().map(|e| e.kind.tag().to_owned()).collect();
        assert_eq!(tags, vec!["memory_write", "memory_read"]);
    }

    #[tokio::test]
    async fn missing_key_reads_as_null() {
        let (ctx, bus) = context();
        let get = MemoryGet::new(bus);
        let value = get.execute(json!({"key": "absent"}), &ctx).await.expect("get");
        assert_eq!(value, Value::Null);
    }
}
