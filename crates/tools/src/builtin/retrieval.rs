//! Context retrieval tool — queries an injected retriever and reports
//! the query/result pair on the event stream.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ua_domain::{AgentError, AgentEventKind, Result, ToolSpec};
use ua_runtime::EventBus;

use crate::tool::{Tool, ToolExecutionContext};

pub const DEFAULT_TOP_K: usize = 5;

/// One retrieved chunk of context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// The retrieval seam — vector stores, keyword indexes, and test doubles
/// all plug in here.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>>;
}

#[derive(Debug, Deserialize)]
struct RetrieveArgs {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

pub struct RetrieveContext {
    spec: ToolSpec,
    bus: EventBus,
    retriever: Arc<dyn Retriever>,
}

impl RetrieveContext {
    pub fn new(bus: EventBus, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            spec: ToolSpec::new(
                "retrieve_context",
                "Retrieve relevant context chunks for a query.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "top_k": { "type": "integer", "minimum": 1 }
                    },
                    "required": ["query"]
                }),
                &["retrieval:read"],
            ),
            bus,
            retriever,
        }
    }
}

#[async_trait::async_trait]
impl Tool for RetrieveContext {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: &ToolExecutionContext) -> Result<Value> {
        let args: RetrieveArgs = serde_json::from_value(args)
            .map_err(|e| AgentError::other(format!("invalid arguments: {e}")))?;
        let top_k = args.top_k.unwrap_or(DEFAULT_TOP_K);

        self.bus.emit(AgentEventKind::RetrievalQuery {
            query: args.query.clone(),
            top_k,
        });
        let chunks = self.retriever.retrieve(&args.query, top_k).await?;
        self.bus.emit(AgentEventKind::RetrievalResults {
            query: args.query,
            count: chunks.len(),
        });
        Ok(serde_json::to_value(chunks)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ua_memory::{MemoryPool, MemoryScope};
    use ua_workspace::MemWorkspace;

    struct FixedRetriever;

    #[async_trait::async_trait]
    impl Retriever for FixedRetriever {
        async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
            Ok((0..top_k.min(2))
                .map(|i| RetrievedChunk {
                    id: format!("chunk-{i}"),
                    text: format!("{query} #{i}"),
                    score: Some(1.0 - i as f32 * 0.1),
                    metadata: None,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn retrieval_emits_query_then_results() {
        let bus = EventBus::new();
        let tool = RetrieveContext::new(bus.clone(), Arc::new(FixedRetriever));
        let pool = Arc::new(MemoryPool::default());
        let ctx = ToolExecutionContext::new(
            Arc::new(MemWorkspace::new()),
            MemoryScope::new(pool, "t"),
        );

        let out = tool
            .execute(json!({"query": "docs", "top_k": 2}), &ctx)
            .await
            .expect("retrieve");
        let chunks: Vec<RetrievedChunk> = serde_json::from_value(out).expect("chunks");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "chunk-0");

        let tags: Vec<_> = bus.snapshot().iter().map(|e| e.kind.tag().to_owned()).collect();
        assert_eq!(tags, vec!["retrieval_query", "retrieval_results"]);
    }

    #[tokio::test]
    async fn top_k_defaults_when_omitted() {
        let bus = EventBus::new();
        let tool = RetrieveContext::new(bus.clone(), Arc::new(FixedRetriever));
        let pool = Arc::new(MemoryPool::default());
        let ctx = ToolExecutionContext::new(
            Arc::new(MemWorkspace::new()),
            MemoryScope::new(pool, "t"),
        );
        tool.execute(json!({"query": "q"}), &ctx).await.expect("retrieve");
        match &bus.snapshot()[0].kind {
            AgentEventKind::RetrievalQuery { top_k, .. } => assert_eq!(*top_k, DEFAULT_TOP_K),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
