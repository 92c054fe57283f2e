//! The supervisor proper: run construction, candidate planning, and the
//! failover attempt loop.
//!
//! The outer bus owns run bracketing: the supervisor emits the single
//! `run_start` and `run_finish`, forwards everything else from the
//! per-attempt engine (remapping tool names to their originals), and
//! closes the bus with the terminal cause when the last attempt fails.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::oneshot;

use ua_domain::{
    AgentError, AgentEventKind, FinishReason, Result, RunStatus, ToolSpec,
};
use ua_engines::{Engine, EngineDeps, EngineRequest};
use ua_memory::{MemoryPool, MemoryScope};
use ua_routing::{
    load_breaker_state, persist_breaker_state, BreakerParams, CircuitBreaker, ConfigStore,
    ModelCatalog, RouteCandidate,
};
use ua_runtime::{EventBus, RunController, ToolCallAggregator};
use ua_tools::{apply_name_policy, builtin, Tool, ToolExecutionContext, ToolExecutor};
use ua_workspace::{JournalWorkspace, PreviewWorkspace, Workspace};

use crate::options::{normalize_messages, RunOptions, WorkspaceMode};
use crate::providers::ProviderRegistry;
use crate::run::{Run, RunResult};

/// Namespace the built-in memory tools use when the caller does not
/// scope the run explicitly. Shared across runs on purpose.
const SHARED_MEMORY_NAMESPACE: &str = "shared";

#[derive(Clone)]
pub struct Supervisor {
    providers: ProviderRegistry,
    catalog: Arc<ModelCatalog>,
    breaker: Arc<CircuitBreaker>,
    memory: Arc<MemoryPool>,
    config_store: Option<Arc<dyn ConfigStore>>,
    breaker_loaded: Arc<tokio::sync::OnceCell<()>>,
    persist_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            providers: ProviderRegistry::new(),
            catalog: Arc::new(ModelCatalog::new()),
            breaker: Arc::new(CircuitBreaker::new(BreakerParams::default())),
            memory: Arc::new(MemoryPool::default()),
            config_store: None,
            breaker_loaded: Arc::new(tokio::sync::OnceCell::new()),
            persist_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<ModelCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_breaker_params(mut self, params: BreakerParams) -> Self {
        self.breaker = Arc::new(CircuitBreaker::new(params));
        self
    }

    pub fn with_memory(mut self, memory: Arc<MemoryPool>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn memory(&self) -> &Arc<MemoryPool> {
        &self.memory
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // run
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Launch a run. Returns immediately with the run handle; the
    /// attempt loop executes on a spawned task.
    pub fn run(&self, options: RunOptions) -> Run {
        let run_id = uuid::Uuid::new_v4().to_string();
        let controller = Arc::new(RunController::new());
        let bus = EventBus::new();

        let status = Arc::new(parking_lot::Mutex::new(RunStatus::Initialising));
        {
            let status = status.clone();
            bus.add_hook(Arc::new(move |ev| {
                match &ev.kind {
                    AgentEventKind::Status { status: s, .. } => *status.lock() = *s,
                    AgentEventKind::RunFinish { reason, .. } => {
                        *status.lock() = match reason {
                            FinishReason::Error => RunStatus::Error,
                            _ => RunStatus::Finished,
                        };
                    }
                    _ => {}
                }
                Ok(())
            }));
        }
        wire_hooks(&bus, &options);

        let (workspace, preview): (Arc<dyn Workspace>, Option<Arc<PreviewWorkspace>>) =
            match options.mode {
                WorkspaceMode::Live => (options.workspace.clone(), None),
                WorkspaceMode::Preview => {
                    let preview = Arc::new(PreviewWorkspace::new(options.workspace.clone()));
                    (preview.clone(), Some(preview))
                }
            };

        let (result_tx, result_rx) = oneshot::channel();
        let supervisor = self.clone();
        let task_bus = bus.clone();
        let task_controller = controller.clone();
        let task_run_id = run_id.clone();
        let task_preview = preview.clone();

        let run_span = tracing::info_span!("run", run_id = %run_id);
        tokio::spawn(tracing::Instrument::instrument(
            async move {
                let outcome = supervisor
                    .run_with_failover(
                        &task_run_id,
                        options,
                        &task_controller,
                        &task_bus,
                        workspace,
                        task_preview,
                    )
                    .await;
                match outcome {
                    Ok(result) => {
                        task_bus.emit(AgentEventKind::RunFinish {
                            run_id: task_run_id,
                            reason: result.finish_reason,
                        });
                        task_bus.close(None);
                        let _ = result_tx.send(Ok(result));
                    }
                    Err(e) => {
                        ensure_run_start(&task_bus, &task_run_id);
                        let reason = if task_controller.is_cancelled() {
                            FinishReason::Cancelled
                        } else {
                            FinishReason::Error
                        };
                        task_bus.emit(AgentEventKind::Error {
                            error: e.to_string(),
                            raw: None,
                        });
                        task_bus.emit(AgentEventKind::RunFinish {
                            run_id: task_run_id,
                            reason,
                        });
                        task_bus.close(Some(e.to_string()));
                        let _ = result_tx.send(Err(e));
                    }
                }
            },
            run_span,
        ));

        Run::new(run_id, bus, controller, status, result_rx, preview)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // run_with_failover
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn run_with_failover(
        &self,
        run_id: &str,
        options: RunOptions,
        controller: &Arc<RunController>,
        bus: &EventBus,
        workspace: Arc<dyn Workspace>,
        preview: Option<Arc<PreviewWorkspace>>,
    ) -> Result<RunResult> {
        // ── 1. Assemble the tool set ──────────────────────────────
        let mut raw_tools: Vec<Arc<dyn Tool>> = Vec::new();
        raw_tools.extend(builtin::fs_tools(bus.clone(), preview.is_some()));
        raw_tools.extend(builtin::memory_tools(bus.clone()));
        if let Some(retriever) = &options.retriever {
            raw_tools.extend(builtin::retrieval_tools(bus.clone(), retriever.clone()));
        }
        raw_tools.extend(options.tools.iter().cloned());

        // ── 2. Name policy at the provider boundary ───────────────
        let specs: Vec<ToolSpec> = raw_tools.iter().map(|t| t.spec().clone()).collect();
        let (renamed_specs, mapping) = apply_name_policy(options.name_policy, &specs)?;
        let tools: Vec<Arc<dyn Tool>> = raw_tools
            .iter()
            .zip(renamed_specs)
            .map(|(tool, spec)| {
                if spec.name == tool.spec().name {
                    tool.clone()
                } else {
                    Arc::new(RenamedTool {
                        spec,
                        inner: tool.clone(),
                    }) as Arc<dyn Tool>
                }
            })
            .collect();
        let mapping = Arc::new(mapping);

        // ── 3. Normalize the conversation ─────────────────────────
        let messages = normalize_messages(&options.prompt);

        // ── 4–5. Availability, persisted breaker state, plan ──────
        let availability = self.providers.availability();
        if let Some(store) = &self.config_store {
            let store = store.clone();
            let breaker = self.breaker.clone();
            self.breaker_loaded
                .get_or_init(|| async move {
                    load_breaker_state(store.as_ref(), &breaker).await;
                })
                .await;
        }

        let breaker = self.breaker.clone();
        let score = move |candidate: &RouteCandidate| -> i64 {
            let (latency, cost) = candidate
                .profile
                .as_ref()
                .map(|p| (p.latency_rank as i64, p.cost_rank as i64))
                .unwrap_or((0, 0));
            latency * 10 + cost + breaker.penalty(&candidate.ref_key())
        };
        let plan = ua_routing::plan(
            &self.catalog,
            &availability,
            &options.route,
            &options.constraints,
            Some(&score),
        );

        // ── 6. Bracket the run and announce the plan ──────────────
        let (first_provider, first_model) = plan
            .first()
            .map(|c| (c.provider.clone(), c.model.clone()))
            .unwrap_or_default();
        bus.emit(AgentEventKind::RunStart {
            run_id: run_id.to_owned(),
            provider: first_provider,
            model: first_model,
            started_at: chrono_now(),
        });
        let refs: Vec<String> = plan.iter().map(|c| c.ref_key()).collect();
        bus.emit(AgentEventKind::Status {
            status: RunStatus::Initialising,
            detail: Some(format!("candidates: [{}]", refs.join(", "))),
        });

        if plan.is_empty() {
            return Err(AgentError::Config(
                "no provider candidates available".into(),
            ));
        }

        // ── 7. Attempt loop ───────────────────────────────────────
        let memory_scope = MemoryScope::new(self.memory.clone(), SHARED_MEMORY_NAMESPACE);
        let mut last_err: Option<AgentError> = None;

        for candidate in plan {
            if controller.is_cancelled() {
                break;
            }
            let ref_key = candidate.ref_key();
            let Some(entry) = self.providers.get(&candidate.provider) else {
                tracing::warn!(provider = %candidate.provider, "candidate provider not registered, skipping");
                last_err = Some(AgentError::ProviderUnavailable {
                    provider: candidate.provider.clone(),
                    message: "provider not registered".into(),
                });
                continue;
            };

            // Fresh journal per live attempt; the single preview overlay
            // is reused across attempts.
            let (attempt_ws, journal): (Arc<dyn Workspace>, Option<Arc<JournalWorkspace>>) =
                match &preview {
                    Some(p) => (p.clone() as Arc<dyn Workspace>, None),
                    None => {
                        let journal = Arc::new(JournalWorkspace::new(workspace.clone()));
                        (journal.clone() as Arc<dyn Workspace>, Some(journal))
                    }
                };

            let ctx = ToolExecutionContext::new(attempt_ws, memory_scope.clone())
                .with_metadata(options.metadata.clone());
            let executor = Arc::new(
                ToolExecutor::new(
                    tools.clone(),
                    options.policy.clone(),
                    controller.clone(),
                    bus.clone(),
                    ctx,
                    true,
                )
                .with_mapping((*mapping).clone()),
            );

            let engine_req = EngineRequest {
                run_id: run_id.to_owned(),
                provider: candidate.provider.clone(),
                model: candidate.model.clone(),
                system: options.system.clone(),
                messages: messages.clone(),
                temperature: options.temperature,
                max_tokens: options.max_tokens,
                max_steps: options.max_steps,
                metadata: options.metadata.clone(),
            };
            let engine_run = entry.engine.start(
                engine_req,
                EngineDeps {
                    controller: controller.clone(),
                    tools: executor,
                },
            );

            // Forward engine events, suppressing the inner bracketing and
            // remapping tool names to originals.
            let forward = {
                let mut inner = engine_run.events().stream();
                let outer = bus.clone();
                let mapping = mapping.clone();
                tokio::spawn(async move {
                    while let Some(event) = inner.next().await {
                        if matches!(
                            event.kind,
                            AgentEventKind::RunStart { .. } | AgentEventKind::RunFinish { .. }
                        ) {
                            continue;
                        }
                        let mut event = (*event).clone();
                        mapping.remap_event(&mut event);
                        outer.emit_event(event);
                    }
                })
            };

            let attempt = engine_run.join().await;
            // The engine closes its bus on every path, so the forwarder
            // drains and exits.
            let _ = forward.await;

            match attempt {
                Ok(mut engine_result) => {
                    for call in &mut engine_result.tool_calls {
                        mapping.remap_call(call);
                    }
                    for outcome in &mut engine_result.tool_results {
                        mapping.remap_outcome(outcome);
                    }
                    if let Some(journal) = &journal {
                        journal.commit();
                    }
                    // A cancelled attempt says nothing about provider
                    // health, so the breaker only records real outcomes.
                    if engine_result.finish_reason != FinishReason::Cancelled {
                        self.breaker.record_success(&ref_key);
                        self.persist_breaker().await;
                    }
                    return Ok(RunResult {
                        run_id: run_id.to_owned(),
                        provider: candidate.provider,
                        model: candidate.model,
                        text: engine_result.text,
                        finish_reason: engine_result.finish_reason,
                        tool_calls: engine_result.tool_calls,
                        tool_results: engine_result.tool_results,
                        usage: engine_result.usage,
                    });
                }
                Err(e) => {
                    tracing::warn!(ref_key = %ref_key, error = %e, "candidate attempt failed");
                    self.breaker.record_failure(&ref_key);
                    self.persist_breaker().await;
                    if let Some(journal) = &journal {
                        journal.rollback().await;
                    }
                    if let Some(p) = &preview {
                        p.discard();
                    }
                    bus.emit(AgentEventKind::Status {
                        status: RunStatus::Error,
                        detail: Some(format!("candidate {ref_key} failed; continuing failover")),
                    });
                    last_err = Some(e);
                }
            }
        }

        if controller.is_cancelled() {
            return Ok(RunResult::cancelled(run_id));
        }
        match last_err {
            Some(cause) => Err(AgentError::with_cause(
                "All provider candidates failed",
                cause,
            )),
            None => Err(AgentError::Config(
                "no provider candidates available".into(),
            )),
        }
    }

    /// Persist breaker state behind a sequential queue so overlapping
    /// runs cannot interleave snapshots.
    async fn persist_breaker(&self) {
        if let Some(store) = &self.config_store {
            let _guard = self.persist_lock.lock().await;
            if let Err(e) = persist_breaker_state(store.as_ref(), &self.breaker).await {
                tracing::warn!(error = %e, "failed to persist breaker state");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn chrono_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// A run must open with `run_start` even when setup fails before any
/// engine attempt.
fn ensure_run_start(bus: &EventBus, run_id: &str) {
    if bus.snapshot().is_empty() {
        bus.emit(AgentEventKind::RunStart {
            run_id: run_id.to_owned(),
            provider: String::new(),
            model: String::new(),
            started_at: chrono_now(),
        });
    }
}

fn wire_hooks(bus: &EventBus, options: &RunOptions) {
    if let Some(on_event) = options.hooks.on_event.clone() {
        bus.add_hook(Arc::new(move |ev| on_event(ev)));
    }
    if let Some(on_text) = options.hooks.on_text_delta.clone() {
        bus.add_hook(Arc::new(move |ev| {
            if let AgentEventKind::TextDelta { text } = &ev.kind {
                on_text(text);
            }
            Ok(())
        }));
    }
    if let Some(on_thinking) = options.hooks.on_thinking_delta.clone() {
        bus.add_hook(Arc::new(move |ev| {
            if let AgentEventKind::ThinkingDelta { text } = &ev.kind {
                on_thinking(text);
            }
            Ok(())
        }));
    }
    if let Some(sink) = options.hooks.session.clone() {
        let aggregator = Arc::new(ToolCallAggregator::new(sink));
        bus.add_hook(Arc::new(move |ev| {
            aggregator.feed(ev);
            Ok(())
        }));
    }
}

/// A user tool re-exposed under its sanitized provider-facing name.
struct RenamedTool {
    spec: ToolSpec,
    inner: Arc<dyn Tool>,
}

#[async_trait::async_trait]
impl Tool for RenamedTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value> {
        self.inner.execute(args, ctx).await
    }
}
