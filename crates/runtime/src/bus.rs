//! Ordered, multi-consumer event broadcast for one run.
//!
//! The bus keeps the full emission history so every subscriber — no matter
//! when it subscribes — observes the identical sequence from the first
//! event. Synchronous hooks run inside `emit`, before any iterator
//! delivery of the same event; hook errors are logged and swallowed so a
//! misbehaving observer cannot destabilise the run.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use ua_domain::{AgentEvent, AgentEventKind, BoxStream};

/// Terminal state of a closed bus.
#[derive(Debug, Clone, Default)]
pub struct CloseReason {
    pub message: Option<String>,
}

pub type EventHook = Arc<dyn Fn(&AgentEvent) -> anyhow::Result<()> + Send + Sync>;

struct BusState {
    events: Vec<Arc<AgentEvent>>,
    closed: Option<CloseReason>,
    hooks: Vec<EventHook>,
}

struct BusShared {
    state: Mutex<BusState>,
    version_tx: watch::Sender<u64>,
}

#[derive(Clone)]
pub struct EventBus {
    shared: Arc<BusShared>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            shared: Arc::new(BusShared {
                state: Mutex::new(BusState {
                    events: Vec::new(),
                    closed: None,
                    hooks: Vec::new(),
                }),
                version_tx,
            }),
        }
    }

    /// Emit an event. Non-blocking; events emitted after close are dropped.
    pub fn emit(&self, kind: AgentEventKind) {
        self.emit_event(AgentEvent::new(kind));
    }

    /// Emit a pre-built event (used when forwarding between buses so the
    /// original timestamp and meta survive).
    pub fn emit_event(&self, event: AgentEvent) {
        let (event, hooks) = {
            let mut state = self.shared.state.lock();
            if state.closed.is_some() {
                tracing::debug!(kind = event.kind.tag(), "event dropped after bus close");
                return;
            }
            let event = Arc::new(event);
            state.events.push(event.clone());
            (event, state.hooks.clone())
        };

        // Hooks observe the event before any iterator delivery.
        for hook in &hooks {
            if let Err(e) = hook(&event) {
                tracing::warn!(error = %e, kind = event.kind.tag(), "event hook failed");
            }
        }

        self.shared.version_tx.send_modify(|v| *v += 1);
    }

    /// Register a best-effort observer called synchronously on every
    /// subsequent emit.
    pub fn add_hook(&self, hook: EventHook) {
        self.shared.state.lock().hooks.push(hook);
    }

    /// Close the bus. Idempotent; the first reason wins.
    pub fn close(&self, reason: Option<String>) {
        {
            let mut state = self.shared.state.lock();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(CloseReason { message: reason });
        }
        self.shared.version_tx.send_modify(|v| *v += 1);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed.is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.state.lock().closed.clone()
    }

    /// All events emitted so far (test and introspection helper).
    pub fn snapshot(&self) -> Vec<Arc<AgentEvent>> {
        self.shared.state.lock().events.clone()
    }

    /// Subscribe to the full event sequence. The stream replays history
    /// from the first event, then follows live emissions, and completes
    /// once the bus is closed and all buffered events are drained.
    pub fn stream(&self) -> BoxStream<'static, Arc<AgentEvent>> {
        let shared = self.shared.clone();
        let mut version_rx = self.shared.version_tx.subscribe();
        Box::pin(async_stream::stream! {
            let mut next = 0usize;
            loop {
                let (event, closed) = {
                    let state = shared.state.lock();
                    if next < state.events.len() {
                        (Some(state.events[next].clone()), false)
                    } else {
                        (None, state.closed.is_some())
                    }
                };
                match event {
                    Some(ev) => {
                        next += 1;
                        yield ev;
                    }
                    None if closed => break,
                    None => {
                        if version_rx.changed().await.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use ua_domain::RunStatus;

    fn text(s: &str) -> AgentEventKind {
        AgentEventKind::TextDelta { text: s.into() }
    }

    #[tokio::test]
    async fn subscribers_see_identical_sequences() {
        let bus = EventBus::new();
        bus.emit(text("a"));
        let early = bus.stream();

        bus.emit(text("b"));
        let late = bus.stream();
        bus.emit(text("c"));
        bus.close(None);

        let tags = |events: Vec<Arc<AgentEvent>>| {
            events
                .iter()
                .map(|e| match &e.kind {
                    AgentEventKind::TextDelta { text } => text.clone(),
                    other => other.tag().to_string(),
                })
                .collect::<Vec<_>>()
        };

        let a: Vec<_> = early.collect().await;
        let b: Vec<_> = late.collect().await;
        assert_eq!(tags(a), vec!["a", "b", "c"]);
        assert_eq!(tags(b), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn events_after_close_are_dropped() {
        let bus = EventBus::new();
        bus.emit(text("kept"));
        bus.close(Some("done".into()));
        bus.emit(text("dropped"));

        let events: Vec<_> = bus.stream().collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(bus.close_reason().expect("reason").message.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn close_is_idempotent_first_reason_wins() {
        let bus = EventBus::new();
        bus.close(Some("first".into()));
        bus.close(Some("second".into()));
        assert_eq!(bus.close_reason().expect("reason").message.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn hooks_fire_before_iteration_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        {
            let seen = seen.clone();
            bus.add_hook(Arc::new(move |ev| {
                if let AgentEventKind::TextDelta { text } = &ev.kind {
                    seen.lock().push(text.clone());
                }
                Ok(())
            }));
        }

        bus.emit(text("x"));
        // The hook has already run by the time emit returns.
        assert_eq!(*seen.lock(), vec!["x"]);

        bus.close(None);
        let events: Vec<_> = bus.stream().collect().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn hook_errors_are_swallowed() {
        let bus = EventBus::new();
        bus.add_hook(Arc::new(|_| anyhow::bail!("observer exploded")));
        bus.emit(AgentEventKind::Status {
            status: RunStatus::Thinking,
            detail: None,
        });
        assert_eq!(bus.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn live_subscriber_unblocks_on_emit() {
        let bus = EventBus::new();
        let mut stream = bus.stream();

        let bus2 = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            bus2.emit(text("late"));
            bus2.close(None);
        });

        let first = stream.next().await.expect("event");
        assert_eq!(first.kind.tag(), "text_delta");
        assert!(stream.next().await.is_none());
    }
}
