//! Run controller — lifecycle signals for one run.
//!
//! Holds the cancellation token, the pause gate, the advisory stop flag,
//! and the approval rendezvous used by the tool executor. One controller
//! per run; engines and tools observe it at every suspension point.
//!
//! `stop` vs `cancel`: stop is cooperative and takes effect at the next
//! step boundary of the engine; cancel is immediate — it aborts the token,
//! resolves all pending approvals as denied, and wakes pause-waiters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use ua_domain::{AgentError, Result};

struct PauseGate {
    paused: bool,
    /// FIFO of waiters released in order on resume.
    waiters: Vec<oneshot::Sender<()>>,
}

pub struct RunController {
    cancel: CancellationToken,
    cancel_reason: Mutex<Option<String>>,
    stop_requested: AtomicBool,
    pause: Mutex<PauseGate>,
    approvals: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl Default for RunController {
    fn default() -> Self {
        Self::new()
    }
}

impl RunController {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            cancel_reason: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            pause: Mutex::new(PauseGate {
                paused: false,
                waiters: Vec::new(),
            }),
            approvals: Mutex::new(HashMap::new()),
        }
    }

    // ── Cancellation ───────────────────────────────────────────────

    /// The observable cancellation token; long operations select on it.
    pub fn signal(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_reason(&self) -> Option<String> {
        self.cancel_reason.lock().clone()
    }

    /// Abort the run. Pending approvals resolve as denied and pause-waiters
    /// are woken so nothing stays parked behind a cancelled run.
    pub fn cancel(&self, reason: Option<String>) {
        {
            let mut stored = self.cancel_reason.lock();
            if stored.is_none() {
                *stored = reason;
            }
        }
        self.cancel.cancel();

        let senders: Vec<_> = self.approvals.lock().drain().map(|(_, tx)| tx).collect();
        for tx in senders {
            let _ = tx.send(false);
        }

        let waiters: Vec<_> = {
            let mut gate = self.pause.lock();
            gate.paused = false;
            std::mem::take(&mut gate.waiters)
        };
        for tx in waiters {
            let _ = tx.send(());
        }
    }

    // ── Stop (advisory) ────────────────────────────────────────────

    /// Request a graceful stop; engines read this between steps.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    // ── Pause / resume ─────────────────────────────────────────────

    pub fn pause(&self) {
        self.pause.lock().paused = true;
    }

    pub fn is_paused(&self) -> bool {
        self.pause.lock().paused
    }

    /// Release all pause-waiters in FIFO order.
    pub fn resume(&self) {
        let waiters: Vec<_> = {
            let mut gate = self.pause.lock();
            gate.paused = false;
            std::mem::take(&mut gate.waiters)
        };
        for tx in waiters {
            let _ = tx.send(());
        }
    }

    /// Returns immediately unless paused; otherwise blocks until resumed
    /// or cancelled.
    pub async fn wait_if_paused(&self) {
        let rx = {
            let mut gate = self.pause.lock();
            if !gate.paused || self.is_cancelled() {
                return;
            }
            let (tx, rx) = oneshot::channel();
            gate.waiters.push(tx);
            rx
        };
        tokio::select! {
            _ = rx => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    // ── Approval rendezvous ────────────────────────────────────────

    /// Park until `resolve_approval` answers for `call_id`. Resolves to
    /// `false` immediately when the run is already cancelled, and when
    /// cancellation arrives while waiting.
    pub async fn request_approval(&self, call_id: &str) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let rx = {
            let (tx, rx) = oneshot::channel();
            self.approvals.lock().insert(call_id.to_owned(), tx);
            rx
        };
        tokio::select! {
            answer = rx => answer.unwrap_or(false),
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Answer a pending approval. Returns `true` if a waiter was found.
    pub fn resolve_approval(&self, call_id: &str, allowed: bool) -> bool {
        if let Some(tx) = self.approvals.lock().remove(call_id) {
            let _ = tx.send(allowed);
            return true;
        }
        false
    }

    /// Ids of approvals currently awaiting an answer.
    pub fn pending_approvals(&self) -> Vec<String> {
        self.approvals.lock().keys().cloned().collect()
    }

    // ── Tool execution gate ────────────────────────────────────────

    /// Gate a tool invocation: fail fast when cancelled, park while
    /// paused, and re-check cancellation after waking.
    pub async fn guard_tool_execution(&self, tool_name: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(AgentError::ToolCancelled {
                tool: tool_name.to_owned(),
            });
        }
        self.wait_if_paused().await;
        if self.is_cancelled() {
            return Err(AgentError::ToolCancelled {
                tool: tool_name.to_owned(),
            });
        }
        Ok(())
    }
}
