//! Durable key/value persistence seam and breaker state helpers.
//!
//! The core never touches disk directly; callers inject a [`ConfigStore`]
//! when they want breaker state to survive restarts.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use ua_domain::Result;

use crate::breaker::{BreakerSnapshot, CircuitBreaker};

/// Persistence key for the breaker snapshot.
pub const BREAKER_STATE_KEY: &str = "routing:circuitBreaker:v1";

#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// In-memory store for tests and ephemeral processes.
#[derive(Default)]
pub struct MemoryConfigStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.lock().insert(key.to_owned(), value);
        Ok(())
    }
}

/// Restore breaker state from a store. Missing or malformed snapshots are
/// ignored — routing proceeds with a cold breaker.
pub async fn load_breaker_state(store: &dyn ConfigStore, breaker: &CircuitBreaker) {
    match store.get(BREAKER_STATE_KEY).await {
        Ok(Some(value)) => match serde_json::from_value::<BreakerSnapshot>(value) {
            Ok(snapshot) => breaker.restore(snapshot),
            Err(e) => tracing::warn!(error = %e, "ignoring malformed breaker snapshot"),
        },
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "failed to load breaker snapshot"),
    }
}

/// Persist the current breaker state.
pub async fn persist_breaker_state(
    store: &dyn ConfigStore,
    breaker: &CircuitBreaker,
) -> Result<()> {
    let snapshot = serde_json::to_value(breaker.snapshot())?;
    store.set(BREAKER_STATE_KEY, snapshot).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerParams;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn breaker_state_roundtrips_through_store() {
        let store = MemoryConfigStore::new();
        let breaker = CircuitBreaker::new(BreakerParams::default());
        let now = Utc::now();
        breaker.record_failure_at("p:m", now);

        persist_breaker_state(&store, &breaker).await.expect("persist");

        let fresh = CircuitBreaker::new(BreakerParams::default());
        load_breaker_state(&store, &fresh).await;
        assert_eq!(fresh.penalty_at("p:m", now), 1000);
    }

    #[tokio::test]
    async fn wrong_version_snapshot_is_ignored_on_load() {
        let store = MemoryConfigStore::new();
        store
            .set(BREAKER_STATE_KEY, json!({"version": 2, "entries": {}}))
            .await
            .expect("set");

        let breaker = CircuitBreaker::new(BreakerParams::default());
        breaker.record_failure_at("p:m", Utc::now());
        load_breaker_state(&store, &breaker).await;
        // Pre-existing entries survive the discarded load.
        assert!(breaker.penalty("p:m") > 0);
    }

    #[tokio::test]
    async fn missing_snapshot_is_fine() {
        let store = MemoryConfigStore::new();
        let breaker = CircuitBreaker::new(BreakerParams::default());
        load_breaker_state(&store, &breaker).await;
        assert_eq!(breaker.penalty("anything"), 0);
    }
}
