//! Provider registry — the engines the supervisor can route to, with
//! their availability (a provider is available iff its configuration
//! carries its minimum credentials).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use ua_engines::{BackendEngine, ChatBackend, Engine};

#[derive(Clone)]
pub struct ProviderEntry {
    pub engine: Arc<dyn Engine>,
    pub available: bool,
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    entries: Arc<RwLock<HashMap<String, ProviderEntry>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine directly, with an explicit availability flag.
    pub fn register_engine(&self, provider_id: impl Into<String>, engine: Arc<dyn Engine>, available: bool) {
        let provider_id = provider_id.into();
        tracing::info!(provider_id = %provider_id, available, "registered provider engine");
        self.entries
            .write()
            .insert(provider_id, ProviderEntry { engine, available });
    }

    /// Register a chat backend behind the standard loop engine.
    /// Availability comes from the backend's own configuration.
    pub fn register_backend(&self, backend: Arc<dyn ChatBackend>) {
        let id = backend.id().to_owned();
        let available = backend.is_configured();
        self.register_engine(id, Arc::new(BackendEngine::new(backend)), available);
    }

    pub fn get(&self, provider_id: &str) -> Option<ProviderEntry> {
        self.entries.read().get(provider_id).cloned()
    }

    /// Availability map consumed by the route planner.
    pub fn availability(&self) -> HashMap<String, bool> {
        self.entries
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.available))
            .collect()
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
