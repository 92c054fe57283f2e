//! Model catalog — an append-only registry of provider/model profiles.
//!
//! The router selects by class and rank, never by hard-coded provider
//! names. Discovery (enumerating a provider's hosted models) can seed
//! additional profiles at any time; the catalog is background-enriched,
//! never consulted mid-stream.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Model class tags used by route preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    Default,
    Frontier,
    Fast,
    LongContext,
    Cheap,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub streaming: bool,
    pub tools: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            streaming: true,
            tools: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub provider_id: String,
    pub model_id: String,
    pub classes: Vec<ModelClass>,
    /// Lower is faster.
    pub latency_rank: u32,
    /// Lower is cheaper.
    pub cost_rank: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<u32>,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
}

impl ModelProfile {
    pub fn ref_key(&self) -> String {
        format!("{}:{}", self.provider_id, self.model_id)
    }

    /// `Default` matches any profile with a non-empty class list.
    pub fn matches_class(&self, class: ModelClass) -> bool {
        match class {
            ModelClass::Default => !self.classes.is_empty(),
            other => self.classes.contains(&other),
        }
    }
}

#[derive(Default)]
pub struct ModelCatalog {
    profiles: RwLock<Vec<ModelProfile>>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, profile: ModelProfile) {
        self.profiles.write().push(profile);
    }

    /// Bulk registration, used by provider discovery.
    pub fn seed<I: IntoIterator<Item = ModelProfile>>(&self, profiles: I) {
        self.profiles.write().extend(profiles);
    }

    pub fn all(&self) -> Vec<ModelProfile> {
        self.profiles.read().clone()
    }

    pub fn by_class(&self, class: ModelClass) -> Vec<ModelProfile> {
        self.profiles
            .read()
            .iter()
            .filter(|p| p.matches_class(class))
            .cloned()
            .collect()
    }

    pub fn by_provider(&self, provider_id: &str) -> Vec<ModelProfile> {
        self.profiles
            .read()
            .iter()
            .filter(|p| p.provider_id == provider_id)
            .cloned()
            .collect()
    }

    pub fn find(&self, provider_id: &str, model_id: &str) -> Option<ModelProfile> {
        self.profiles
            .read()
            .iter()
            .find(|p| p.provider_id == provider_id && p.model_id == model_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}
