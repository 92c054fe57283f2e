//! Route planning — pure, synchronous candidate ordering.
//!
//! Given provider availability, a preference, hard constraints, and an
//! optional scoring callback, `plan` produces the ordered candidate list
//! the supervisor walks during failover. No HTTP, no async; the same
//! inputs always produce the same plan.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::catalog::{ModelCatalog, ModelClass, ModelProfile};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Caller preference: explicit targets first, then ordering hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePreference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<ModelClass>,
    #[serde(default)]
    pub preferred_providers: Vec<String>,
    pub allow_fallback: bool,
}

impl Default for RoutePreference {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            class: None,
            preferred_providers: Vec::new(),
            allow_fallback: true,
        }
    }
}

/// Hard requirements every candidate must satisfy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConstraints {
    #[serde(default)]
    pub must_stream: bool,
    #[serde(default)]
    pub requires_tools: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_providers: Option<HashSet<String>>,
    #[serde(default)]
    pub blocked_providers: HashSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_context_tokens: Option<u32>,
}

/// One (provider, model) pair in the plan.
#[derive(Debug, Clone)]
pub struct RouteCandidate {
    pub provider: String,
    pub model: String,
    pub profile: Option<ModelProfile>,
}

impl RouteCandidate {
    /// The canonical breaker key.
    pub fn ref_key(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Planning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn passes_constraints(profile: &ModelProfile, constraints: &RouteConstraints) -> bool {
    if constraints.must_stream && !profile.capabilities.streaming {
        return false;
    }
    if constraints.requires_tools && !profile.capabilities.tools {
        return false;
    }
    if let (Some(min), Some(max)) = (constraints.min_context_tokens, profile.max_context_tokens) {
        if max < min {
            return false;
        }
    }
    true
}

fn ordered_providers(usable: &[String], pref: &RoutePreference) -> Vec<String> {
    let mut ordered = Vec::with_capacity(usable.len());
    let mut push = |p: &str, ordered: &mut Vec<String>| {
        if usable.iter().any(|u| u == p) && !ordered.iter().any(|o| o == p) {
            ordered.push(p.to_owned());
        }
    };
    if let Some(explicit) = &pref.provider {
        push(explicit, &mut ordered);
    }
    for p in &pref.preferred_providers {
        push(p, &mut ordered);
    }
    let mut rest: Vec<&String> = usable.iter().filter(|p| !ordered.contains(*p)).collect();
    rest.sort();
    ordered.extend(rest.into_iter().cloned());
    ordered
}

fn candidates_for_provider(
    catalog: &ModelCatalog,
    provider: &str,
    pref: &RoutePreference,
) -> Vec<RouteCandidate> {
    if let Some(model) = &pref.model {
        return vec![RouteCandidate {
            provider: provider.to_owned(),
            model: model.clone(),
            profile: catalog.find(provider, model),
        }];
    }
    let class = pref.class.unwrap_or(ModelClass::Default);
    let mut profiles: Vec<ModelProfile> = catalog
        .by_provider(provider)
        .into_iter()
        .filter(|p| p.matches_class(class))
        .collect();
    profiles.sort_by_key(|p| p.latency_rank);
    profiles
        .into_iter()
        .map(|p| RouteCandidate {
            provider: p.provider_id.clone(),
            model: p.model_id.clone(),
            profile: Some(p),
        })
        .collect()
}

/// Produce the ordered candidate plan.
///
/// 1. Intersect available providers with the allow set, drop blocked.
/// 2. Order providers: explicit, then preferred, then the rest.
/// 3. Expand to (provider, model) candidates — the explicit model if
///    given, otherwise catalog profiles of the requested class sorted by
///    latency rank.
/// 4. Apply hard constraint filters.
/// 5. If empty and fallback is allowed, retry with the whole catalog on
///    the usable providers.
/// 6. Stable-sort by the scoring callback when given.
/// 7. If fallback is disallowed, truncate to the first candidate.
pub fn plan(
    catalog: &ModelCatalog,
    availability: &HashMap<String, bool>,
    pref: &RoutePreference,
    constraints: &RouteConstraints,
    score: Option<&dyn Fn(&RouteCandidate) -> i64>,
) -> Vec<RouteCandidate> {
    let usable: Vec<String> = availability
        .iter()
        .filter(|(_, available)| **available)
        .map(|(p, _)| p.clone())
        .filter(|p| {
            constraints
                .allowed_providers
                .as_ref()
                .map(|allow| allow.contains(p))
                .unwrap_or(true)
        })
        .filter(|p| !constraints.blocked_providers.contains(p))
        .collect();

    let providers = ordered_providers(&usable, pref);

    let mut candidates: Vec<RouteCandidate> = providers
        .iter()
        .flat_map(|p| candidates_for_provider(catalog, p, pref))
        .filter(|c| c.profile.as_ref().map_or(true, |p| passes_constraints(p, constraints)))
        .collect();

    if candidates.is_empty() && pref.allow_fallback {
        candidates = providers
            .iter()
            .flat_map(|p| catalog.by_provider(p))
            .filter(|p| passes_constraints(p, constraints))
            .map(|p| RouteCandidate {
                provider: p.provider_id.clone(),
                model: p.model_id.clone(),
                profile: Some(p),
            })
            .collect();
    }

    if let Some(score) = score {
        candidates.sort_by_key(|c| score(c));
    }

    if !pref.allow_fallback {
        candidates.truncate(1);
    }
    candidates
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
