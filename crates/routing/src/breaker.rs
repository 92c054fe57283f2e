//! Circuit breaker — per-candidate failure tracking with exponential
//! open windows and penalty scoring.
//!
//! Keys are candidate refs (`"provider:model"`). A candidate that fails
//! `failure_threshold` consecutive times opens its circuit for
//! `min(max_cooldown, base_cooldown * 2^(failures - threshold))`; while
//! open it carries a penalty large enough to sink it below every healthy
//! candidate in the route plan. A single success resets the entry.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct BreakerParams {
    pub failure_threshold: u32,
    pub base_cooldown_ms: i64,
    pub max_cooldown_ms: i64,
    pub penalty_per_failure: i64,
    pub open_circuit_penalty: i64,
}

impl Default for BreakerParams {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            base_cooldown_ms: 5 * 60 * 1000,
            max_cooldown_ms: 60 * 60 * 1000,
            penalty_per_failure: 1000,
            open_circuit_penalty: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerEntry {
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_until: Option<DateTime<Utc>>,
}

/// Versioned dump of all entries, shaped for durable persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub version: u32,
    pub entries: HashMap<String, BreakerEntry>,
}

#[derive(Default)]
pub struct CircuitBreaker {
    params: BreakerParams,
    entries: Mutex<HashMap<String, BreakerEntry>>,
}

impl CircuitBreaker {
    pub fn new(params: BreakerParams) -> Self {
        Self {
            params,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &BreakerParams {
        &self.params
    }

    pub fn record_success(&self, ref_key: &str) {
        self.entries.lock().remove(ref_key);
    }

    pub fn record_failure(&self, ref_key: &str) {
        self.record_failure_at(ref_key, Utc::now());
    }

    pub fn record_failure_at(&self, ref_key: &str, now: DateTime<Utc>) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(ref_key.to_owned()).or_default();
        entry.consecutive_failures += 1;
        entry.last_failure_at = Some(now);
        if entry.consecutive_failures >= self.params.failure_threshold {
            // Exponent is clamped; the cap below bounds the window anyway.
            let exponent = (entry.consecutive_failures - self.params.failure_threshold).min(31);
            let cooldown_ms = self
                .params
                .base_cooldown_ms
                .saturating_mul(1i64 << exponent)
                .min(self.params.max_cooldown_ms);
            entry.open_until = Some(now + Duration::milliseconds(cooldown_ms));
            tracing::warn!(
                ref_key,
                failures = entry.consecutive_failures,
                cooldown_ms,
                "circuit opened"
            );
        }
    }

    pub fn is_open(&self, ref_key: &str) -> bool {
        self.is_open_at(ref_key, Utc::now())
    }

    pub fn is_open_at(&self, ref_key: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .lock()
            .get(ref_key)
            .and_then(|e| e.open_until)
            .map(|until| now < until)
            .unwrap_or(false)
    }

    pub fn penalty(&self, ref_key: &str) -> i64 {
        self.penalty_at(ref_key, Utc::now())
    }

    pub fn penalty_at(&self, ref_key: &str, now: DateTime<Utc>) -> i64 {
        let entries = self.entries.lock();
        match entries.get(ref_key) {
            Some(entry) => {
                if entry.open_until.map(|until| now < until).unwrap_or(false) {
                    self.params.open_circuit_penalty
                } else {
                    entry.consecutive_failures as i64 * self.params.penalty_per_failure
                }
            }
            None => 0,
        }
    }

    // ── Persistence ────────────────────────────────────────────────

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            version: SNAPSHOT_VERSION,
            entries: self.entries.lock().clone(),
        }
    }

    /// Load a snapshot, replacing current entries. Snapshots from a
    /// different version are discarded.
    pub fn restore(&self, snapshot: BreakerSnapshot) {
        if snapshot.version != SNAPSHOT_VERSION {
            tracing::warn!(
                version = snapshot.version,
                "discarding breaker snapshot with unknown version"
            );
            return;
        }
        *self.entries.lock() = snapshot.entries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerParams::default())
    }

    #[test]
    fn below_threshold_stays_closed_with_linear_penalty() {
        let b = breaker();
        let now = Utc::now();
        b.record_failure_at("p:m", now);
        assert!(!b.is_open_at("p:m", now));
        assert_eq!(b.penalty_at("p:m", now), 1000);
    }

    #[test]
    fn threshold_failure_opens_with_base_cooldown() {
        let b = breaker();
        let now = Utc::now();
        b.record_failure_at("p:m", now);
        b.record_failure_at("p:m", now);
        assert!(b.is_open_at("p:m", now));
        assert_eq!(b.penalty_at("p:m", now), 1_000_000);

        // Open exactly base_cooldown past the failure.
        let just_before = now + Duration::milliseconds(5 * 60 * 1000 - 1);
        let just_after = now + Duration::milliseconds(5 * 60 * 1000 + 1);
        assert!(b.is_open_at("p:m", just_before));
        assert!(!b.is_open_at("p:m", just_after));
    }

    #[test]
    fn cooldown_doubles_per_failure_and_caps_at_max() {
        let params = BreakerParams::default();
        let b = CircuitBreaker::new(params.clone());
        let now = Utc::now();

        // threshold + k failures → base * 2^k, capped.
        for _ in 0..3 {
            b.record_failure_at("p:m", now);
        }
        // k = 1 → 10 minutes.
        let ten_min = now + Duration::milliseconds(10 * 60 * 1000 - 1);
        assert!(b.is_open_at("p:m", ten_min));

        for _ in 0..10 {
            b.record_failure_at("p:m", now);
        }
        // Deep failure count: capped at max_cooldown (60 min).
        let under_hour = now + Duration::milliseconds(params.max_cooldown_ms - 1);
        let over_hour = now + Duration::milliseconds(params.max_cooldown_ms + 1);
        assert!(b.is_open_at("p:m", under_hour));
        assert!(!b.is_open_at("p:m", over_hour));
    }

    #[test]
    fn success_resets_entry() {
        let b = breaker();
        let now = Utc::now();
        b.record_failure_at("p:m", now);
        b.record_failure_at("p:m", now);
        assert!(b.is_open_at("p:m", now));

        b.record_success("p:m");
        assert!(!b.is_open_at("p:m", now));
        assert_eq!(b.penalty_at("p:m", now), 0);
    }

    #[test]
    fn closed_but_failing_entry_carries_linear_penalty_after_cooldown() {
        let b = breaker();
        let now = Utc::now();
        b.record_failure_at("p:m", now);
        b.record_failure_at("p:m", now);
        let later = now + Duration::hours(2);
        assert!(!b.is_open_at("p:m", later));
        assert_eq!(b.penalty_at("p:m", later), 2000);
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let b = breaker();
        let now = Utc::now();
        b.record_failure_at("p:m", now);
        b.record_failure_at("q:n", now);

        let snapshot = b.snapshot();
        let restored = breaker();
        restored.restore(snapshot);
        assert_eq!(restored.penalty_at("p:m", now), 1000);
        assert_eq!(restored.penalty_at("q:n", now), 1000);
    }

    #[test]
    fn unknown_snapshot_version_is_discarded() {
        let b = breaker();
        let now = Utc::now();
        b.record_failure_at("p:m", now);
        b.restore(BreakerSnapshot {
            version: 99,
            entries: HashMap::new(),
        });
        // Existing state untouched.
        assert_eq!(b.penalty_at("p:m", now), 1000);
    }

    #[test]
    fn snapshot_serializes_with_camel_case_keys() {
        let b = breaker();
        b.record_failure_at("p:m", Utc::now());
        let json = serde_json::to_value(b.snapshot()).expect("serialize");
        let entry = &json["entries"]["p:m"];
        assert!(entry.get("consecutiveFailures").is_some());
        assert!(entry.get("lastFailureAt").is_some());
    }
}
