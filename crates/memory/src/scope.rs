use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::pool::{FileSnapshot, MemoryPool};

/// A namespaced view over a shared [`MemoryPool`].
///
/// Every key is transparently prefixed with `"{namespace}:"`, so
/// concurrent runs (or sub-agents) sharing one pool cannot observe each
/// other's entries unless they share a namespace.
#[derive(Clone)]
pub struct MemoryScope {
    pool: Arc<MemoryPool>,
    prefix: String,
}

impl MemoryScope {
    pub fn new(pool: Arc<MemoryPool>, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: format!("{}:", namespace.into()),
        }
    }

    /// A deeper scope nested under this one.
    pub fn child(&self, namespace: &str) -> Self {
        Self {
            pool: self.pool.clone(),
            prefix: format!("{}{}:", self.prefix, namespace),
        }
    }

    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    // ── kv ─────────────────────────────────────────────────────────

    pub fn kv_get(&self, key: &str) -> Option<Value> {
        self.pool.kv.get(&self.key(key))
    }

    pub fn kv_set(&self, key: &str, value: Value) {
        self.pool.kv.set(self.key(key), value);
    }

    pub fn kv_set_with_ttl(&self, key: &str, value: Value, ttl: Option<Duration>) {
        self.pool.kv.set_with_ttl(self.key(key), value, ttl);
    }

    pub fn kv_remove(&self, key: &str) -> bool {
        self.pool.kv.remove(&self.key(key))
    }

    // ── embeddings ─────────────────────────────────────────────────

    pub fn embedding_get(&self, key: &str) -> Option<Vec<f32>> {
        self.pool.embeddings.get(&self.key(key))
    }

    pub fn embedding_set(&self, key: &str, vector: Vec<f32>) {
        self.pool.embeddings.set(self.key(key), vector);
    }

    // ── file snapshots ─────────────────────────────────────────────

    pub fn snapshot_get(&self, path: &str) -> Option<FileSnapshot> {
        self.pool.file_snapshots.get(&self.key(path))
    }

    pub fn snapshot_set(&self, path: &str, snapshot: FileSnapshot) {
        self.pool.file_snapshots.set(self.key(path), snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scopes_are_isolated() {
        let pool = Arc::new(MemoryPool::default());
        let a = MemoryScope::new(pool.clone(), "run-a");
        let b = MemoryScope::new(pool.clone(), "run-b");

        a.kv_set("shared-key", json!("from-a"));
        assert_eq!(a.kv_get("shared-key"), Some(json!("from-a")));
        assert_eq!(b.kv_get("shared-key"), None);

        // The underlying pool sees the prefixed key.
        assert_eq!(pool.kv.get("run-a:shared-key"), Some(json!("from-a")));
    }

    #[test]
    fn child_scope_nests_prefixes() {
        let pool = Arc::new(MemoryPool::default());
        let run = MemoryScope::new(pool.clone(), "run-1");
        let agent = run.child("agent-x");
        agent.kv_set("k", json!(1));
        assert_eq!(pool.kv.get("run-1:agent-x:k"), Some(json!(1)));
        assert_eq!(run.kv_get("k"), None);
    }

    #[test]
    fn embeddings_and_snapshots_scoped() {
        let pool = Arc::new(MemoryPool::default());
        let scope = MemoryScope::new(pool, "s");
        scope.embedding_set("doc", vec![1.0, 2.0]);
        assert_eq!(scope.embedding_get("doc"), Some(vec![1.0, 2.0]));

        scope.snapshot_set("a.txt", FileSnapshot::of(b"v1".to_vec()));
        assert_eq!(scope.snapshot_get("a.txt").expect("snapshot").bytes, b"v1");
    }
}
