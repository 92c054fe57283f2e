//! Journaling wrapper — transactional rollback for one attempt.
//!
//! Before each mutating operation the journal captures the inverse (the
//! prior bytes, or their absence) and then forwards the operation to the
//! base workspace. `rollback` replays the journal in reverse; errors
//! during the unwind are swallowed so the best-effort restore always runs
//! to completion.

use std::sync::Arc;

use parking_lot::Mutex;

use ua_domain::Result;

use crate::port::{FileStat, Workspace};

enum JournalOp {
    Write {
        path: String,
        before: Option<Vec<u8>>,
    },
    Delete {
        path: String,
        before: Option<Vec<u8>>,
    },
    Rename {
        from: String,
        to: String,
        before_from: Option<Vec<u8>>,
        before_to: Option<Vec<u8>>,
    },
}

pub struct JournalWorkspace {
    base: Arc<dyn Workspace>,
    ops: Mutex<Vec<JournalOp>>,
}

impl JournalWorkspace {
    pub fn new(base: Arc<dyn Workspace>) -> Self {
        Self {
            base,
            ops: Mutex::new(Vec::new()),
        }
    }

    pub fn base(&self) -> &Arc<dyn Workspace> {
        &self.base
    }

    /// Number of journaled operations (introspection/test helper).
    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    async fn capture(&self, path: &str) -> Option<Vec<u8>> {
        self.base.read_file(path).await.ok()
    }

    /// Forget the journal, keeping all effects.
    pub fn commit(&self) {
        self.ops.lock().clear();
    }

    /// Replay the journal in reverse, restoring the pre-attempt state.
    pub async fn rollback(&self) {
        let ops: Vec<JournalOp> = {
            let mut guard = self.ops.lock();
            guard.drain(..).collect()
        };
        for op in ops.into_iter().rev() {
            let outcome = match op {
                JournalOp::Write { path, before } | JournalOp::Delete { path, before } => {
                    match before {
                        Some(bytes) => self.base.write_file(&path, &bytes).await,
                        None => self.base.delete_path(&path).await,
                    }
                }
                JournalOp::Rename {
                    from,
                    to,
                    before_from,
                    before_to,
                } => {
                    let first = match before_from {
                        Some(bytes) => self.base.write_file(&from, &bytes).await,
                        None => self.base.delete_path(&from).await,
                    };
                    let second = match before_to {
                        Some(bytes) => self.base.write_file(&to, &bytes).await,
                        None => self.base.delete_path(&to).await,
                    };
                    first.and(second)
                }
            };
            if let Err(e) = outcome {
                tracing::debug!(error = %e, "rollback step failed, continuing unwind");
            }
        }
    }
}

#[async_trait::async_trait]
impl Workspace for JournalWorkspace {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.base.read_file(path).await
    }

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let before = self.capture(path).await;
        self.base.write_file(path, bytes).await?;
        self.ops.lock().push(JournalOp::Write {
            path: path.to_owned(),
            before,
        });
        Ok(())
    }

    async fn delete_path(&self, path: &str) -> Result<()> {
        let before = self.capture(path).await;
        self.base.delete_path(path).await?;
        self.ops.lock().push(JournalOp::Delete {
            path: path.to_owned(),
            before,
        });
        Ok(())
    }

    async fn rename_path(&self, from: &str, to: &str) -> Result<()> {
        let before_from = self.capture(from).await;
        let before_to = self.capture(to).await;
        self.base.rename_path(from, to).await?;
        self.ops.lock().push(JournalOp::Rename {
            from: from.to_owned(),
            to: to.to_owned(),
            before_from,
            before_to,
        });
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        self.base.stat(path).await
    }

    async fn list_files(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        self.base.list_files(pattern).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemWorkspace;

    fn journaled(seed: &[(&str, &[u8])]) -> (Arc<MemWorkspace>, JournalWorkspace) {
        let base = Arc::new(MemWorkspace::with_files(seed));
        let journal = JournalWorkspace::new(base.clone());
        (base, journal)
    }

    #[tokio::test]
    async fn rollback_removes_created_file() {
        let (base, journal) = journaled(&[]);
        journal.write_file("new.txt", b"v1").await.expect("write");
        assert!(base.read_file("new.txt").await.is_ok());

        journal.rollback().await;
        assert!(base.read_file("new.txt").await.is_err());
    }

    #[tokio::test]
    async fn rollback_restores_overwritten_bytes() {
        let (base, journal) = journaled(&[("a.txt", b"original")]);
        journal.write_file("a.txt", b"changed").await.expect("write");
        journal.write_file("a.txt", b"changed again").await.expect("write");

        journal.rollback().await;
        assert_eq!(base.read_file("a.txt").await.expect("read"), b"original");
    }

    #[tokio::test]
    async fn rollback_restores_deleted_file() {
        let (base, journal) = journaled(&[("a.txt", b"keep me")]);
        journal.delete_path("a.txt").await.expect("delete");
        journal.rollback().await;
        assert_eq!(base.read_file("a.txt").await.expect("read"), b"keep me");
    }

    #[tokio::test]
    async fn rollback_undoes_rename_restoring_both_endpoints() {
        let (base, journal) = journaled(&[("from.txt", b"src"), ("to.txt", b"dst")]);
        journal.rename_path("from.txt", "to.txt").await.expect("rename");
        assert!(base.read_file("from.txt").await.is_err());

        journal.rollback().await;
        assert_eq!(base.read_file("from.txt").await.expect("read"), b"src");
        assert_eq!(base.read_file("to.txt").await.expect("read"), b"dst");
    }

    #[tokio::test]
    async fn mixed_sequence_round_trips_to_pre_attempt_state() {
        let (base, journal) = journaled(&[("a.txt", b"a0"), ("b.txt", b"b0")]);

        journal.write_file("a.txt", b"a1").await.expect("write");
        journal.rename_path("b.txt", "c.txt").await.expect("rename");
        journal.write_file("c.txt", b"c1").await.expect("write");
        journal.delete_path("a.txt").await.expect("delete");
        journal.write_file("d.txt", b"d0").await.expect("write");

        journal.rollback().await;

        assert_eq!(base.read_file("a.txt").await.expect("read"), b"a0");
        assert_eq!(base.read_file("b.txt").await.expect("read"), b"b0");
        assert!(base.read_file("c.txt").await.is_err());
        assert!(base.read_file("d.txt").await.is_err());
    }

    #[tokio::test]
    async fn commit_discards_journal() {
        let (base, journal) = journaled(&[]);
        journal.write_file("a.txt", b"v").await.expect("write");
        journal.commit();
        assert!(journal.is_empty());

        // Rollback after commit is a no-op.
        journal.rollback().await;
        assert_eq!(base.read_file("a.txt").await.expect("read"), b"v");
    }
}
