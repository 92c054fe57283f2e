//! Preview wrapper — buffers every mutation in an in-memory overlay.
//!
//! The base workspace stays untouched until `commit`, which applies
//! renames, then writes, then deletes. Reads consult the overlay first:
//! a pending write serves its buffered bytes, a pending delete reads as
//! absent, and a renamed path resolves through the rename chain to the
//! base content.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use ua_domain::{AgentError, Result};

use crate::port::{FileStat, Workspace};

#[derive(Clone)]
enum PendingFile {
    Write {
        bytes: Vec<u8>,
        existed_before: bool,
    },
    Delete {
        existed_before: bool,
    },
}

#[derive(Clone)]
struct RenameEntry {
    from: String,
    to: String,
    existed_before: bool,
}

#[derive(Default)]
struct Overlay {
    files: HashMap<String, PendingFile>,
    renames: Vec<RenameEntry>,
}

pub struct PreviewWorkspace {
    base: Arc<dyn Workspace>,
    overlay: Mutex<Overlay>,
}

fn not_found(path: &str) -> AgentError {
    AgentError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no such file: {path}"),
    ))
}

impl PreviewWorkspace {
    pub fn new(base: Arc<dyn Workspace>) -> Self {
        Self {
            base,
            overlay: Mutex::new(Overlay::default()),
        }
    }

    pub fn base(&self) -> &Arc<dyn Workspace> {
        &self.base
    }

    /// Number of buffered file entries plus renames.
    pub fn pending_count(&self) -> usize {
        let overlay = self.overlay.lock();
        overlay.files.len() + overlay.renames.len()
    }

    /// Resolve a read path through the overlay. Returns the buffered
    /// bytes, `Err` for a pending delete / renamed-away path, or the
    /// base path the caller should read instead.
    fn resolve_source(&self, path: &str) -> Result<ResolvedRead> {
        let overlay = self.overlay.lock();
        if let Some(entry) = overlay.files.get(path) {
            return match entry {
                PendingFile::Write { bytes, .. } => Ok(ResolvedRead::Buffered(bytes.clone())),
                PendingFile::Delete { .. } => Err(not_found(path)),
            };
        }
        // Follow the rename chain backwards: a path that is the target of
        // a rename reads the (possibly repeatedly renamed) source.
        let mut current = path.to_owned();
        let mut hopped = false;
        loop {
            match overlay.renames.iter().rev().find(|r| r.to == current) {
                Some(r) => {
                    current = r.from.clone();
                    hopped = true;
                }
                None => break,
            }
        }
        if !hopped && overlay.renames.iter().any(|r| r.from == path) {
            return Err(not_found(path));
        }
        Ok(ResolvedRead::Base(current))
    }

    /// Whether the path currently exists through the overlay view.
    async fn exists(&self, path: &str) -> Result<bool> {
        match self.resolve_source(path) {
            Ok(ResolvedRead::Buffered(_)) => Ok(true),
            Ok(ResolvedRead::Base(base_path)) => {
                Ok(self.base.stat(&base_path).await?.is_some())
            }
            Err(_) => Ok(false),
        }
    }

    /// Apply the overlay to the base: renames, then writes, then deletes.
    pub async fn commit(&self) -> Result<()> {
        let overlay = {
            let mut guard = self.overlay.lock();
            std::mem::take(&mut *guard)
        };
        for r in &overlay.renames {
            self.base.rename_path(&r.from, &r.to).await?;
        }
        for (path, entry) in &overlay.files {
            if let PendingFile::Write { bytes, .. } = entry {
                self.base.write_file(path, bytes).await?;
            }
        }
        for (path, entry) in &overlay.files {
            if let PendingFile::Delete { existed_before } = entry {
                if *existed_before {
                    self.base.delete_path(path).await?;
                }
            }
        }
        Ok(())
    }

    /// Drop the overlay, leaving the base untouched.
    pub fn discard(&self) {
        *self.overlay.lock() = Overlay::default();
    }
}

enum ResolvedRead {
    Buffered(Vec<u8>),
    Base(String),
}

#[async_trait::async_trait]
impl Workspace for PreviewWorkspace {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        match self.resolve_source(path)? {
            ResolvedRead::Buffered(bytes) => Ok(bytes),
            ResolvedRead::Base(base_path) => self.base.read_file(&base_path).await,
        }
    }

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let existed_before = self.exists(path).await?;
        self.overlay.lock().files.insert(
            path.to_owned(),
            PendingFile::Write {
                bytes: bytes.to_vec(),
                existed_before,
            },
        );
        Ok(())
    }

    async fn delete_path(&self, path: &str) -> Result<()> {
        if !self.exists(path).await? {
            return Err(not_found(path));
        }
        // Deleting the target of a pending rename cancels the rename chain
        // and deletes the original source instead.
        let (target, known_existed) = {
            let mut overlay = self.overlay.lock();
            let mut current = path.to_owned();
            let mut known = None;
            while let Some(idx) = overlay.renames.iter().rposition(|r| r.to == current) {
                let entry = overlay.renames.remove(idx);
                known = Some(entry.existed_before);
                current = entry.from;
            }
            (current, known)
        };
        let existed_in_base = match known_existed {
            Some(existed) => existed,
            None => self.base.stat(&target).await?.is_some(),
        };
        self.overlay.lock().files.insert(
            target,
            PendingFile::Delete {
                existed_before: existed_in_base,
            },
        );
        Ok(())
    }

    async fn rename_path(&self, from: &str, to: &str) -> Result<()> {
        if !self.exists(from).await? {
            return Err(not_found(from));
        }
        let from_in_base = self.base.stat(from).await?.is_some();
        let mut overlay = self.overlay.lock();
        match overlay.files.remove(from) {
            Some(PendingFile::Write { bytes, .. }) => {
                // A buffered write moves with the rename; the base side of
                // `from` (if any) still needs a delete at commit.
                let to_existed = overlay.files.contains_key(to);
                overlay.files.insert(
                    to.to_owned(),
                    PendingFile::Write {
                        bytes,
                        existed_before: to_existed,
                    },
                );
                if from_in_base {
                    overlay.files.insert(
                        from.to_owned(),
                        PendingFile::Delete {
                            existed_before: true,
                        },
                    );
                }
            }
            Some(entry @ PendingFile::Delete { .. }) => {
                overlay.files.insert(from.to_owned(), entry);
                return Err(not_found(from));
            }
            None => {
                overlay.renames.push(RenameEntry {
                    from: from.to_owned(),
                    to: to.to_owned(),
                    existed_before: from_in_base,
                });
            }
        }
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        match self.resolve_source(path) {
            Ok(ResolvedRead::Buffered(bytes)) => Ok(Some(FileStat::file(
                bytes.len() as u64,
                Some(Utc::now().timestamp_millis()),
            ))),
            Ok(ResolvedRead::Base(base_path)) => self.base.stat(&base_path).await,
            Err(_) => Ok(None),
        }
    }

    async fn list_files(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let mut names: std::collections::BTreeSet<String> =
            self.base.list_files(None).await?.into_iter().collect();
        {
            let overlay = self.overlay.lock();
            for r in &overlay.renames {
                names.remove(&r.from);
                names.insert(r.to.clone());
            }
            for (path, entry) in &overlay.files {
                match entry {
                    PendingFile::Write { .. } => {
                        names.insert(path.clone());
                    }
                    PendingFile::Delete { .. } => {
                        names.remove(path);
                    }
                }
            }
        }
        let mut out: Vec<String> = names.into_iter().collect();
        if let Some(pat) = pattern {
            let matcher = glob::Pattern::new(pat)
                .map_err(|e| AgentError::Workspace(format!("invalid glob '{pat}': {e}")))?;
            out.retain(|f| matcher.matches(f));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemWorkspace;

    fn preview(seed: &[(&str, &[u8])]) -> (Arc<MemWorkspace>, PreviewWorkspace) {
        let base = Arc::new(MemWorkspace::with_files(seed));
        let preview = PreviewWorkspace::new(base.clone());
        (base, preview)
    }

    #[tokio::test]
    async fn writes_stay_in_overlay_until_commit() {
        let (base, preview) = preview(&[]);
        preview.write_file("b.txt", b"hello").await.expect("write");

        assert!(base.read_file("b.txt").await.is_err());
        assert_eq!(preview.read_file("b.txt").await.expect("read"), b"hello");

        preview.commit().await.expect("commit");
        assert_eq!(base.read_file("b.txt").await.expect("read"), b"hello");
    }

    #[tokio::test]
    async fn discard_leaves_base_unchanged() {
        let (base, preview) = preview(&[("a.txt", b"orig")]);
        preview.write_file("a.txt", b"changed").await.expect("write");
        preview.delete_path("a.txt").await.expect("delete");
        preview.discard();

        assert_eq!(base.read_file("a.txt").await.expect("read"), b"orig");
        assert_eq!(preview.read_file("a.txt").await.expect("read"), b"orig");
    }

    #[tokio::test]
    async fn pending_delete_hides_file() {
        let (base, preview) = preview(&[("a.txt", b"v")]);
        preview.delete_path("a.txt").await.expect("delete");

        assert!(preview.read_file("a.txt").await.is_err());
        assert!(preview.stat("a.txt").await.expect("stat").is_none());
        assert_eq!(base.read_file("a.txt").await.expect("read"), b"v");

        preview.commit().await.expect("commit");
        assert!(base.read_file("a.txt").await.is_err());
    }

    #[tokio::test]
    async fn stat_of_pending_write_is_synthetic() {
        let (_base, preview) = preview(&[]);
        preview.write_file("new.txt", b"12345").await.expect("write");
        let stat = preview.stat("new.txt").await.expect("stat").expect("present");
        assert!(stat.is_file);
        assert_eq!(stat.size, Some(5));
    }

    #[tokio::test]
    async fn rename_resolves_reads_through_chain() {
        let (base, preview) = preview(&[("a.txt", b"content")]);
        preview.rename_path("a.txt", "b.txt").await.expect("rename");
        preview.rename_path("b.txt", "c.txt").await.expect("rename");

        assert!(preview.read_file("a.txt").await.is_err());
        assert!(preview.read_file("b.txt").await.is_err());
        assert_eq!(preview.read_file("c.txt").await.expect("read"), b"content");

        preview.commit().await.expect("commit");
        assert!(base.read_file("a.txt").await.is_err());
        assert_eq!(base.read_file("c.txt").await.expect("read"), b"content");
    }

    #[tokio::test]
    async fn write_after_rename_wins_at_commit() {
        let (base, preview) = preview(&[("a.txt", b"old")]);
        preview.rename_path("a.txt", "b.txt").await.expect("rename");
        preview.write_file("b.txt", b"new").await.expect("write");

        preview.commit().await.expect("commit");
        assert_eq!(base.read_file("b.txt").await.expect("read"), b"new");
        assert!(base.read_file("a.txt").await.is_err());
    }

    #[tokio::test]
    async fn overlay_write_moves_with_rename() {
        let (base, preview) = preview(&[]);
        preview.write_file("draft.txt", b"text").await.expect("write");
        preview.rename_path("draft.txt", "final.txt").await.expect("rename");

        assert!(preview.read_file("draft.txt").await.is_err());
        assert_eq!(preview.read_file("final.txt").await.expect("read"), b"text");

        preview.commit().await.expect("commit");
        assert!(base.read_file("draft.txt").await.is_err());
        assert_eq!(base.read_file("final.txt").await.expect("read"), b"text");
    }

    #[tokio::test]
    async fn delete_of_rename_target_cancels_the_rename() {
        let (base, preview) = preview(&[("a.txt", b"v")]);
        preview.rename_path("a.txt", "b.txt").await.expect("rename");
        preview.delete_path("b.txt").await.expect("delete");

        assert!(preview.read_file("a.txt").await.is_err());
        assert!(preview.read_file("b.txt").await.is_err());

        preview.commit().await.expect("commit");
        assert!(base.read_file("a.txt").await.is_err());
        assert!(base.read_file("b.txt").await.is_err());
    }

    #[tokio::test]
    async fn list_files_reflects_overlay() {
        let (_base, preview) = preview(&[("keep.txt", b""), ("gone.txt", b""), ("old.txt", b"")]);
        preview.delete_path("gone.txt").await.expect("delete");
        preview.rename_path("old.txt", "new.txt").await.expect("rename");
        preview.write_file("added.txt", b"").await.expect("write");

        let files = preview.list_files(None).await.expect("list");
        assert_eq!(files, vec!["added.txt", "keep.txt", "new.txt"]);
    }
}
