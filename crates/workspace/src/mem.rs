//! In-memory workspace, used as the hermetic test substrate and for
//! preview runs that never touch disk.

use std::collections::HashMap;

use chrono::Utc;
use glob::Pattern;
use parking_lot::Mutex;

use ua_domain::{AgentError, Result};

use crate::port::{FileStat, Workspace};

struct FileEntry {
    bytes: Vec<u8>,
    mtime_ms: i64,
}

#[derive(Default)]
pub struct MemWorkspace {
    files: Mutex<HashMap<String, FileEntry>>,
}

fn normalize(path: &str) -> String {
    path.trim_start_matches("./").to_owned()
}

fn not_found(path: &str) -> AgentError {
    AgentError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no such file: {path}"),
    ))
}

impl MemWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the workspace with initial contents (test helper).
    pub fn with_files(files: &[(&str, &[u8])]) -> Self {
        let ws = Self::new();
        {
            let mut map = ws.files.lock();
            for (path, bytes) in files {
                map.insert(
                    normalize(path),
                    FileEntry {
                        bytes: bytes.to_vec(),
                        mtime_ms: Utc::now().timestamp_millis(),
                    },
                );
            }
        }
        ws
    }
}

#[async_trait::async_trait]
impl Workspace for MemWorkspace {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let key = normalize(path);
        self.files
            .lock()
            .get(&key)
            .map(|e| e.bytes.clone())
            .ok_or_else(|| not_found(&key))
    }

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.files.lock().insert(
            normalize(path),
            FileEntry {
                bytes: bytes.to_vec(),
                mtime_ms: Utc::now().timestamp_millis(),
            },
        );
        Ok(())
    }

    async fn delete_path(&self, path: &str) -> Result<()> {
        let key = normalize(path);
        let mut files = self.files.lock();
        if files.remove(&key).is_some() {
            return Ok(());
        }
        // Recursive delete: drop everything under the directory prefix.
        let prefix = format!("{key}/");
        let before = files.len();
        files.retain(|k, _| !k.starts_with(&prefix));
        if files.len() == before {
            return Err(not_found(&key));
        }
        Ok(())
    }

    async fn rename_path(&self, from: &str, to: &str) -> Result<()> {
        let from_key = normalize(from);
        let to_key = normalize(to);
        let mut files = self.files.lock();
        match files.remove(&from_key) {
            Some(entry) => {
                files.insert(to_key, entry);
                Ok(())
            }
            None => Err(not_found(&from_key)),
        }
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let key = normalize(path);
        let files = self.files.lock();
        if let Some(entry) = files.get(&key) {
            return Ok(Some(FileStat::file(
                entry.bytes.len() as u64,
                Some(entry.mtime_ms),
            )));
        }
        let prefix = format!("{key}/");
        if files.keys().any(|k| k.starts_with(&prefix)) {
            return Ok(Some(FileStat::directory()));
        }
        Ok(None)
    }

    async fn list_files(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let files = self.files.lock();
        let mut out: Vec<String> = files.keys().cloned().collect();
        if let Some(pat) = pattern {
            let matcher = Pattern::new(pat)
                .map_err(|e| AgentError::Workspace(format!("invalid glob '{pat}': {e}")))?;
            out.retain(|f| matcher.matches(f));
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_write_delete_cycle() {
        let ws = MemWorkspace::new();
        ws.write_file("a.txt", b"one").await.expect("write");
        assert_eq!(ws.read_file("a.txt").await.expect("read"), b"one");
        ws.delete_path("a.txt").await.expect("delete");
        assert!(ws.read_file("a.txt").await.is_err());
    }

    #[tokio::test]
    async fn directory_semantics_from_prefixes() {
        let ws = MemWorkspace::with_files(&[("dir/a.txt", b"1"), ("dir/b.txt", b"2")]);
        let stat = ws.stat("dir").await.expect("stat").expect("dir");
        assert!(stat.is_directory);
        ws.delete_path("dir").await.expect("delete");
        assert!(ws.stat("dir").await.expect("stat").is_none());
    }

    #[tokio::test]
    async fn rename_moves_content() {
        let ws = MemWorkspace::with_files(&[("a.txt", b"v")]);
        ws.rename_path("a.txt", "b.txt").await.expect("rename");
        assert!(ws.read_file("a.txt").await.is_err());
        assert_eq!(ws.read_file("b.txt").await.expect("read"), b"v");
    }

    #[tokio::test]
    async fn rename_missing_source_errors() {
        let ws = MemWorkspace::new();
        assert!(ws.rename_path("missing", "b").await.is_err());
    }
}
