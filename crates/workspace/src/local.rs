//! Filesystem-backed workspace rooted at a directory.
//!
//! Relative paths are resolved against the root and validated: `..`
//! components are rejected before any resolution, and the resolved path
//! must stay inside the root. Absolute paths are passed through untouched
//! for callers that deliberately point outside a sandbox.

use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use tokio::fs;

use ua_domain::{AgentError, Result};

use crate::port::{FileStat, Workspace};

pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a requested path. Relative paths must not contain `..` and
    /// must stay inside the root once joined.
    fn resolve(&self, requested: &str) -> Result<PathBuf> {
        let requested_path = Path::new(requested);
        if requested_path.is_absolute() {
            return Ok(requested_path.to_path_buf());
        }
        for component in requested_path.components() {
            if matches!(component, Component::ParentDir) {
                return Err(AgentError::Workspace(format!(
                    "path '{requested}' must not contain '..' components"
                )));
            }
        }
        Ok(self.root.join(requested_path))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn walk(dir: &Path, root: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                Self::walk(&path, root, out)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Workspace for LocalWorkspace {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        Ok(fs::read(&resolved).await?)
    }

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let resolved = self.resolve(path)?;
        Self::ensure_parent(&resolved).await?;
        fs::write(&resolved, bytes).await?;
        Ok(())
    }

    async fn delete_path(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        let meta = fs::metadata(&resolved).await?;
        if meta.is_dir() {
            fs::remove_dir_all(&resolved).await?;
        } else {
            fs::remove_file(&resolved).await?;
        }
        Ok(())
    }

    async fn rename_path(&self, from: &str, to: &str) -> Result<()> {
        let from_resolved = self.resolve(from)?;
        let to_resolved = self.resolve(to)?;
        Self::ensure_parent(&to_resolved).await?;
        fs::rename(&from_resolved, &to_resolved).await?;
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let resolved = self.resolve(path)?;
        match fs::metadata(&resolved).await {
            Ok(meta) => {
                let mtime_ms = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as i64);
                Ok(Some(FileStat {
                    is_file: meta.is_file(),
                    is_directory: meta.is_dir(),
                    mtime_ms,
                    size: meta.is_file().then(|| meta.len()),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_files(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let root = self.root.clone();
        let mut files = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            if root.exists() {
                Self::walk(&root, &root, &mut out)?;
            }
            Ok::<_, std::io::Error>(out)
        })
        .await
        .map_err(|e| AgentError::Workspace(format!("list task failed: {e}")))??;

        if let Some(pat) = pattern {
            let matcher = Pattern::new(pat)
                .map_err(|e| AgentError::Workspace(format!("invalid glob '{pat}': {e}")))?;
            files.retain(|f| matcher.matches(f));
        }
        files.sort();
        Ok(files)
    }
}
