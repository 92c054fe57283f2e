use serde::{Deserialize, Serialize};

use ua_domain::Result;

/// Metadata for one workspace path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStat {
    pub is_file: bool,
    pub is_directory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FileStat {
    pub fn file(size: u64, mtime_ms: Option<i64>) -> Self {
        Self {
            is_file: true,
            is_directory: false,
            mtime_ms,
            size: Some(size),
        }
    }

    pub fn directory() -> Self {
        Self {
            is_file: false,
            is_directory: true,
            mtime_ms: None,
            size: None,
        }
    }
}

/// Uniform file I/O surface.
///
/// Paths are workspace-relative unless absolute; bytes are opaque — no
/// encoding policy at this layer. Implementations create missing parent
/// directories on write and rename, and delete recursively.
#[async_trait::async_trait]
pub trait Workspace: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()>;

    async fn delete_path(&self, path: &str) -> Result<()>;

    async fn rename_path(&self, from: &str, to: &str) -> Result<()>;

    /// `None` when the path does not exist.
    async fn stat(&self, path: &str) -> Result<Option<FileStat>>;

    /// Relative paths of all files, optionally filtered by a glob pattern.
    async fn list_files(&self, pattern: Option<&str>) -> Result<Vec<String>>;
}
