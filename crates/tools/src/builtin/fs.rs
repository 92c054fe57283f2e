//! Filesystem tools — file I/O through the run's workspace, with a
//! `file_change` event for every mutation.

use serde::Deserialize;
use serde_json::{json, Value};

use ua_domain::{AgentError, AgentEventKind, FileChange, FileChangeKind, Result, ToolSpec};
use ua_runtime::EventBus;
use ua_workspace::patch::{apply_hunk, apply_hunks, parse_unified_diff};

use crate::tool::{Tool, ToolExecutionContext};

fn bad_args(e: serde_json::Error) -> AgentError {
    AgentError::other(format!("invalid arguments: {e}"))
}

fn utf8(bytes: Vec<u8>, path: &str) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| AgentError::Workspace(format!("file '{path}' is not valid UTF-8")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs_read_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    #[serde(default)]
    max_bytes: Option<usize>,
}

pub struct FsReadFile {
    spec: ToolSpec,
}

impl Default for FsReadFile {
    fn default() -> Self {
        Self::new()
    }
}

impl FsReadFile {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new(
                "fs_read_file",
                "Read a UTF-8 text file from the workspace.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "max_bytes": { "type": "integer", "minimum": 1 }
                    },
                    "required": ["path"]
                }),
                &["fs:read"],
            ),
        }
    }
}

#[async_trait::async_trait]
impl Tool for FsReadFile {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value> {
        let args: ReadFileArgs = serde_json::from_value(args).map_err(bad_args)?;
        let bytes = ctx.workspace.read_file(&args.path).await?;
        let mut text = utf8(bytes, &args.path)?;
        if let Some(max) = args.max_bytes {
            if text.len() > max {
                // Truncate on a char boundary.
                let mut cut = max;
                while cut > 0 && !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
        }
        Ok(Value::String(text))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs_write_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

pub struct FsWriteFile {
    spec: ToolSpec,
    bus: EventBus,
    preview: bool,
}

impl FsWriteFile {
    pub fn new(bus: EventBus, preview: bool) -> Self {
        Self {
            spec: ToolSpec::new(
                "fs_write_file",
                "Create or overwrite a file in the workspace.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "content": { "type": "string" }
                    },
                    "required": ["path", "content"]
                }),
                &["fs:write"],
            ),
            bus,
            preview,
        }
    }
}

#[async_trait::async_trait]
impl Tool for FsWriteFile {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value> {
        let args: WriteFileArgs = serde_json::from_value(args).map_err(bad_args)?;
        let existed = ctx.workspace.stat(&args.path).await?.is_some();
        ctx.workspace.write_file(&args.path, args.content.as_bytes()).await?;
        self.bus.emit(AgentEventKind::FileChange {
            change: FileChange {
                kind: if existed {
                    FileChangeKind::Update
                } else {
                    FileChangeKind::Create
                },
                path: args.path,
                to_path: None,
                preview: self.preview,
                hunk_index: None,
                hunk_count: None,
            },
        });
        Ok(json!({ "ok": true }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs_delete_path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct DeletePathArgs {
    path: String,
}

pub struct FsDeletePath {
    spec: ToolSpec,
    bus: EventBus,
    preview: bool,
}

impl FsDeletePath {
    pub fn new(bus: EventBus, preview: bool) -> Self {
        Self {
            spec: ToolSpec::new(
                "fs_delete_path",
                "Delete a file or directory (recursively) from the workspace.",
                json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                }),
                &["fs:delete"],
            ),
            bus,
            preview,
        }
    }
}

#[async_trait::async_trait]
impl Tool for FsDeletePath {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value> {
        let args: DeletePathArgs = serde_json::from_value(args).map_err(bad_args)?;
        ctx.workspace.delete_path(&args.path).await?;
        self.bus.emit(AgentEventKind::FileChange {
            change: FileChange {
                kind: FileChangeKind::Delete,
                path: args.path,
                to_path: None,
                preview: self.preview,
                hunk_index: None,
                hunk_count: None,
            },
        });
        Ok(json!({ "ok": true }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs_rename_path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct RenamePathArgs {
    from_path: String,
    to_path: String,
}

pub struct FsRenamePath {
    spec: ToolSpec,
    bus: EventBus,
    preview: bool,
}

impl FsRenamePath {
    pub fn new(bus: EventBus, preview: bool) -> Self {
        Self {
            spec: ToolSpec::new(
                "fs_rename_path",
                "Rename or move a file within the workspace.",
                json!({
                    "type": "object",
                    "properties": {
                        "from_path": { "type": "string" },
                        "to_path": { "type": "string" }
                    },
                    "required": ["from_path", "to_path"]
                }),
                &["fs:rename"],
            ),
            bus,
            preview,
        }
    }
}

#[async_trait::async_trait]
impl Tool for FsRenamePath {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value> {
        let args: RenamePathArgs = serde_json::from_value(args).map_err(bad_args)?;
        ctx.workspace.rename_path(&args.from_path, &args.to_path).await?;
        self.bus.emit(AgentEventKind::FileChange {
            change: FileChange {
                kind: FileChangeKind::Rename,
                path: args.from_path,
                to_path: Some(args.to_path),
                preview: self.preview,
                hunk_index: None,
                hunk_count: None,
            },
        });
        Ok(json!({ "ok": true }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs_apply_patch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ApplyPatchArgs {
    patch: String,
    #[serde(default)]
    incremental: bool,
}

pub struct FsApplyPatch {
    spec: ToolSpec,
    bus: EventBus,
    preview: bool,
}

impl FsApplyPatch {
    pub fn new(bus: EventBus, preview: bool) -> Self {
        Self {
            spec: ToolSpec::new(
                "fs_apply_patch",
                "Apply a unified diff to workspace files. With `incremental`, \
                 each hunk is written and reported as it lands.",
                json!({
                    "type": "object",
                    "properties": {
                        "patch": { "type": "string" },
                        "incremental": { "type": "boolean" }
                    },
                    "required": ["patch"]
                }),
                &["fs:write"],
            ),
            bus,
            preview,
        }
    }

    fn emit_change(&self, kind: FileChangeKind, path: &str, hunk: Option<(usize, usize)>) {
        self.bus.emit(AgentEventKind::FileChange {
            change: FileChange {
                kind,
                path: path.to_owned(),
                to_path: None,
                preview: self.preview,
                hunk_index: hunk.map(|(i, _)| i),
                hunk_count: hunk.map(|(_, n)| n),
            },
        });
    }
}

#[async_trait::async_trait]
impl Tool for FsApplyPatch {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value> {
        let args: ApplyPatchArgs = serde_json::from_value(args).map_err(bad_args)?;
        let files = parse_unified_diff(&args.patch)?;
        let mut results = Vec::with_capacity(files.len());

        for file in &files {
            let existed = ctx.workspace.stat(&file.path).await?.is_some();
            let content = if existed {
                utf8(ctx.workspace.read_file(&file.path).await?, &file.path)?
            } else {
                String::new()
            };

            let hunk_count = file.hunks.len();
            let mut hunks_applied = 0usize;

            if args.incremental {
                let had_trailing = content.ends_with('\n') || content.is_empty();
                let mut lines: Vec<String> = if content.is_empty() {
                    Vec::new()
                } else {
                    let mut v: Vec<String> =
                        content.split('\n').map(str::to_owned).collect();
                    if content.ends_with('\n') {
                        v.pop();
                    }
                    v
                };
                for (idx, hunk) in file.hunks.iter().enumerate() {
                    apply_hunk(&mut lines, hunk)?;
                    hunks_applied += 1;
                    let mut out = lines.join("\n");
                    if had_trailing && !out.is_empty() {
                        out.push('\n');
                    }
                    ctx.workspace.write_file(&file.path, out.as_bytes()).await?;
                    self.emit_change(
                        FileChangeKind::PatchHunk,
                        &file.path,
                        Some((idx, hunk_count)),
                    );
                }
            } else {
                let out = apply_hunks(&content, &file.hunks)?;
                hunks_applied = hunk_count;
                ctx.workspace.write_file(&file.path, out.as_bytes()).await?;
                self.emit_change(
                    if existed {
                        FileChangeKind::Update
                    } else {
                        FileChangeKind::Create
                    },
                    &file.path,
                    None,
                );
            }

            results.push(json!({
                "path": file.path,
                "hunks_applied": hunks_applied,
            }));
        }

        Ok(json!({ "ok": true, "results": results }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ua_domain::AgentEventKind;
    use ua_memory::{MemoryPool, MemoryScope};
    use ua_workspace::MemWorkspace;

    fn context(seed: &[(&str, &[u8])]) -> (ToolExecutionContext, EventBus) {
        let pool = Arc::new(MemoryPool::default());
        let ctx = ToolExecutionContext::new(
            Arc::new(MemWorkspace::with_files(seed)),
            MemoryScope::new(pool, "test"),
        );
        (ctx, EventBus::new())
    }

    fn file_changes(bus: &EventBus) -> Vec<FileChange> {
        bus.snapshot()
            .iter()
            .filter_map(|e| match &e.kind {
                AgentEventKind::FileChange { change } => Some(change.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn read_file_with_max_bytes() {
        let (ctx, _bus) = context(&[("a.txt", "hello world".as_bytes())]);
        let tool = FsReadFile::new();
        let out = tool
            .execute(json!({"path": "a.txt", "max_bytes": 5}), &ctx)
            .await
            .expect("read");
        assert_eq!(out, json!("hello"));
    }

    #[tokio::test]
    async fn write_emits_create_then_update() {
        let (ctx, bus) = context(&[]);
        let tool = FsWriteFile::new(bus.clone(), false);
        tool.execute(json!({"path": "a.txt", "content": "v1"}), &ctx)
            .await
            .expect("write");
        tool.execute(json!({"path": "a.txt", "content": "v2"}), &ctx)
            .await
            .expect("write");

        let changes = file_changes(&bus);
        assert_eq!(changes[0].kind, FileChangeKind::Create);
        assert_eq!(changes[1].kind, FileChangeKind::Update);
        assert!(!changes[0].preview);
    }

    #[tokio::test]
    async fn preview_flag_is_carried_on_changes() {
        let (ctx, bus) = context(&[]);
        let tool = FsWriteFile::new(bus.clone(), true);
        tool.execute(json!({"path": "p.txt", "content": "x"}), &ctx)
            .await
            .expect("write");
        assert!(file_changes(&bus)[0].preview);
    }

    #[tokio::test]
    async fn rename_carries_both_paths() {
        let (ctx, bus) = context(&[("old.txt", b"v")]);
        let tool = FsRenamePath::new(bus.clone(), false);
        tool.execute(json!({"from_path": "old.txt", "to_path": "new.txt"}), &ctx)
            .await
            .expect("rename");
        let change = &file_changes(&bus)[0];
        assert_eq!(change.kind, FileChangeKind::Rename);
        assert_eq!(change.path, "old.txt");
        assert_eq!(change.to_path.as_deref(), Some("new.txt"));
    }

    #[tokio::test]
    async fn apply_patch_batch_mode() {
        let (ctx, bus) = context(&[("hello.txt", b"hello\nworld\n")]);
        let tool = FsApplyPatch::new(bus.clone(), false);
        let patch = "--- a/hello.txt\n+++ b/hello.txt\n@@ -1,2 +1,2 @@\n hello\n-world\n+rust\n";
        let out = tool
            .execute(json!({"patch": patch}), &ctx)
            .await
            .expect("apply");
        assert_eq!(out["ok"], json!(true));
        assert_eq!(out["results"][0]["hunks_applied"], json!(1));
        assert_eq!(
            ctx.workspace.read_file("hello.txt").await.expect("read"),
            b"hello\nrust\n"
        );
        assert_eq!(file_changes(&bus)[0].kind, FileChangeKind::Update);
    }

    #[tokio::test]
    async fn apply_patch_incremental_emits_hunk_events() {
        let (ctx, bus) = context(&[("list.txt", b"one\ntwo\nthree\nfour\nfive\n")]);
        let tool = FsApplyPatch::new(bus.clone(), false);
        let patch = "--- a/list.txt\n+++ b/list.txt\n\
                     @@ -1,2 +1,2 @@\n-one\n+ONE\n two\n\
                     @@ -4,2 +4,3 @@\n four\n five\n+six\n";
        tool.execute(json!({"patch": patch, "incremental": true}), &ctx)
            .await
            .expect("apply");

        let changes = file_changes(&bus);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, FileChangeKind::PatchHunk);
        assert_eq!(changes[0].hunk_index, Some(0));
        assert_eq!(changes[0].hunk_count, Some(2));
        assert_eq!(changes[1].hunk_index, Some(1));
        assert_eq!(
            ctx.workspace.read_file("list.txt").await.expect("read"),
            b"ONE\ntwo\nthree\nfour\nfive\nsix\n"
        );
    }

    #[tokio::test]
    async fn apply_patch_with_drift_reanchors_and_reports_hunk() {
        // The file gained a leading line, so the hunk's declared start is
        // off by one; the unique first context line re-anchors it.
        let (ctx, bus) = context(&[("doc.txt", b"preamble\nhello\nworld\n")]);
        let tool = FsApplyPatch::new(bus.clone(), false);
        let patch = "--- a/doc.txt\n+++ b/doc.txt\n@@ -1,2 +1,2 @@\n hello\n-world\n+rust\n";
        let out = tool
            .execute(json!({"patch": patch, "incremental": true}), &ctx)
            .await
            .expect("apply");
        assert_eq!(out["results"][0]["hunks_applied"], json!(1));
        assert_eq!(
            ctx.workspace.read_file("doc.txt").await.expect("read"),
            b"preamble\nhello\nrust\n"
        );

        let changes = file_changes(&bus);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, FileChangeKind::PatchHunk);
        assert_eq!(changes[0].hunk_index, Some(0));
        assert_eq!(changes[0].hunk_count, Some(1));
    }

    #[tokio::test]
    async fn apply_patch_failing_hunk_does_not_write() {
        let (ctx, bus) = context(&[("a.txt", b"unrelated\ncontent\n")]);
        let tool = FsApplyPatch::new(bus.clone(), false);
        let patch = "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n expected\n-missing\n+present\n";
        let err = tool
            .execute(json!({"patch": patch}), &ctx)
            .await
            .expect_err("mismatch");
        assert!(err.to_string().contains("does not match"));
        assert_eq!(
            ctx.workspace.read_file("a.txt").await.expect("read"),
            b"unrelated\ncontent\n"
        );
        assert!(file_changes(&bus).is_empty());
    }
}
