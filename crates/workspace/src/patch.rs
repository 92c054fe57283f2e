//! Unified-diff parsing and hunk application.
//!
//! Hunks apply at their declared `old_start` when every context and
//! delete line matches exactly. On a mismatch a single re-anchor pass
//! runs: the first context line of the hunk is located in the file and
//! the hunk is retried at the position it implies. Hunks that still do
//! not match fail without writing.

use ua_domain::{AgentError, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone)]
pub struct Hunk {
    /// 1-based line number in the old file.
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone)]
pub struct PatchFile {
    pub path: String,
    pub hunks: Vec<Hunk>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn strip_diff_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

fn parse_range(spec: &str) -> Option<(usize, usize)> {
    // "-12,3" / "+12,3" / "-12" (count defaults to 1)
    let spec = &spec[1..];
    match spec.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((spec.parse().ok()?, 1)),
    }
}

/// Parse a unified diff into per-file hunk lists.
///
/// `diff --git` and `index` lines are tolerated and skipped; the target
/// path comes from the `+++` header (or `---` when the target is
/// `/dev/null`).
pub fn parse_unified_diff(text: &str) -> Result<Vec<PatchFile>> {
    let mut files: Vec<PatchFile> = Vec::new();
    let mut old_path: Option<String> = None;

    for (lineno, line) in text.lines().enumerate() {
        let invalid =
            |msg: &str| AgentError::Patch(format!("line {}: {}", lineno + 1, msg));

        if line.starts_with("diff ") || line.starts_with("index ") {
            continue;
        }
        if let Some(rest) = line.strip_prefix("--- ") {
            old_path = Some(strip_diff_prefix(rest.trim()).to_owned());
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            let new_path = strip_diff_prefix(rest.trim()).to_owned();
            let path = if new_path == "/dev/null" {
                old_path
                    .take()
                    .ok_or_else(|| invalid("'+++ /dev/null' without a '---' header"))?
            } else {
                old_path = None;
                new_path
            };
            files.push(PatchFile {
                path,
                hunks: Vec::new(),
            });
            continue;
        }
        if let Some(header) = line.strip_prefix("@@ ") {
            let file = files
                .last_mut()
                .ok_or_else(|| invalid("hunk header before any file header"))?;
            let header = header
                .split(" @@")
                .next()
                .ok_or_else(|| invalid("malformed hunk header"))?;
            let mut parts = header.split_whitespace();
            let old = parts
                .next()
                .filter(|p| p.starts_with('-'))
                .and_then(parse_range)
                .ok_or_else(|| invalid("malformed old range"))?;
            let new = parts
                .next()
                .filter(|p| p.starts_with('+'))
                .and_then(parse_range)
                .ok_or_else(|| invalid("malformed new range"))?;
            file.hunks.push(Hunk {
                old_start: old.0,
                old_count: old.1,
                new_start: new.0,
                new_count: new.1,
                lines: Vec::new(),
            });
            continue;
        }
        let Some(hunk) = files.last_mut().and_then(|f| f.hunks.last_mut()) else {
            // Prose between file sections (git commit messages etc.).
            continue;
        };
        if let Some(text) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(text.to_owned()));
        } else if let Some(text) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Remove(text.to_owned()));
        } else if let Some(text) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Add(text.to_owned()));
        } else if line.starts_with('\\') {
            // "\ No newline at end of file"
            continue;
        } else if line.is_empty() {
            hunk.lines.push(HunkLine::Context(String::new()));
        } else {
            return Err(invalid("unexpected line in hunk body"));
        }
    }

    if files.is_empty() {
        return Err(AgentError::Patch("no file headers found".into()));
    }
    Ok(files)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Application
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Whether every context/remove line of `hunk` matches `lines` at
/// 0-based position `start`.
fn matches_at(lines: &[String], start: usize, hunk: &Hunk) -> bool {
    let mut idx = start;
    for line in &hunk.lines {
        match line {
            HunkLine::Context(text) | HunkLine::Remove(text) => {
                if lines.get(idx).map(String::as_str) != Some(text.as_str()) {
                    return false;
                }
                idx += 1;
            }
            HunkLine::Add(_) => {}
        }
    }
    true
}

fn splice_at(lines: &mut Vec<String>, start: usize, hunk: &Hunk) {
    let consumed = hunk
        .lines
        .iter()
        .filter(|l| matches!(l, HunkLine::Context(_) | HunkLine::Remove(_)))
        .count();
    let replacement: Vec<String> = hunk
        .lines
        .iter()
        .filter_map(|l| match l {
            HunkLine::Context(text) | HunkLine::Add(text) => Some(text.clone()),
            HunkLine::Remove(_) => None,
        })
        .collect();
    lines.splice(start..start + consumed, replacement);
}

/// Apply one hunk, returning the 0-based position it landed at.
///
/// Tries `old_start` first, then a single re-anchor pass keyed on the
/// hunk's first context line.
pub fn apply_hunk(lines: &mut Vec<String>, hunk: &Hunk) -> Result<usize> {
    let declared = hunk.old_start.saturating_sub(1);
    if matches_at(lines, declared, hunk) {
        splice_at(lines, declared, hunk);
        return Ok(declared);
    }

    // Re-anchor on the first context line.
    let anchor = hunk.lines.iter().enumerate().find_map(|(i, l)| match l {
        HunkLine::Context(text) => {
            // Offset of this context line among the old-file lines the
            // hunk consumes before it.
            let offset = hunk.lines[..i]
                .iter()
                .filter(|p| matches!(p, HunkLine::Context(_) | HunkLine::Remove(_)))
                .count();
            Some((text.as_str(), offset))
        }
        _ => None,
    });
    if let Some((anchor_text, offset)) = anchor {
        for (idx, line) in lines.iter().enumerate() {
            if line == anchor_text && idx >= offset {
                let candidate = idx - offset;
                if candidate != declared && matches_at(lines, candidate, hunk) {
                    splice_at(lines, candidate, hunk);
                    return Ok(candidate);
                }
            }
        }
    }

    Err(AgentError::Patch(format!(
        "hunk at line {} does not match file content",
        hunk.old_start
    )))
}

/// Apply a sequence of hunks to file content, preserving the presence of
/// a trailing newline.
pub fn apply_hunks(content: &str, hunks: &[Hunk]) -> Result<String> {
    let had_trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = if content.is_empty() {
        Vec::new()
    } else {
        let mut v: Vec<String> = content.split('\n').map(str::to_owned).collect();
        if had_trailing_newline {
            v.pop();
        }
        v
    };
    for hunk in hunks {
        apply_hunk(&mut lines, hunk)?;
    }
    let mut out = lines.join("\n");
    if had_trailing_newline || (content.is_empty() && !out.is_empty()) {
        out.push('\n');
    }
    Ok(out)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "\
--- a/hello.txt
+++ b/hello.txt
@@ -1,2 +1,2 @@
 hello
-world
+rust
";

    #[test]
    fn parse_single_file_single_hunk() {
        let files = parse_unified_diff(SIMPLE).expect("parse");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "hello.txt");
        assert_eq!(files[0].hunks.len(), 1);
        assert_eq!(files[0].hunks[0].old_start, 1);
        assert_eq!(files[0].hunks[0].lines.len(), 3);
    }

    #[test]
    fn apply_at_declared_position() {
        let files = parse_unified_diff(SIMPLE).expect("parse");
        let out = apply_hunks("hello\nworld\n", &files[0].hunks).expect("apply");
        assert_eq!(out, "hello\nrust\n");
    }

    #[test]
    fn exact_mismatch_fails_without_write() {
        let files = parse_unified_diff(SIMPLE).expect("parse");
        let mut lines = vec!["completely".to_owned(), "different".to_owned()];
        let before = lines.clone();
        let err = apply_hunk(&mut lines, &files[0].hunks[0]).expect_err("mismatch");
        assert!(err.to_string().contains("does not match"));
        assert_eq!(lines, before);
    }

    #[test]
    fn drift_reanchors_on_first_context_line() {
        // The hunk claims line 1 but the file gained a leading line; the
        // unique context line "hello" re-anchors it.
        let files = parse_unified_diff(SIMPLE).expect("parse");
        let mut lines: Vec<String> = ["preamble", "hello", "world"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let pos = apply_hunk(&mut lines, &files[0].hunks[0]).expect("apply");
        assert_eq!(pos, 1);
        assert_eq!(lines, vec!["preamble", "hello", "rust"]);
    }

    #[test]
    fn multi_hunk_patch_applies_in_order() {
        let patch = "\
--- a/list.txt
+++ b/list.txt
@@ -1,2 +1,2 @@
-one
+ONE
 two
@@ -4,2 +4,3 @@
 four
 five
+six
";
        let files = parse_unified_diff(patch).expect("parse");
        let out = apply_hunks("one\ntwo\nthree\nfour\nfive\n", &files[0].hunks).expect("apply");
        assert_eq!(out, "ONE\ntwo\nthree\nfour\nfive\nsix\n");
    }

    #[test]
    fn new_file_patch_from_empty_content() {
        let patch = "\
--- /dev/null
+++ b/new.txt
@@ -0,0 +1,2 @@
+alpha
+beta
";
        let files = parse_unified_diff(patch).expect("parse");
        let out = apply_hunks("", &files[0].hunks).expect("apply");
        assert_eq!(out, "alpha\nbeta\n");
    }

    #[test]
    fn multiple_files_in_one_diff() {
        let patch = "\
--- a/a.txt
+++ b/a.txt
@@ -1 +1 @@
-x
+y
--- a/b.txt
+++ b/b.txt
@@ -1 +1 @@
-p
+q
";
        let files = parse_unified_diff(patch).expect("parse");
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "a.txt");
        assert_eq!(files[1].path, "b.txt");
    }

    #[test]
    fn garbage_in_hunk_body_is_rejected() {
        let patch = "\
--- a/a.txt
+++ b/a.txt
@@ -1 +1 @@
-x
+y
!!! not a diff line
";
        assert!(parse_unified_diff(patch).is_err());
    }

    #[test]
    fn range_without_count_defaults_to_one() {
        let patch = "\
--- a/a.txt
+++ b/a.txt
@@ -2 +2 @@
-b
+B
";
        let files = parse_unified_diff(patch).expect("parse");
        let out = apply_hunks("a\nb\nc\n", &files[0].hunks).expect("apply");
        assert_eq!(out, "a\nB\nc\n");
    }
}
