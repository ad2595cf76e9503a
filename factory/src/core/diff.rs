//! Minimal unified diff support: rendering whole-file diffs and applying
//! single-file unified diffs in memory.
//!
//! Lines are kept with their trailing `\n` so that `\ No newline at end of
//! file` markers survive a render/apply cycle byte for byte.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

const DEV_NULL: &str = "/dev/null";
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

static HUNK_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("diff has no '---'/'+++' file header")]
    MissingHeader,
    #[error("malformed hunk header: {0}")]
    BadHunkHeader(String),
    #[error("unexpected line {line} in diff: {text:?}")]
    UnexpectedLine { line: usize, text: String },
    #[error("hunk {hunk} line counts do not match its header")]
    CountMismatch { hunk: usize },
    #[error("hunk {hunk} overlaps a previous hunk")]
    Overlap { hunk: usize },
    #[error("content mismatch at line {line}")]
    ContextMismatch { line: usize },
    #[error("diff creates a file that already exists")]
    TargetExists,
    #[error("diff modifies a file that does not exist")]
    TargetMissing,
    #[error("deletion diff leaves {0} line(s) behind")]
    IncompleteDeletion(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

impl HunkLine {
    fn text_mut(&mut self) -> &mut String {
        match self {
            HunkLine::Context(text) | HunkLine::Remove(text) | HunkLine::Add(text) => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
}

/// A parsed single-file unified diff. `None` paths stand for `/dev/null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    pub fn is_creation(&self) -> bool {
        self.old_path.is_none()
    }

    pub fn is_deletion(&self) -> bool {
        self.new_path.is_none()
    }
}

/// Render a whole-file replacement diff.
///
/// `before = None` renders a creation, `after = None` a deletion.
pub fn render_diff(path: &str, before: Option<&str>, after: Option<&str>) -> String {
    let old_lines: Vec<&str> = before.map(|s| s.split_inclusive('\n').collect()).unwrap_or_default();
    let new_lines: Vec<&str> = after.map(|s| s.split_inclusive('\n').collect()).unwrap_or_default();

    let mut out = String::new();
    match before {
        Some(_) => out.push_str(&format!("--- a/{path}\n")),
        None => out.push_str(&format!("--- {DEV_NULL}\n")),
    }
    match after {
        Some(_) => out.push_str(&format!("+++ b/{path}\n")),
        None => out.push_str(&format!("+++ {DEV_NULL}\n")),
    }
    out.push_str(&format!(
        "@@ -{} +{} @@\n",
        range(old_lines.len()),
        range(new_lines.len())
    ));
    for line in &old_lines {
        push_line(&mut out, '-', line);
    }
    for line in &new_lines {
        push_line(&mut out, '+', line);
    }
    out
}

fn range(len: usize) -> String {
    if len == 0 {
        "0,0".to_string()
    } else {
        format!("1,{len}")
    }
}

fn push_line(out: &mut String, prefix: char, line: &str) {
    out.push(prefix);
    match line.strip_suffix('\n') {
        Some(text) => {
            out.push_str(text);
            out.push('\n');
        }
        None => {
            out.push_str(line);
            out.push('\n');
            out.push_str(NO_NEWLINE_MARKER);
            out.push('\n');
        }
    }
}

fn header_path(raw: &str, prefix: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == DEV_NULL {
        return None;
    }
    Some(raw.strip_prefix(prefix).unwrap_or(raw).to_string())
}

fn capture_num(caps: &regex::Captures<'_>, idx: usize, default: usize) -> Result<usize, DiffError> {
    match caps.get(idx) {
        Some(m) => m
            .as_str()
            .parse()
            .map_err(|_| DiffError::BadHunkHeader(caps[0].to_string())),
        None => Ok(default),
    }
}

/// Parse a single-file unified diff.
pub fn parse_diff(text: &str) -> Result<FileDiff, DiffError> {
    // Only the `\n` terminator is stripped; a preceding `\r` is line content.
    let mut lines = text
        .split_inclusive('\n')
        .map(|line| line.strip_suffix('\n').unwrap_or(line))
        .enumerate();

    let mut old_path = None;
    let mut new_path = None;
    let mut saw_header = false;
    while let Some((_, line)) = lines.next() {
        if let Some(rest) = line.strip_prefix("--- ") {
            old_path = header_path(rest, "a/");
            let Some((_, next)) = lines.next() else {
                return Err(DiffError::MissingHeader);
            };
            let Some(rest) = next.strip_prefix("+++ ") else {
                return Err(DiffError::MissingHeader);
            };
            new_path = header_path(rest, "b/");
            saw_header = true;
            break;
        }
    }
    if !saw_header {
        return Err(DiffError::MissingHeader);
    }

    let mut hunks: Vec<Hunk> = Vec::new();
    for (idx, line) in lines {
        if line.starts_with("@@") {
            let caps = HUNK_HEADER_RE
                .captures(line)
                .ok_or_else(|| DiffError::BadHunkHeader(line.to_string()))?;
            hunks.push(Hunk {
                old_start: capture_num(&caps, 1, 0)?,
                old_len: capture_num(&caps, 2, 1)?,
                new_start: capture_num(&caps, 3, 0)?,
                new_len: capture_num(&caps, 4, 1)?,
                lines: Vec::new(),
            });
            continue;
        }
        let Some(hunk) = hunks.last_mut() else {
            return Err(DiffError::UnexpectedLine {
                line: idx + 1,
                text: line.to_string(),
            });
        };
        if line.starts_with('\\') {
            if let Some(prev) = hunk.lines.last_mut() {
                let text = prev.text_mut();
                if text.ends_with('\n') {
                    text.pop();
                }
            }
            continue;
        }
        let parsed = match line.chars().next() {
            Some(' ') => HunkLine::Context(format!("{}\n", &line[1..])),
            None => HunkLine::Context("\n".to_string()),
            Some('-') => HunkLine::Remove(format!("{}\n", &line[1..])),
            Some('+') => HunkLine::Add(format!("{}\n", &line[1..])),
            Some(_) => {
                return Err(DiffError::UnexpectedLine {
                    line: idx + 1,
                    text: line.to_string(),
                });
            }
        };
        hunk.lines.push(parsed);
    }

    for (idx, hunk) in hunks.iter().enumerate() {
        let old = hunk
            .lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Add(_)))
            .count();
        let new = hunk
            .lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Remove(_)))
            .count();
        if old != hunk.old_len || new != hunk.new_len {
            return Err(DiffError::CountMismatch { hunk: idx + 1 });
        }
    }

    Ok(FileDiff {
        old_path,
        new_path,
        hunks,
    })
}

/// Apply a parsed diff to the current file contents.
///
/// `original = None` means the file does not exist. Returns `None` when the
/// diff deletes the file. Every context and removed line must match exactly.
pub fn apply_diff(original: Option<&str>, diff: &FileDiff) -> Result<Option<String>, DiffError> {
    match (original, diff.is_creation()) {
        (Some(_), true) => return Err(DiffError::TargetExists),
        (None, false) => return Err(DiffError::TargetMissing),
        _ => {}
    }

    let source: Vec<&str> = original
        .map(|s| s.split_inclusive('\n').collect())
        .unwrap_or_default();
    let mut output = String::new();
    let mut pos = 0usize;

    for (hunk_idx, hunk) in diff.hunks.iter().enumerate() {
        let start = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if start < pos {
            return Err(DiffError::Overlap { hunk: hunk_idx + 1 });
        }
        if start > source.len() {
            return Err(DiffError::ContextMismatch { line: start });
        }
        for line in &source[pos..start] {
            output.push_str(line);
        }
        let mut cursor = start;
        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) | HunkLine::Remove(text) => {
                    if source.get(cursor) != Some(&text.as_str()) {
                        return Err(DiffError::ContextMismatch { line: cursor + 1 });
                    }
                    if matches!(line, HunkLine::Context(_)) {
                        output.push_str(text);
                    }
                    cursor += 1;
                }
                HunkLine::Add(text) => output.push_str(text),
            }
        }
        pos = cursor;
    }
    for line in &source[pos..] {
        output.push_str(line);
    }

    if diff.is_deletion() {
        let left = output.split_inclusive('\n').count();
        if left > 0 {
            return Err(DiffError::IncompleteDeletion(left));
        }
        return Ok(None);
    }
    Ok(Some(output))
}
