//! Run artifact store: one directory per run under the configured runs dir.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::core::paths::{basename, normalize_path, sanitize_file_name};
use crate::core::types::PatchItem;

const ID_ATTEMPTS: usize = 5;

/// `run-<YYYYMMDDTHHMMSSZ>-<6 lowercase alphanumerics>`.
pub fn new_correlation_id(now: DateTime<Utc>) -> String {
    format!("run-{}-{}", now.format("%Y%m%dT%H%M%SZ"), short_id())
}

fn short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

/// Well-known file locations inside one run directory.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub correlation_id: String,
    pub dir: PathBuf,
    pub task: PathBuf,
    pub repo_read: PathBuf,
    pub plan: PathBuf,
    pub patches_dir: PathBuf,
    pub validate: PathBuf,
    pub validate_dir: PathBuf,
    pub git_pr: PathBuf,
    pub commands_log: PathBuf,
    pub result: PathBuf,
}

impl RunPaths {
    pub fn new(runs_dir: &Path, correlation_id: &str) -> Self {
        let dir = runs_dir.join(correlation_id);
        Self {
            correlation_id: correlation_id.to_string(),
            task: dir.join("task.json"),
            repo_read: dir.join("repo-read.json"),
            plan: dir.join("plan.json"),
            patches_dir: dir.join("patches"),
            validate: dir.join("validate.json"),
            validate_dir: dir.join("validate"),
            git_pr: dir.join("git-pr.json"),
            commands_log: dir.join("commands.log"),
            result: dir.join("result.json"),
            dir,
        }
    }

    /// Allocate a fresh correlation id and create its directory.
    ///
    /// The directory must not exist yet; a collision draws a new id.
    pub fn create(runs_dir: &Path, now: DateTime<Utc>) -> Result<Self> {
        fs::create_dir_all(runs_dir)
            .with_context(|| format!("create runs dir {}", runs_dir.display()))?;
        for _ in 0..ID_ATTEMPTS {
            let paths = Self::new(runs_dir, &new_correlation_id(now));
            match fs::create_dir(&paths.dir) {
                Ok(()) => {
                    debug!(dir = %paths.dir.display(), "created run dir");
                    return Ok(paths);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create run dir {}", paths.dir.display()));
                }
            }
        }
        Err(anyhow!(
            "could not allocate a unique run dir under {}",
            runs_dir.display()
        ))
    }

    /// Path for the `seq`-th (1-based) patch file.
    pub fn patch_path(&self, seq: usize, patch_path: &str) -> PathBuf {
        let normalized = normalize_path(patch_path).unwrap_or_else(|| patch_path.to_string());
        let name = sanitize_file_name(basename(&normalized));
        self.patches_dir.join(format!("{seq:03}-{name}.diff"))
    }
}

/// Write `value` as pretty JSON with a trailing newline.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    super::write_atomic(path, buf.as_bytes())
}

/// Write every patch diff, returning the written paths in order.
pub fn write_patches(paths: &RunPaths, patches: &[PatchItem]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&paths.patches_dir)
        .with_context(|| format!("create {}", paths.patches_dir.display()))?;
    let mut written = Vec::with_capacity(patches.len());
    for (idx, patch) in patches.iter().enumerate() {
        let path = paths.patch_path(idx + 1, &patch.path);
        fs::write(&path, &patch.unified_diff)
            .with_context(|| format!("write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

/// In-memory audit log of sub-capability calls for one run.
#[derive(Debug, Clone)]
pub struct CommandLog {
    preview_chars: usize,
    lines: Vec<String>,
}

impl CommandLog {
    pub fn new(preview_chars: usize) -> Self {
        Self {
            preview_chars,
            lines: Vec::new(),
        }
    }

    /// Append `<capability>\t<status>\t<input preview>`.
    pub fn record(&mut self, capability: &str, status: &str, input: &Value) {
        let preview = preview(input, self.preview_chars);
        self.lines.push(format!("{capability}\t{status}\t{preview}"));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut buf = String::new();
        for line in &self.lines {
            buf.push_str(line);
            buf.push('\n');
        }
        super::write_atomic(path, buf.as_bytes())
    }
}

fn preview(input: &Value, max_chars: usize) -> String {
    let compact = serde_json::to_string(input).unwrap_or_default();
    if compact.chars().count() <= max_chars {
        return compact;
    }
    let mut cut: String = compact.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::LazyLock;

    static ID_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"^run-\d{8}T\d{6}Z-[a-z0-9]{6}$").expect("id regex")
    });

    #[test]
    fn correlation_ids_have_stable_format() {
        let id = new_correlation_id(Utc::now());
        assert!(ID_RE.is_match(&id), "{id}");
    }

    #[test]
    fn create_allocates_distinct_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let now = Utc::now();
        let first = RunPaths::create(temp.path(), now).expect("first");
        let second = RunPaths::create(temp.path(), now).expect("second");
        assert_ne!(first.dir, second.dir);
        assert!(first.dir.is_dir() && second.dir.is_dir());
    }

    #[test]
    fn patch_files_are_numbered_and_sanitized() {
        let paths = RunPaths::new(Path::new("/runs"), "run-x");
        assert_eq!(
            paths.patch_path(1, "./src/hello world.rs"),
            PathBuf::from("/runs/run-x/patches/001-hello_world.rs.diff")
        );
        assert_eq!(
            paths.patch_path(12, "docs/ü.md"),
            PathBuf::from("/runs/run-x/patches/012-_.md.diff")
        );
    }

    #[test]
    fn command_log_truncates_previews() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut log = CommandLog::new(10);
        log.record("plan", "ok", &json!({ "a": 1 }));
        log.record("patch", "UNHANDLED", &json!({ "goal": "a long goal string" }));
        assert_eq!(log.lines()[0], "plan\tok\t{\"a\":1}");
        assert_eq!(log.lines()[1], "patch\tUNHANDLED\t{\"goal\":\"a…");

        let path = temp.path().join("commands.log");
        log.write(&path).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn json_artifacts_end_with_newline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/value.json");
        write_json(&path, &json!({ "ok": true })).expect("write");
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "{\n  \"ok\": true\n}\n"
        );
    }
}
