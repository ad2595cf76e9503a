//! Test-only helpers: scratch workspaces, task builders and scripted capabilities.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::types::{Mode, Task};
use crate::io::init::{InitOptions, init_workspace};
use crate::orchestrator::Orchestrator;
use crate::registry::Capability;

/// An initialized factory workspace in a temporary directory.
pub struct TestWorkspace {
    // Dropping the guard removes the directory.
    _temp: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    /// Temp dir with `factory init` already applied.
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("create tempdir");
        let root = temp.path().to_path_buf();
        init_workspace(&root, &InitOptions::default()).expect("init workspace");
        Self { _temp: temp, root }
    }

    /// Like [`TestWorkspace::new`], plus a git repository with one commit on `main`.
    pub fn with_git() -> Self {
        let workspace = Self::new();
        workspace.git(&["init", "-q", "-b", "main"]);
        workspace.git(&["config", "user.email", "factory@example.com"]);
        workspace.git(&["config", "user.name", "factory"]);
        workspace.git(&["add", "-A"]);
        workspace.git(&["commit", "-q", "-m", "init"]);
        workspace
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(path, contents).expect("write file");
    }

    /// File contents, or `None` if the file does not exist.
    pub fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.root.join(rel)).ok()
    }

    /// Orchestrator wired with the built-in capabilities.
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::from_root(&self.root).expect("load orchestrator")
    }

    /// Directory of the run with `correlation_id`.
    pub fn run_dir(&self, correlation_id: &str) -> PathBuf {
        self.root.join(".factory/runs").join(correlation_id)
    }

    /// Parse a JSON artifact from a run directory.
    pub fn artifact(&self, correlation_id: &str, name: &str) -> Value {
        let path = self.run_dir(correlation_id).join(name);
        let contents = fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("read {}: {err}", path.display()));
        serde_json::from_str(&contents).expect("parse artifact json")
    }

    /// Run git in the workspace and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .expect("run git");
        assert!(
            out.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Task with no constraints.
pub fn task(goal: &str, scope: &[&str], mode: Mode) -> Task {
    Task {
        task_id: "t-1".to_string(),
        goal: goal.to_string(),
        constraints: Vec::new(),
        file_scope: scope.iter().map(|s| s.to_string()).collect(),
        mode,
    }
}

/// Task with constraints.
pub fn task_with(goal: &str, scope: &[&str], mode: Mode, constraints: &[&str]) -> Task {
    Task {
        constraints: constraints.iter().map(|c| c.to_string()).collect(),
        ..task(goal, scope, mode)
    }
}

/// Capability that always returns `output`.
pub fn scripted(output: Value) -> impl Capability + 'static {
    move |_: &Value| -> Result<Value> { Ok(output.clone()) }
}

/// Capability that always fails with `message`.
pub fn failing(message: &str) -> impl Capability + 'static {
    let message = message.to_string();
    move |_: &Value| -> Result<Value> { Err(anyhow!(message.clone())) }
}
