//! Shared deterministic types for the orchestration core.
//!
//! These types define the stable contracts between the orchestrator, the
//! capabilities it invokes, and the artifacts it writes. Field names follow the
//! camelCase JSON wire format.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable error codes surfaced in [`RunResult::errors`].
///
/// Codes are opaque strings so capabilities may introduce their own.
pub mod codes {
    pub const SUB_AGENT_INVOCATION_FAILED: &str = "SUB_AGENT_INVOCATION_FAILED";
    pub const SUB_AGENT_FAILED: &str = "SUB_AGENT_FAILED";
    pub const SCOPE_VIOLATION: &str = "SCOPE_VIOLATION";
    pub const LOCKFILE_PROTECTED: &str = "LOCKFILE_PROTECTED";
    pub const MAX_FILES_EXCEEDED: &str = "MAX_FILES_EXCEEDED";
    pub const COMMAND_NOT_ALLOWLISTED: &str = "COMMAND_NOT_ALLOWLISTED";
    pub const PATCH_APPLY_FAILED: &str = "PATCH_APPLY_FAILED";
    pub const INPUT_INVALID: &str = "INPUT_INVALID";
    pub const ARTIFACT_WRITE_FAILED: &str = "ARTIFACT_WRITE_FAILED";
    pub const UNHANDLED: &str = "UNHANDLED";
    pub const OUTPUT_INVALID: &str = "OUTPUT_INVALID";
}

/// Task directive enabling lock file modifications.
pub const ALLOW_LOCKFILE_CHANGES: &str = "allow-lockfile-changes";
/// Task directive skipping the validate stage.
pub const SKIP_VALIDATE: &str = "skip-validate";
/// Prefix of the task directive overriding the distinct-file limit.
pub const MAX_FILES_PREFIX: &str = "max-files:";

/// Execution mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Plan and gate only; nothing is written outside the run directory.
    DryRun,
    /// Apply patches without build validation.
    Apply,
    /// Apply patches and run build validation.
    Validate,
    /// Apply, validate, and commit to a review branch.
    PrReady,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::DryRun => "dry-run",
            Mode::Apply => "apply",
            Mode::Validate => "validate",
            Mode::PrReady => "pr-ready",
        }
    }
}

/// A bounded code-change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub goal: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    pub file_scope: Vec<String>,
    pub mode: Mode,
}

impl Task {
    pub fn has_constraint(&self, directive: &str) -> bool {
        self.constraints.iter().any(|c| c.trim() == directive)
    }
}

/// One proposed file mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchItem {
    pub path: String,
    pub unified_diff: String,
    pub rationale: String,
}

/// Declarative description of intended work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub steps: Vec<String>,
    pub touched_files: Vec<String>,
    pub commands: Vec<String>,
    pub risks: Vec<String>,
}

/// A coded error accumulated during a run or reported by a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub code: String,
    pub message: String,
}

impl RunError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// RFC 3339 UTC timestamp with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Whole milliseconds between two instants, clamped at zero.
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
}

/// Keyed output attached to a [`RunResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub key: String,
    pub value: Value,
}

/// Terminal outcome of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// True iff `errors` is empty.
    pub ok: bool,
    pub correlation_id: String,
    pub timings: Timings,
    pub outputs: Vec<RunOutput>,
    pub errors: Vec<RunError>,
}

impl RunResult {
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|err| err.code == code)
    }
}

/// Uniform envelope returned by every capability invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityResult {
    pub ok: bool,
    pub agent: String,
    pub started_at: String,
    pub finished_at: String,
    pub ms: u64,
    pub errors: Vec<RunError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CapabilityResult {
    /// First error code, or `ok` for a successful envelope.
    pub fn status_code(&self) -> &str {
        if self.ok {
            return "ok";
        }
        self.errors
            .first()
            .map(|err| err.code.as_str())
            .unwrap_or(codes::UNHANDLED)
    }
}

/// Artifact written in place of a stage that did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub skipped: bool,
    pub reason: String,
}

impl SkipRecord {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            reason: reason.into(),
        }
    }
}
