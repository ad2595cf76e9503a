//! `validate`: runs allowlisted build commands and reports their outcome.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::safety::is_allowlisted_command;
use crate::io::config::ValidateConfig;
use crate::io::process::run_command_with_timeout;
use crate::registry::Capability;

pub const COMMANDS_LOG: &str = "commands.log";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Input {
    commands: Vec<String>,
    repo_root: PathBuf,
    #[serde(default)]
    artifact_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRun {
    pub command: String,
    /// `-1` when the process could not start or was killed.
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOutput {
    pub ok: bool,
    pub results: Vec<CommandRun>,
    pub all_passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Validator {
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Validator {
    pub fn new(config: &ValidateConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn execute(&self, command: &str, repo_root: &Path) -> CommandRun {
        let mut tokens = command.split_whitespace();
        let program = tokens.next().unwrap_or_default();
        let mut cmd = Command::new(program);
        cmd.args(tokens).current_dir(repo_root);

        match run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes) {
            Ok(output) => CommandRun {
                command: command.to_string(),
                exit_code: output.exit_code().map(i64::from).unwrap_or(-1),
                stdout: output.stdout_lossy(),
                stderr: output.stderr_lossy(),
                duration_ms: u64::try_from(output.elapsed.as_millis()).unwrap_or(u64::MAX),
                timed_out: output.timed_out,
            },
            Err(err) => {
                warn!(command, err = %format!("{err:#}"), "command did not run");
                CommandRun {
                    command: command.to_string(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("spawn_error: {err:#}"),
                    duration_ms: 0,
                    timed_out: false,
                }
            }
        }
    }
}

fn rejection(commands: &[String]) -> Option<String> {
    commands.iter().find_map(|command| {
        if command.trim().is_empty() {
            return Some("command_not_allowlisted: empty command is not allowed".to_string());
        }
        (!is_allowlisted_command(command))
            .then(|| format!("command_not_allowlisted: {}", command.trim()))
    })
}

fn write_log(dir: &Path, body: &str) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(COMMANDS_LOG);
    fs::write(&path, body).with_context(|| format!("write {}", path.display()))
}

impl Capability for Validator {
    #[instrument(skip_all, name = "validate")]
    fn run(&self, input: &Value) -> Result<Value> {
        let input: Input =
            serde_json::from_value(input.clone()).context("parse validate input")?;
        let artifact_dir = input
            .artifact_dir
            .as_ref()
            .map(|dir| input.repo_root.join(dir));

        if let Some(message) = rejection(&input.commands) {
            warn!(%message, "refusing to run commands");
            if let Some(dir) = &artifact_dir {
                write_log(dir, &format!("{message}\n"))?;
            }
            let output = ValidateOutput {
                ok: false,
                results: Vec::new(),
                all_passed: false,
                error: Some(message),
            };
            return serde_json::to_value(&output).context("serialize validate output");
        }

        let results: Vec<CommandRun> = input
            .commands
            .iter()
            .map(|command| self.execute(command.trim(), &input.repo_root))
            .collect();
        let all_passed = results.iter().all(|run| run.exit_code == 0 && !run.timed_out);
        info!(commands = results.len(), all_passed, "validation finished");

        if let Some(dir) = &artifact_dir {
            let mut body = String::new();
            for run in &results {
                body.push_str(&serde_json::to_string(run).context("serialize command run")?);
                body.push('\n');
            }
            write_log(dir, &body)?;
        }

        let output = ValidateOutput {
            ok: all_passed,
            results,
            all_passed,
            error: None,
        };
        serde_json::to_value(&output).context("serialize validate output")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> Validator {
        Validator::new(&ValidateConfig {
            timeout_secs: 60,
            output_limit_bytes: 512,
        })
    }

    #[test]
    fn rejects_before_running_anything() {
        let temp = tempfile::tempdir().expect("tempdir");
        let artifacts = temp.path().join("run/validate");
        let out = validator()
            .run(&json!({
                "commands": ["cargo build --workspace", "rm -rf /"],
                "repoRoot": temp.path(),
                "artifactDir": artifacts
            }))
            .expect("validate");
        assert_eq!(out["ok"], json!(false));
        assert_eq!(out["allPassed"], json!(false));
        assert_eq!(out["results"], json!([]));
        assert_eq!(out["error"], json!("command_not_allowlisted: rm -rf /"));
        assert_eq!(
            fs::read_to_string(artifacts.join(COMMANDS_LOG)).expect("log"),
            "command_not_allowlisted: rm -rf /\n"
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = validator()
            .run(&json!({ "commands": ["  "], "repoRoot": temp.path() }))
            .expect("validate");
        assert_eq!(
            out["error"],
            json!("command_not_allowlisted: empty command is not allowed")
        );
    }

    #[test]
    fn failing_command_is_recorded_as_json_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let artifacts = temp.path().join("validate");
        let out = validator()
            .run(&json!({
                "commands": ["cargo check -p no-such-package"],
                "repoRoot": temp.path(),
                "artifactDir": artifacts
            }))
            .expect("validate");
        assert_eq!(out["ok"], json!(false));
        assert_ne!(out["results"][0]["exitCode"], json!(0));
        assert!(out.get("error").is_none());

        let log = fs::read_to_string(artifacts.join(COMMANDS_LOG)).expect("log");
        let line: Value = serde_json::from_str(log.trim_end()).expect("json line");
        assert_eq!(line["command"], json!("cargo check -p no-such-package"));
        assert_eq!(line["timedOut"], json!(false));
    }

    #[test]
    fn no_commands_pass_trivially() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = validator()
            .run(&json!({ "commands": [], "repoRoot": temp.path() }))
            .expect("validate");
        assert_eq!(out["ok"], json!(true));
        assert_eq!(out["allPassed"], json!(true));
    }
}
