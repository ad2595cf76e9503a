//! The orchestration pipeline for one task.
//!
//! Stages run strictly in order: Init, Read, Plan, Patch, Gate, Apply,
//! Validate, Review, Finalize. A failing stage records its errors and skips
//! every remaining mutation-bearing stage; Finalize always runs and always
//! writes `result.json` and `commands.log`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::capabilities::repo_read::{Query, QueryType};
use crate::core::paths::ScopeEntry;
use crate::core::review::{branch_name, render_commit_message};
use crate::core::safety::{BUILD_COMMAND, collect_safety_errors, is_allowlisted_command};
use crate::core::types::{
    CapabilityResult, Mode, PatchItem, Plan, RunError, RunOutput, RunResult, SKIP_VALIDATE,
    SkipRecord, Task, Timings, codes, elapsed_ms, format_timestamp,
};
use crate::io::apply::apply_patches;
use crate::io::artifacts::{CommandLog, RunPaths, new_correlation_id, write_json, write_patches};
use crate::io::config::{CONFIG_FILE, FactoryConfig, load_config};
use crate::registry::{CapabilityTable, Invoker, Registry};

/// Capability whose descriptor defines the accepted task shape.
pub const TASK_CAPABILITY: &str = "repo-patch";
const REPO_READ: &str = "repo-read";
const PLAN: &str = "plan";
const PATCH: &str = "patch";
const VALIDATE: &str = "validate";
const GIT_PR: &str = "git-pr";

/// Errors that stop the remaining mutation-bearing stages.
#[derive(Debug)]
struct Halt(Vec<RunError>);

impl From<RunError> for Halt {
    fn from(err: RunError) -> Self {
        Halt(vec![err])
    }
}

type Stage<T> = std::result::Result<T, Halt>;

fn sub_agent_failed(message: impl Into<String>) -> Halt {
    RunError::new(codes::SUB_AGENT_FAILED, message).into()
}

/// Mutable state owned by one run.
struct RunContext {
    paths: RunPaths,
    started: DateTime<Utc>,
    log: CommandLog,
    outputs: Vec<RunOutput>,
    errors: Vec<RunError>,
    validate_recorded: bool,
    review_recorded: bool,
}

impl RunContext {
    fn new(paths: RunPaths, started: DateTime<Utc>, preview_chars: usize) -> Self {
        Self {
            paths,
            started,
            log: CommandLog::new(preview_chars),
            outputs: Vec::new(),
            errors: Vec::new(),
            validate_recorded: false,
            review_recorded: false,
        }
    }

    fn persist<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Stage<()> {
        write_json(path, value).map_err(artifact_failed)
    }

    fn output<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.outputs.push(RunOutput {
            key: key.to_string(),
            value,
        });
    }
}

fn artifact_failed(err: anyhow::Error) -> Halt {
    warn!(err = %format!("{err:#}"), "artifact write failed");
    RunError::new(codes::ARTIFACT_WRITE_FAILED, format!("{err:#}")).into()
}

#[derive(Debug, Deserialize)]
struct PatchOutput {
    patches: Vec<PatchItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateSummary {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: Vec<CommandSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandSummary {
    command: String,
    exit_code: i64,
    #[serde(default)]
    timed_out: bool,
}

#[derive(Debug, Deserialize, Serialize)]
struct ReviewSummary {
    branch: String,
    committed: bool,
}

/// Runs tasks against one repository root.
pub struct Orchestrator {
    root: PathBuf,
    config: FactoryConfig,
    invoker: Invoker,
}

impl Orchestrator {
    pub fn new(root: impl Into<PathBuf>, config: FactoryConfig, table: CapabilityTable) -> Self {
        let root = root.into();
        let registry = Registry::new(config.capabilities_dir(&root));
        Self {
            root,
            config,
            invoker: Invoker::new(registry, table),
        }
    }

    /// Load `factory.toml` under `root` and wire the built-in capabilities.
    pub fn from_root(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = load_config(&root.join(CONFIG_FILE))?;
        let table = CapabilityTable::builtin(&config);
        Ok(Self::new(root, config, table))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn invoker_mut(&mut self) -> &mut Invoker {
        &mut self.invoker
    }

    /// Execute an already-typed task.
    pub fn execute(&self, task: &Task) -> RunResult {
        let raw = serde_json::to_value(task).unwrap_or(Value::Null);
        self.execute_value(&raw)
    }

    /// Execute a raw task document. Input errors come back path-qualified.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn execute_value(&self, raw: &Value) -> RunResult {
        let started = Utc::now();
        let paths = match RunPaths::create(&self.config.runs_dir(&self.root), started) {
            Ok(paths) => paths,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not create run dir");
                let finished = Utc::now();
                return RunResult {
                    ok: false,
                    correlation_id: new_correlation_id(started),
                    timings: timings(started, finished),
                    outputs: Vec::new(),
                    errors: vec![RunError::new(
                        codes::ARTIFACT_WRITE_FAILED,
                        format!("{err:#}"),
                    )],
                };
            }
        };
        let mut run = RunContext::new(paths, started, self.config.log_preview_chars);
        info!(correlation_id = %run.paths.correlation_id, "run started");

        let accepted = match self.preflight(raw) {
            Ok(task) => {
                if let Err(Halt(errors)) = self.drive(&mut run, &task) {
                    run.errors.extend(errors);
                }
                true
            }
            Err(Halt(errors)) => {
                debug!(errors = errors.len(), "task rejected");
                run.errors.extend(errors);
                false
            }
        };

        self.finalize(run, accepted)
    }

    /// Shape, deserialization and semantic checks on the raw task.
    fn preflight(&self, raw: &Value) -> Stage<Task> {
        let registry = self.invoker.registry();
        let descriptor = registry.resolve(TASK_CAPABILITY).map_err(|err| {
            RunError::new(codes::SUB_AGENT_INVOCATION_FAILED, err.to_string())
        })?;

        let check = registry.validate_input(raw, &descriptor);
        if !check.ok {
            return Err(Halt(
                check
                    .errors
                    .into_iter()
                    .map(|message| RunError::new(codes::INPUT_INVALID, message))
                    .collect(),
            ));
        }

        let task: Task = serde_json::from_value(raw.clone())
            .map_err(|err| RunError::new(codes::INPUT_INVALID, format!("input: {err}")))?;
        let errors = task_errors(&task);
        if !errors.is_empty() {
            return Err(Halt(errors));
        }
        Ok(task)
    }

    #[instrument(skip_all, fields(task_id = %task.task_id, mode = task.mode.as_str()))]
    fn drive(&self, run: &mut RunContext, task: &Task) -> Stage<()> {
        run.persist(&run.paths.task, task)?;

        let context = self.read(run, task)?;
        let plan = self.plan(run, task, &context)?;
        let patches = self.patch(run, task, &plan, &context)?;

        let violations = collect_safety_errors(task, &plan, &patches);
        if !violations.is_empty() {
            warn!(violations = violations.len(), "safety gate rejected the run");
            return Err(Halt(violations));
        }
        debug!("safety gate passed");

        let applied = self.apply(run, task, &patches)?;
        self.validate(run, task, &plan)?;
        self.review(run, task, &patches, applied.as_deref())?;
        Ok(())
    }

    /// Invoke `name`, recording one audit line whatever the outcome.
    fn call(&self, run: &mut RunContext, name: &str, input: &Value) -> Stage<CapabilityResult> {
        match self.invoker.invoke(name, input) {
            Ok(envelope) => {
                run.log.record(name, envelope.status_code(), input);
                debug!(capability = name, ok = envelope.ok, ms = envelope.ms, "capability returned");
                Ok(envelope)
            }
            Err(err) => {
                run.log
                    .record(name, codes::SUB_AGENT_INVOCATION_FAILED, input);
                warn!(capability = name, %err, "capability invocation failed");
                Err(RunError::new(
                    codes::SUB_AGENT_INVOCATION_FAILED,
                    format!("{name}: {err}"),
                )
                .into())
            }
        }
    }

    fn read(&self, run: &mut RunContext, task: &Task) -> Stage<Value> {
        let queries: Vec<Query> = task
            .file_scope
            .iter()
            .flat_map(|entry| {
                [QueryType::FileList, QueryType::FileContent].map(|kind| Query {
                    kind,
                    pattern: "*".to_string(),
                    scope: Some(entry.clone()),
                })
            })
            .collect();
        let input = json!({
            "repoRoot": self.root.to_string_lossy(),
            "queries": queries,
        });
        let envelope = self.call(run, REPO_READ, &input)?;
        run.persist(&run.paths.repo_read, &envelope)?;
        envelope_data(REPO_READ, envelope)
    }

    fn plan(&self, run: &mut RunContext, task: &Task, context: &Value) -> Stage<Plan> {
        let input = json!({ "task": task, "repoReadContext": context });
        let envelope = self.call(run, PLAN, &input)?;
        let data = envelope_data(PLAN, envelope)?;
        let plan: Plan = serde_json::from_value(data)
            .map_err(|err| sub_agent_failed(format!("plan returned an unreadable plan: {err}")))?;
        run.persist(&run.paths.plan, &plan)?;
        run.output("plan", &plan);
        info!(touched = plan.touched_files.len(), "plan ready");
        Ok(plan)
    }

    fn patch(
        &self,
        run: &mut RunContext,
        task: &Task,
        plan: &Plan,
        context: &Value,
    ) -> Stage<Vec<PatchItem>> {
        let input = json!({ "task": task, "plan": plan, "repoReadContext": context });
        let envelope = self.call(run, PATCH, &input)?;
        let data = envelope_data(PATCH, envelope)?;
        let PatchOutput { patches } = serde_json::from_value(data)
            .map_err(|err| sub_agent_failed(format!("patch returned unreadable patches: {err}")))?;

        let empty: Vec<RunError> = patches
            .iter()
            .filter(|patch| patch.unified_diff.trim().is_empty())
            .map(|patch| {
                RunError::new(
                    codes::SUB_AGENT_FAILED,
                    format!("patch for '{}' has an empty unifiedDiff", patch.path),
                )
            })
            .collect();
        if !empty.is_empty() {
            return Err(Halt(empty));
        }

        write_patches(&run.paths, &patches).map_err(artifact_failed)?;
        run.output("patches", &patches);
        info!(patches = patches.len(), "patches generated");
        Ok(patches)
    }

    /// Returns the applied paths, or `None` when the mode does not apply.
    fn apply(
        &self,
        run: &mut RunContext,
        task: &Task,
        patches: &[PatchItem],
    ) -> Stage<Option<Vec<String>>> {
        if task.mode == Mode::DryRun {
            debug!("dry-run: nothing applied");
            return Ok(None);
        }
        let applied = apply_patches(&self.root, patches).map_err(|err| {
            warn!(err = %format!("{err:#}"), "patch application failed");
            RunError::new(codes::PATCH_APPLY_FAILED, format!("{err:#}"))
        })?;
        run.output("applied", &applied);
        info!(files = applied.len(), "patches applied");
        Ok(Some(applied))
    }

    fn validate(&self, run: &mut RunContext, task: &Task, plan: &Plan) -> Stage<()> {
        let skip_reason = match task.mode {
            Mode::DryRun | Mode::Apply => Some(format!("mode is {}", task.mode.as_str())),
            _ if task.has_constraint(SKIP_VALIDATE) => {
                Some(format!("constraint {SKIP_VALIDATE}"))
            }
            _ => None,
        };
        if let Some(reason) = skip_reason {
            run.validate_recorded = true;
            return run.persist(&run.paths.validate, &SkipRecord::new(reason));
        }

        let mut commands: Vec<String> = plan
            .commands
            .iter()
            .map(|command| command.trim().to_string())
            .filter(|command| is_allowlisted_command(command))
            .collect();
        if commands.is_empty() {
            commands.push(BUILD_COMMAND.to_string());
        }
        let artifact_dir = run
            .paths
            .validate_dir
            .strip_prefix(&self.root)
            .unwrap_or(&run.paths.validate_dir)
            .to_string_lossy()
            .into_owned();
        let input = json!({
            "commands": commands,
            "repoRoot": self.root.to_string_lossy(),
            "artifactDir": artifact_dir,
        });

        let envelope = self.call(run, VALIDATE, &input)?;
        run.validate_recorded = true;
        run.persist(&run.paths.validate, &envelope)?;
        let data = envelope_data(VALIDATE, envelope)?;
        let summary: ValidateSummary = serde_json::from_value(data)
            .map_err(|err| sub_agent_failed(format!("validate returned an unreadable report: {err}")))?;
        if !summary.ok {
            return Err(sub_agent_failed(validation_failure(&summary)));
        }
        info!(commands = summary.results.len(), "validation passed");
        Ok(())
    }

    fn review(
        &self,
        run: &mut RunContext,
        task: &Task,
        patches: &[PatchItem],
        applied: Option<&[String]>,
    ) -> Stage<()> {
        if task.mode != Mode::PrReady {
            run.review_recorded = true;
            let reason = format!("mode is {}", task.mode.as_str());
            return run.persist(&run.paths.git_pr, &SkipRecord::new(reason));
        }

        let message = render_commit_message(
            &task.goal,
            &task.task_id,
            &run.paths.correlation_id,
            patches,
        )
        .map_err(|err| sub_agent_failed(format!("{err:#}")))?;
        let input = json!({
            "repoRoot": self.root.to_string_lossy(),
            "branch": branch_name(&task.task_id),
            "commitMessage": message,
            "files": applied.unwrap_or_default(),
        });

        let envelope = self.call(run, GIT_PR, &input)?;
        run.review_recorded = true;
        run.persist(&run.paths.git_pr, &envelope)?;
        let data = envelope_data(GIT_PR, envelope)?;
        let review: ReviewSummary = serde_json::from_value(data)
            .map_err(|err| sub_agent_failed(format!("git-pr returned an unreadable report: {err}")))?;
        info!(branch = %review.branch, committed = review.committed, "review branch ready");
        run.output("review", &review);
        Ok(())
    }

    fn finalize(&self, mut run: RunContext, accepted: bool) -> RunResult {
        if accepted {
            if !run.validate_recorded {
                let skip = SkipRecord::new("run halted before validate");
                if let Err(Halt(errors)) = run.persist(&run.paths.validate, &skip) {
                    run.errors.extend(errors);
                }
            }
            if !run.review_recorded {
                let skip = SkipRecord::new("run halted before review");
                if let Err(Halt(errors)) = run.persist(&run.paths.git_pr, &skip) {
                    run.errors.extend(errors);
                }
            }
        }
        if let Err(err) = run.log.write(&run.paths.commands_log) {
            let Halt(errors) = artifact_failed(err);
            run.errors.extend(errors);
        }

        let finished = Utc::now();
        let mut result = RunResult {
            ok: run.errors.is_empty(),
            correlation_id: run.paths.correlation_id.clone(),
            timings: timings(run.started, finished),
            outputs: run.outputs,
            errors: run.errors,
        };
        if let Err(err) = write_json(&run.paths.result, &result) {
            let Halt(errors) = artifact_failed(err);
            result.errors.extend(errors);
            result.ok = false;
        }
        info!(
            correlation_id = %result.correlation_id,
            ok = result.ok,
            errors = result.errors.len(),
            duration_ms = result.timings.duration_ms,
            "run finished"
        );
        result
    }
}

fn timings(started: DateTime<Utc>, finished: DateTime<Utc>) -> Timings {
    Timings {
        started_at: format_timestamp(started),
        finished_at: format_timestamp(finished),
        duration_ms: elapsed_ms(started, finished),
    }
}

/// Data of a successful envelope; a failed envelope halts the run.
fn envelope_data(name: &str, envelope: CapabilityResult) -> Stage<Value> {
    if !envelope.ok {
        let detail = envelope
            .errors
            .iter()
            .map(|err| format!("{}: {}", err.code, err.message))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(sub_agent_failed(format!("{name} failed: {detail}")));
    }
    envelope
        .data
        .ok_or_else(|| sub_agent_failed(format!("{name} returned no data")))
}

fn validation_failure(summary: &ValidateSummary) -> String {
    if let Some(error) = &summary.error {
        return format!("validate failed: {error}");
    }
    match summary
        .results
        .iter()
        .find(|run| run.exit_code != 0 || run.timed_out)
    {
        Some(run) if run.timed_out => format!("validate failed: '{}' timed out", run.command),
        Some(run) => format!(
            "validate failed: '{}' exited with {}",
            run.command, run.exit_code
        ),
        None => "validate failed".to_string(),
    }
}

/// Semantic checks the shape language cannot express.
fn task_errors(task: &Task) -> Vec<RunError> {
    let mut errors = Vec::new();
    let mut invalid = |message: String| errors.push(RunError::new(codes::INPUT_INVALID, message));

    if task.task_id.trim().is_empty() {
        invalid("input.taskId must not be empty".to_string());
    }
    if task.goal.trim().is_empty() {
        invalid("input.goal must not be empty".to_string());
    }
    if task.file_scope.is_empty() {
        invalid("input.fileScope must not be empty".to_string());
    }
    for (idx, entry) in task.file_scope.iter().enumerate() {
        if ScopeEntry::parse(entry).is_none() {
            invalid(format!(
                "input.fileScope[{idx}] '{entry}' is not a path inside the repository"
            ));
        }
    }
    for (idx, constraint) in task.constraints.iter().enumerate() {
        if constraint.trim().is_empty() {
            invalid(format!("input.constraints[{idx}] must not be empty"));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(scope: &[&str]) -> Task {
        Task {
            task_id: "t-1".to_string(),
            goal: "add hello.txt".to_string(),
            constraints: Vec::new(),
            file_scope: scope.iter().map(|s| s.to_string()).collect(),
            mode: Mode::DryRun,
        }
    }

    #[test]
    fn semantic_checks_report_every_problem() {
        let mut bad = task(&["../outside", "ok.txt"]);
        bad.task_id = " ".to_string();
        bad.constraints = vec!["".to_string()];

        let messages: Vec<String> = task_errors(&bad).into_iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec![
                "input.taskId must not be empty",
                "input.fileScope[0] '../outside' is not a path inside the repository",
                "input.constraints[0] must not be empty",
            ]
        );
        assert!(task_errors(&task(&["src/", "hello.txt"])).is_empty());
    }

    #[test]
    fn failed_envelope_becomes_sub_agent_failure() {
        let envelope = CapabilityResult {
            ok: false,
            agent: "plan".to_string(),
            started_at: String::new(),
            finished_at: String::new(),
            ms: 0,
            errors: vec![RunError::new(codes::UNHANDLED, "boom")],
            data: None,
        };
        let Err(Halt(errors)) = envelope_data("plan", envelope) else {
            panic!("expected halt");
        };
        assert_eq!(errors[0].code, codes::SUB_AGENT_FAILED);
        assert_eq!(errors[0].message, "plan failed: UNHANDLED: boom");
    }

    #[test]
    fn validation_failure_names_the_failing_command() {
        let summary = ValidateSummary {
            ok: false,
            error: None,
            results: vec![
                CommandSummary {
                    command: "cargo check --workspace".to_string(),
                    exit_code: 0,
                    timed_out: false,
                },
                CommandSummary {
                    command: "cargo build --workspace".to_string(),
                    exit_code: 101,
                    timed_out: false,
                },
            ],
        };
        assert_eq!(
            validation_failure(&summary),
            "validate failed: 'cargo build --workspace' exited with 101"
        );
    }
}
