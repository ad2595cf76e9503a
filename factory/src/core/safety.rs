//! Safety gate evaluated before any repository mutation.
//!
//! The gate is pure: it looks at one run's task, plan, and patches and returns
//! every violation it finds. An empty result means the run may proceed.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::paths::{basename, is_path_in_scope, normalize_path};
use crate::core::types::{
    ALLOW_LOCKFILE_CHANGES, MAX_FILES_PREFIX, PatchItem, Plan, RunError, Task, codes,
};

/// Canonical build command, proposed by planning and used as the validate fallback.
pub const BUILD_COMMAND: &str = "cargo build --workspace";
/// Cheaper health check that is always allowed.
pub const HEALTH_COMMAND: &str = "cargo check --workspace";

pub const LOCKFILES: [&str; 4] = [
    "Cargo.lock",
    "pnpm-lock.yaml",
    "package-lock.json",
    "yarn.lock",
];

pub const DEFAULT_MAX_FILES: usize = 10;

static SCOPED_CARGO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^cargo \S+ -p \S+$").expect("scoped cargo regex"));
static FACTORY_CLI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^factory \S+(?: .+)?$").expect("factory cli regex"));

/// True if `command` (trimmed) may be executed by build validation.
pub fn is_allowlisted_command(command: &str) -> bool {
    let command = command.trim();
    command == BUILD_COMMAND
        || command == HEALTH_COMMAND
        || SCOPED_CARGO_RE.is_match(command)
        || FACTORY_CLI_RE.is_match(command)
}

/// Distinct-file limit for a task: the first valid `max-files:<n>` directive,
/// else [`DEFAULT_MAX_FILES`].
pub fn read_max_files(constraints: &[String]) -> usize {
    constraints
        .iter()
        .filter_map(|c| c.trim().strip_prefix(MAX_FILES_PREFIX))
        .find_map(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_FILES)
}

fn is_lockfile(path: &str) -> bool {
    LOCKFILES.contains(&basename(path))
}

/// Run every gate check over the full inputs and accumulate all violations.
pub fn collect_safety_errors(task: &Task, plan: &Plan, patches: &[PatchItem]) -> Vec<RunError> {
    let mut errors = Vec::new();
    let allow_lockfiles = task.has_constraint(ALLOW_LOCKFILE_CHANGES);
    let mut distinct = BTreeSet::new();

    for patch in patches {
        let normalized = normalize_path(&patch.path);
        if !is_path_in_scope(&patch.path, &task.file_scope) {
            errors.push(RunError::new(
                codes::SCOPE_VIOLATION,
                format!("scope_violation: patch path '{}' not in fileScope", patch.path),
            ));
        }

        let display = normalized.as_deref().unwrap_or(patch.path.as_str());
        if !allow_lockfiles && is_lockfile(display) {
            errors.push(RunError::new(
                codes::LOCKFILE_PROTECTED,
                format!(
                    "lockfile_protected: refusing to modify {} without {ALLOW_LOCKFILE_CHANGES}",
                    basename(display)
                ),
            ));
        }

        distinct.insert(normalized.unwrap_or_else(|| patch.path.clone()));
    }

    let limit = read_max_files(&task.constraints);
    if distinct.len() > limit {
        errors.push(RunError::new(
            codes::MAX_FILES_EXCEEDED,
            format!("max_files_exceeded: {} > {limit}", distinct.len()),
        ));
    }

    for command in &plan.commands {
        if !is_allowlisted_command(command) {
            errors.push(RunError::new(
                codes::COMMAND_NOT_ALLOWLISTED,
                format!("command_not_allowlisted: {}", command.trim()),
            ));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Mode;

    fn task(scope: &[&str], constraints: &[&str]) -> Task {
        Task {
            task_id: "t-1".to_string(),
            goal: "change things".to_string(),
            constraints: constraints.iter().map(|c| c.to_string()).collect(),
            file_scope: scope.iter().map(|s| s.to_string()).collect(),
            mode: Mode::Apply,
        }
    }

    fn patch(path: &str) -> PatchItem {
        PatchItem {
            path: path.to_string(),
            unified_diff: "--- a\n+++ b\n".to_string(),
            rationale: "test".to_string(),
        }
    }

    fn codes_of(errors: &[RunError]) -> Vec<&str> {
        errors.iter().map(|e| e.code.as_str()).collect()
    }

    #[test]
    fn clean_inputs_pass() {
        let plan = Plan {
            commands: vec![BUILD_COMMAND.to_string()],
            ..Plan::default()
        };
        let errors = collect_safety_errors(&task(&["src/"], &[]), &plan, &[patch("src/lib.rs")]);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn scope_and_lockfile_violations_are_both_reported() {
        let errors = collect_safety_errors(
            &task(&["src/"], &[]),
            &Plan::default(),
            &[patch("Cargo.lock")],
        );
        assert_eq!(
            codes_of(&errors),
            vec![codes::SCOPE_VIOLATION, codes::LOCKFILE_PROTECTED]
        );
        assert_eq!(
            errors[0].message,
            "scope_violation: patch path 'Cargo.lock' not in fileScope"
        );
        assert_eq!(
            errors[1].message,
            "lockfile_protected: refusing to modify Cargo.lock without allow-lockfile-changes"
        );
    }

    #[test]
    fn lockfile_directive_permits_lockfiles() {
        let errors = collect_safety_errors(
            &task(&["web/"], &[ALLOW_LOCKFILE_CHANGES]),
            &Plan::default(),
            &[patch("web/pnpm-lock.yaml")],
        );
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn max_files_zero_rejects_any_patch_once() {
        let errors = collect_safety_errors(
            &task(&["a.txt", "b.txt"], &["max-files:0"]),
            &Plan::default(),
            &[patch("a.txt"), patch("b.txt")],
        );
        assert_eq!(codes_of(&errors), vec![codes::MAX_FILES_EXCEEDED]);
        assert_eq!(errors[0].message, "max_files_exceeded: 2 > 0");
    }

    #[test]
    fn duplicate_spellings_count_as_one_file() {
        let errors = collect_safety_errors(
            &task(&["a/"], &["max-files:1"]),
            &Plan::default(),
            &[patch("a/b"), patch("./a/b"), patch("a//b")],
        );
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn first_valid_max_files_wins() {
        let constraints = ["max-files:abc", "max-files:-1", "max-files:2", "max-files:7"]
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>();
        assert_eq!(read_max_files(&constraints), 2);
        assert_eq!(read_max_files(&[]), DEFAULT_MAX_FILES);
    }

    #[test]
    fn escaping_paths_are_scope_violations() {
        let errors = collect_safety_errors(
            &task(&["docs"], &[]),
            &Plan::default(),
            &[patch("docs/../../etc/passwd")],
        );
        assert_eq!(codes_of(&errors), vec![codes::SCOPE_VIOLATION]);
    }

    #[test]
    fn command_allowlist() {
        assert!(is_allowlisted_command(" cargo build --workspace "));
        assert!(is_allowlisted_command("cargo check --workspace"));
        assert!(is_allowlisted_command("cargo test -p factory"));
        assert!(is_allowlisted_command("factory capability list"));
        assert!(is_allowlisted_command("factory init"));
        assert!(!is_allowlisted_command("cargo build"));
        assert!(!is_allowlisted_command("cargo test -p factory && rm -rf /"));
        assert!(!is_allowlisted_command("rm -rf /"));
        assert!(!is_allowlisted_command("factory"));
    }

    #[test]
    fn disallowed_commands_are_reported_individually() {
        let plan = Plan {
            commands: vec![
                "curl http://example.com".to_string(),
                BUILD_COMMAND.to_string(),
                "make".to_string(),
            ],
            ..Plan::default()
        };
        let errors = collect_safety_errors(&task(&["a"], &[]), &plan, &[]);
        assert_eq!(
            errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>(),
            vec![
                "command_not_allowlisted: curl http://example.com",
                "command_not_allowlisted: make"
            ]
        );
    }
}
