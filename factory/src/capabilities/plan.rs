//! `plan`: turns a task goal into a declarative [`Plan`].

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::paths::{is_path_in_scope, normalize_path};
use crate::core::safety::BUILD_COMMAND;
use crate::core::types::{Mode, Plan, Task};
use crate::registry::Capability;

static CREATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(add|create|write)\b").expect("create verb regex"));
static MODIFY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(modify|update|change|edit)\b").expect("modify verb regex"));
static DELETE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(delete|remove)\b").expect("delete verb regex"));
static FILE_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[\s"'`])([A-Za-z0-9._-]+(?:[\\/][A-Za-z0-9._-]+)*\.[A-Za-z0-9._-]+)"#)
        .expect("file token regex")
});
pub static CONTENT_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bwith content\b").expect("content clause regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Delete,
    Modify,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Delete => "delete",
            Action::Modify => "modify",
        }
    }
}

/// The goal text before any `with content` clause.
pub fn goal_head(goal: &str) -> &str {
    match CONTENT_CLAUSE.find(goal) {
        Some(found) => &goal[..found.start()],
        None => goal,
    }
}

/// Action named by the earliest verb in the goal; `modify` if none.
pub fn detect_action(goal: &str) -> Action {
    let lowered = goal_head(goal).to_lowercase();
    [
        (Action::Create, &*CREATE_RE),
        (Action::Modify, &*MODIFY_RE),
        (Action::Delete, &*DELETE_RE),
    ]
    .into_iter()
    .filter_map(|(action, re)| re.find(&lowered).map(|found| (found.start(), action)))
    .min()
    .map(|(_, action)| action)
    .unwrap_or(Action::Modify)
}

/// File-like tokens (`name.ext`, optionally with directories) in the goal, sorted.
pub fn extract_goal_files(goal: &str) -> Vec<String> {
    let head = goal_head(goal);
    let mut files = BTreeSet::new();
    for caps in FILE_TOKEN_RE.captures_iter(head) {
        let Some(found) = caps.get(1) else { continue };
        if !ends_token(&head[found.end()..]) {
            continue;
        }
        let token = found.as_str().trim_end_matches(['.', ',']);
        if let Some(path) = normalize_path(token)
            && path.contains('.')
        {
            files.insert(path);
        }
    }
    files.into_iter().collect()
}

/// A token ends at the end of the text, whitespace, a quote, or a comma.
fn ends_token(rest: &str) -> bool {
    rest.chars()
        .next()
        .is_none_or(|ch| ch.is_whitespace() || matches!(ch, '"' | '\'' | ',' | '`'))
}

/// Normalized scope entries, used when the goal names no files.
fn scope_files(task: &Task) -> Vec<String> {
    let mut files: Vec<String> = task
        .file_scope
        .iter()
        .filter_map(|entry| normalize_path(entry))
        .collect();
    files.sort();
    files.dedup();
    files
}

pub fn build_plan(task: &Task) -> Result<Plan> {
    let action = detect_action(&task.goal);
    let touched = extract_goal_files(&task.goal);
    let touched = if touched.is_empty() {
        scope_files(task)
    } else {
        let out_of_scope: Vec<&str> = touched
            .iter()
            .filter(|path| !is_path_in_scope(path, &task.file_scope))
            .map(String::as_str)
            .collect();
        if !out_of_scope.is_empty() {
            bail!(
                "scope_violation: touched files out of scope: {}",
                out_of_scope.join(", ")
            );
        }
        touched
    };

    let summary = if touched.is_empty() {
        "(none)".to_string()
    } else {
        touched.join(", ")
    };
    let command_step = match task.mode {
        Mode::DryRun => "skip command execution (dry-run)".to_string(),
        _ => format!("run command: {BUILD_COMMAND}"),
    };
    let steps = vec![
        format!("parse goal and infer action: {}", action.as_str()),
        format!("resolve touched files from goal and fileScope: {summary}"),
        format!("{} requested files", action.as_str()),
        command_step,
    ];
    let commands = match task.mode {
        Mode::DryRun => Vec::new(),
        _ => vec![BUILD_COMMAND.to_string()],
    };
    let mut risks: Vec<String> = touched
        .iter()
        .map(|path| match action {
            Action::Create => format!("writes new file: {path}"),
            Action::Delete => format!("deletes file: {path}"),
            Action::Modify => format!("modifies existing file: {path}"),
        })
        .collect();
    risks.sort();

    Ok(Plan {
        steps,
        touched_files: touched,
        commands,
        risks,
    })
}

#[derive(Debug, Deserialize)]
struct Input {
    task: Task,
}

pub struct Planner;

impl Capability for Planner {
    #[instrument(skip_all, name = "plan")]
    fn run(&self, input: &Value) -> Result<Value> {
        let input: Input = serde_json::from_value(input.clone()).context("parse plan input")?;
        let plan = build_plan(&input.task)?;
        debug!(touched = plan.touched_files.len(), "plan built");
        serde_json::to_value(&plan).context("serialize plan")
    }
}
