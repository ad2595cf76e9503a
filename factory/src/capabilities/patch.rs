//! `patch`: renders whole-file unified diffs for the planned files.
//!
//! Existing file contents come from the `repo-read` context, so generation is
//! a pure function of the input.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::plan::{Action, CONTENT_CLAUSE, detect_action, goal_head};
use crate::core::diff::render_diff;
use crate::core::paths::normalize_path;
use crate::core::types::{PatchItem, Plan, Task};
use crate::registry::Capability;

/// Text following `with content`, unquoted, with `\n` escapes expanded and a
/// trailing newline ensured.
pub fn content_clause(goal: &str) -> Option<String> {
    let found = CONTENT_CLAUSE.find(goal)?;
    let raw = goal[found.end()..].trim();
    let unquoted = ['"', '\'', '`']
        .iter()
        .find_map(|quote| {
            raw.strip_prefix(*quote)
                .and_then(|rest| rest.strip_suffix(*quote))
        })
        .unwrap_or(raw);
    let mut content = unquoted.replace("\\n", "\n");
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    Some(content)
}

/// What the repository looked like according to `repo-read`.
#[derive(Debug, Default)]
struct RepoSnapshot {
    files: BTreeSet<String>,
    contents: BTreeMap<String, String>,
}

impl RepoSnapshot {
    fn from_context(context: &Value) -> Self {
        let mut snapshot = Self::default();
        let results = context
            .get("results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for found in results
            .iter()
            .filter_map(|result| result.get("matches").and_then(Value::as_array))
            .flatten()
        {
            let Some(path) = found.get("path").and_then(Value::as_str) else {
                continue;
            };
            snapshot.files.insert(path.to_string());
            if let Some(content) = found.get("content").and_then(Value::as_str) {
                snapshot
                    .contents
                    .insert(path.to_string(), content.to_string());
            }
        }
        snapshot
    }

    fn is_directory(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.files.iter().any(|file| file.starts_with(&prefix))
    }

    fn content(&self, path: &str) -> Option<&str> {
        self.contents.get(path).map(String::as_str)
    }
}

pub fn build_patches(task: &Task, plan: &Plan, context: &Value) -> Result<Vec<PatchItem>> {
    let snapshot = RepoSnapshot::from_context(context);
    let action = detect_action(&task.goal);
    let content = content_clause(&task.goal);
    let summary = goal_head(&task.goal).trim();

    let mut patches = Vec::with_capacity(plan.touched_files.len());
    for raw in &plan.touched_files {
        let Some(path) = normalize_path(raw) else {
            bail!("touched file '{raw}' escapes the repository");
        };
        if snapshot.is_directory(&path) {
            bail!("{path} is a directory; name the files to change");
        }
        let existing = snapshot.content(&path);
        let unified_diff = match action {
            Action::Delete => {
                let Some(before) = existing else {
                    bail!("cannot delete missing file {path}");
                };
                render_diff(&path, Some(before), None)
            }
            Action::Create => {
                render_diff(&path, existing, Some(content.as_deref().unwrap_or_default()))
            }
            Action::Modify => {
                let Some(after) = content.as_deref() else {
                    bail!("no content given for {path}; add a 'with content <text>' clause");
                };
                render_diff(&path, existing, Some(after))
            }
        };
        patches.push(PatchItem {
            rationale: format!("{} {path}: {summary}", action.as_str()),
            path,
            unified_diff,
        });
    }
    Ok(patches)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Input {
    task: Task,
    plan: Plan,
    #[serde(default)]
    repo_read_context: Value,
}

pub struct PatchWriter;

impl Capability for PatchWriter {
    #[instrument(skip_all, name = "patch")]
    fn run(&self, input: &Value) -> Result<Value> {
        let input: Input = serde_json::from_value(input.clone()).context("parse patch input")?;
        let patches = build_patches(&input.task, &input.plan, &input.repo_read_context)?;
        debug!(patches = patches.len(), "patches generated");
        Ok(json!({ "patches": patches }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Mode;

    fn task(goal: &str) -> Task {
        Task {
            task_id: "t-1".to_string(),
            goal: goal.to_string(),
            constraints: Vec::new(),
            file_scope: vec!["docs/".to_string(), "hello.txt".to_string()],
            mode: Mode::Apply,
        }
    }

    fn plan(files: &[&str]) -> Plan {
        Plan {
            touched_files: files.iter().map(|f| f.to_string()).collect(),
            ..Plan::default()
        }
    }

    fn context() -> Value {
        json!({
            "results": [
                { "queryIndex": 0, "type": "file-list", "matches": [
                    { "path": "docs/a.md" }, { "path": "docs/sub/b.md" }
                ]},
                { "queryIndex": 1, "type": "file-content", "matches": [
                    { "path": "docs/a.md", "content": "old\n", "lineCount": 1 }
                ]}
            ]
        })
    }

    #[test]
    fn content_clause_is_unquoted_and_terminated() {
        assert_eq!(
            content_clause("add hello.txt with content \"hello world\""),
            Some("hello world\n".to_string())
        );
        assert_eq!(
            content_clause("add a.txt With Content one\\ntwo"),
            Some("one\ntwo\n".to_string())
        );
        assert_eq!(content_clause("add a.txt"), None);
    }

    #[test]
    fn create_renders_creation_diff() {
        let patches = build_patches(
            &task("add hello.txt with content hi"),
            &plan(&["hello.txt"]),
            &context(),
        )
        .expect("patches");
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].path, "hello.txt");
        assert_eq!(
            patches[0].unified_diff,
            "--- /dev/null\n+++ b/hello.txt\n@@ -0,0 +1,1 @@\n+hi\n"
        );
        assert_eq!(patches[0].rationale, "create hello.txt: add hello.txt");
    }

    #[test]
    fn modify_replaces_existing_content() {
        let patches = build_patches(
            &task("update docs/a.md with content new"),
            &plan(&["docs/a.md"]),
            &context(),
        )
        .expect("patches");
        assert_eq!(
            patches[0].unified_diff,
            "--- a/docs/a.md\n+++ b/docs/a.md\n@@ -1,1 +1,1 @@\n-old\n+new\n"
        );
    }

    #[test]
    fn delete_requires_existing_file() {
        let patches =
            build_patches(&task("remove docs/a.md"), &plan(&["docs/a.md"]), &context())
                .expect("patches");
        assert!(patches[0].unified_diff.contains("+++ /dev/null"));

        let err = build_patches(&task("remove docs/x.md"), &plan(&["docs/x.md"]), &context())
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot delete missing file docs/x.md");
    }

    #[test]
    fn modify_without_content_fails() {
        let err = build_patches(&task("update docs/a.md"), &plan(&["docs/a.md"]), &context())
            .unwrap_err();
        assert!(err.to_string().contains("no content given for docs/a.md"));
    }

    #[test]
    fn directories_are_rejected() {
        let err = build_patches(
            &task("update docs/sub with content x"),
            &plan(&["docs/sub"]),
            &context(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("docs/sub is a directory"));
    }
}
