//! Review branch naming and commit message rendering.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::PatchItem;

const COMMIT_TEMPLATE: &str = include_str!("templates/commit_message.j2");

pub const BRANCH_PREFIX: &str = "factory/";
pub const SUBJECT_PREFIX: &str = "factory: ";
pub const SUBJECT_MAX_CHARS: usize = 72;

pub fn branch_name(task_id: &str) -> String {
    format!("{BRANCH_PREFIX}{}", task_id.trim())
}

/// `factory: <first goal line>`, cut to [`SUBJECT_MAX_CHARS`] characters.
pub fn commit_subject(goal: &str) -> String {
    let first_line = goal.lines().next().unwrap_or_default().trim();
    format!("{SUBJECT_PREFIX}{first_line}")
        .chars()
        .take(SUBJECT_MAX_CHARS)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Render the full commit message for a review branch.
pub fn render_commit_message(
    goal: &str,
    task_id: &str,
    correlation_id: &str,
    patches: &[PatchItem],
) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("commit_message", COMMIT_TEMPLATE)
        .context("load commit message template")?;
    let template = env.get_template("commit_message")?;
    let rendered = template
        .render(context! {
            subject => commit_subject(goal),
            task_id => task_id,
            correlation_id => correlation_id,
            patches => patches,
        })
        .context("render commit message")?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_uses_first_goal_line() {
        assert_eq!(
            commit_subject("add hello.txt\nmore detail"),
            "factory: add hello.txt"
        );
    }

    #[test]
    fn subject_is_truncated_on_char_boundary() {
        let goal = "é".repeat(100);
        let subject = commit_subject(&goal);
        assert_eq!(subject.chars().count(), SUBJECT_MAX_CHARS);
        assert!(subject.starts_with(SUBJECT_PREFIX));
    }

    #[test]
    fn message_lists_patches_with_rationale() {
        let patches = vec![PatchItem {
            path: "hello.txt".to_string(),
            unified_diff: "--- /dev/null\n+++ b/hello.txt\n".to_string(),
            rationale: "create hello.txt as requested".to_string(),
        }];
        let message =
            render_commit_message("add hello.txt", "t-1", "run-x", &patches).expect("render");
        assert!(message.starts_with("factory: add hello.txt\n\n"));
        assert!(message.contains("Task: t-1\n"));
        assert!(message.contains("Run: run-x\n"));
        assert!(message.contains("- hello.txt: create hello.txt as requested"));
    }

    #[test]
    fn branch_is_namespaced() {
        assert_eq!(branch_name("t-42"), "factory/t-42");
    }
}
