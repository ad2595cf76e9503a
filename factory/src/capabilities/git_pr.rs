//! `git-pr`: commits applied files to a local review branch. Never pushes.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::io::git::Git;
use crate::registry::Capability;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Input {
    repo_root: PathBuf,
    branch: String,
    commit_message: String,
    files: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Output {
    branch: String,
    committed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit: Option<String>,
}

pub struct GitPr;

impl Capability for GitPr {
    #[instrument(skip_all, name = "git_pr")]
    fn run(&self, input: &Value) -> Result<Value> {
        let input: Input = serde_json::from_value(input.clone()).context("parse git-pr input")?;
        if input.branch.trim().is_empty() {
            bail!("branch must not be empty");
        }
        if input.commit_message.trim().is_empty() {
            bail!("commitMessage must not be empty");
        }

        let git = Git::new(&input.repo_root);
        if !git.is_work_tree() {
            bail!("{} is not a git work tree", input.repo_root.display());
        }
        git.switch_to(&input.branch)
            .with_context(|| format!("switch to {}", input.branch))?;
        git.add_paths(&input.files).context("stage applied files")?;
        let committed = git
            .commit_staged(&input.commit_message)
            .context("commit review branch")?;
        let commit = if committed {
            Some(git.head_short_sha(12)?)
        } else {
            None
        };
        info!(branch = %input.branch, committed, "review branch prepared");

        serde_json::to_value(Output {
            branch: input.branch,
            committed,
            commit,
        })
        .context("serialize git-pr output")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::process::Command;

    fn git(dir: &std::path::Path, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("run git");
        assert!(out.status.success(), "git {args:?}");
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    #[test]
    fn commits_listed_files_on_branch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        git(root, &["init", "-q", "-b", "main"]);
        git(root, &["config", "user.email", "factory@example.com"]);
        git(root, &["config", "user.name", "factory"]);
        git(root, &["commit", "-q", "--allow-empty", "-m", "init"]);
        fs::write(root.join("hello.txt"), "hi\n").expect("write");
        fs::write(root.join("stray.txt"), "no\n").expect("write");

        let out = GitPr
            .run(&json!({
                "repoRoot": root,
                "branch": "factory/t-1",
                "commitMessage": "factory: add hello.txt",
                "files": ["hello.txt"]
            }))
            .expect("git-pr");

        assert_eq!(out["branch"], json!("factory/t-1"));
        assert_eq!(out["committed"], json!(true));
        assert_eq!(out["commit"].as_str().expect("sha").len(), 12);
        assert_eq!(git(root, &["rev-parse", "--abbrev-ref", "HEAD"]), "factory/t-1");
        assert_eq!(git(root, &["show", "--name-only", "--format=", "HEAD"]), "hello.txt");
    }

    #[test]
    fn non_repository_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = GitPr
            .run(&json!({
                "repoRoot": temp.path(),
                "branch": "factory/t-1",
                "commitMessage": "m",
                "files": []
            }))
            .unwrap_err();
        assert!(err.to_string().contains("is not a git work tree"));
    }
}
