//! Git adapter for review preparation.
//!
//! Review branches are created and committed locally through a small, explicit
//! wrapper around `git` subprocess calls. Nothing here talks to a remote.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True if the working directory is inside a git work tree.
    pub fn is_work_tree(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let arg = format!("--short={len}");
        let out = self.run_capture(&["rev-parse", &arg, "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Checkout an existing branch, carrying uncommitted changes along.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Checkout `branch`, creating it first if needed. No-op if already current.
    pub fn switch_to(&self, branch: &str) -> Result<()> {
        if self.current_branch().ok().as_deref() == Some(branch) {
            return Ok(());
        }
        if self.branch_exists(branch)? {
            self.checkout_branch(branch)
        } else {
            self.checkout_new_branch(branch)
        }
    }

    /// Stage exactly `paths`, including deletions.
    pub fn add_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "-A", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_checked(&args)?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn init_repo(dir: &Path) -> Git {
        for args in [
            vec!["init", "-q", "-b", "main"],
            vec!["config", "user.email", "factory@example.com"],
            vec!["config", "user.name", "factory"],
            vec!["commit", "-q", "--allow-empty", "-m", "init"],
        ] {
            let status = Command::new("git")
                .args(&args)
                .current_dir(dir)
                .status()
                .expect("run git");
            assert!(status.success(), "git {args:?}");
        }
        Git::new(dir)
    }

    #[test]
    fn commits_only_listed_paths_on_new_branch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = init_repo(temp.path());
        fs::write(temp.path().join("keep.txt"), "keep\n").expect("write");
        fs::write(temp.path().join("other.txt"), "other\n").expect("write");

        git.switch_to("factory/t-1").expect("switch");
        assert_eq!(git.current_branch().expect("branch"), "factory/t-1");
        git.add_paths(&["keep.txt".to_string()]).expect("add");
        assert!(git.commit_staged("factory: keep").expect("commit"));
        assert!(!git.commit_staged("again").expect("noop"));

        let tracked = git.run_capture(&["ls-files"]).expect("ls-files");
        assert_eq!(tracked.trim(), "keep.txt");
        assert_eq!(git.head_short_sha(7).expect("sha").len(), 7);
    }

    #[test]
    fn switch_to_reuses_existing_branch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = init_repo(temp.path());
        git.switch_to("review").expect("create");
        git.checkout_branch("main").expect("back");
        assert!(git.branch_exists("review").expect("exists"));
        git.switch_to("review").expect("reuse");
        assert_eq!(git.current_branch().expect("branch"), "review");
    }

    #[test]
    fn non_repo_is_detected() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(!Git::new(temp.path()).is_work_tree());
    }
}
