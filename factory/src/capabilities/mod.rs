//! Built-in capability implementations and their table entries.

pub mod git_pr;
pub mod patch;
pub mod plan;
pub mod repo_read;
pub mod validate;

use crate::io::config::FactoryConfig;
use crate::registry::CapabilityTable;

pub const REPO_READ: &str = "builtin:repo-read";
pub const PLAN: &str = "builtin:plan";
pub const PATCH: &str = "builtin:patch";
pub const VALIDATE: &str = "builtin:validate";
pub const GIT_PR: &str = "builtin:git-pr";

/// Populate `table` with every built-in capability.
pub fn register_builtins(table: &mut CapabilityTable, config: &FactoryConfig) {
    table.register(REPO_READ, repo_read::RepoRead);
    table.register(PLAN, plan::Planner);
    table.register(PATCH, patch::PatchWriter);
    table.register(VALIDATE, validate::Validator::new(&config.validate));
    table.register(GIT_PR, git_pr::GitPr);
}
