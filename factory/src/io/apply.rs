//! Applies generated patches to the repository in two phases.
//!
//! Phase one parses every diff and applies it in memory against the current
//! file contents; any mismatch aborts before the repository is touched. Phase
//! two writes each result with temp-file + rename (or removes the file). A
//! failure in phase two leaves earlier files of the batch in place.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::diff::{apply_diff, parse_diff};
use crate::core::paths::normalize_path;
use crate::core::types::PatchItem;

/// Apply `patches` under `root`, returning the normalized paths written or
/// removed, in patch order.
#[instrument(skip_all, fields(root = %root.display(), patches = patches.len()))]
pub fn apply_patches(root: &Path, patches: &[PatchItem]) -> Result<Vec<String>> {
    // Later patches to the same path apply on top of earlier ones.
    let mut staged: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();

    for patch in patches {
        let rel = normalize_path(&patch.path)
            .ok_or_else(|| anyhow!("patch path '{}' escapes the repository", patch.path))?;
        let current = match staged.get(&rel) {
            Some(content) => content.clone(),
            None => read_optional(&root.join(&rel))?,
        };
        let diff = parse_diff(&patch.unified_diff).with_context(|| format!("parse diff for {rel}"))?;
        let next = apply_diff(current.as_deref(), &diff)
            .with_context(|| format!("apply diff to {rel}"))?;
        debug!(path = %rel, delete = next.is_none(), "patch staged in memory");
        if !staged.contains_key(&rel) {
            order.push(rel.clone());
        }
        staged.insert(rel, next);
    }

    for rel in &order {
        let target = root.join(rel);
        match staged.get(rel).and_then(Option::as_ref) {
            Some(contents) => super::write_atomic(&target, contents.as_bytes())?,
            None => remove_if_present(&target)?,
        }
    }
    info!(files = order.len(), "patches applied");
    Ok(order)
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if path.is_dir() {
        return Err(anyhow!("{} is a directory", path.display()));
    }
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}
