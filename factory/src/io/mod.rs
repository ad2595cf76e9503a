//! I/O helpers: configuration, run artifacts, patch application, git and
//! bounded child processes.

use std::ffi::OsString;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod apply;
pub mod artifacts;
pub mod config;
pub mod git;
pub mod init;
pub mod process;

/// Write `contents` to a sibling temp file and rename it over `path`.
///
/// Parent directories are created as needed.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("artifact"));
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
