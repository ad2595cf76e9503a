//! Resolves capability names to descriptors stored on disk.
//!
//! Layout: `<dir>/<name>/capability.json`. Every call re-reads the file, so
//! edits made between runs are always picked up.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::shape::validate_value;
use crate::registry::descriptor::{DESCRIPTOR_FILE, Descriptor, parse_descriptor};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid capability name {0:?}")]
    InvalidName(String),
    #[error("capability '{name}' not found at {}", .path.display())]
    NotFound { name: String, path: PathBuf },
    #[error("capability '{name}' has an invalid descriptor: {}", .errors.join("; "))]
    InvalidDescriptor { name: String, errors: Vec<String> },
    #[error("read capability '{name}'")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of checking an input value against a descriptor's `inputSchema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Registry {
    dir: PathBuf,
}

impl Registry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn descriptor_path(&self, name: &str) -> PathBuf {
        self.dir.join(name).join(DESCRIPTOR_FILE)
    }

    /// Read and validate the descriptor for `name`.
    #[instrument(skip(self))]
    pub fn resolve(&self, name: &str) -> Result<Descriptor, RegistryError> {
        check_name(name)?;
        let raw = self.read_raw(name)?;
        let descriptor =
            parse_descriptor(&raw).map_err(|errors| RegistryError::InvalidDescriptor {
                name: name.to_string(),
                errors,
            })?;
        if descriptor.name != name {
            return Err(RegistryError::InvalidDescriptor {
                name: name.to_string(),
                errors: vec![format!(
                    "name '{}' does not match directory '{name}'",
                    descriptor.name
                )],
            });
        }
        debug!(entry = %descriptor.entry, version = %descriptor.version, "resolved capability");
        Ok(descriptor)
    }

    fn read_raw(&self, name: &str) -> Result<Value, RegistryError> {
        let path = self.descriptor_path(name);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RegistryError::NotFound {
                    name: name.to_string(),
                    path,
                });
            }
            Err(source) => {
                return Err(RegistryError::Io {
                    name: name.to_string(),
                    source,
                });
            }
        };
        serde_json::from_str(&contents).map_err(|err| RegistryError::InvalidDescriptor {
            name: name.to_string(),
            errors: vec![format!("{DESCRIPTOR_FILE} is not valid JSON: {err}")],
        })
    }

    /// Check `input` against the descriptor's input shape, rooted at `input`.
    pub fn validate_input(&self, input: &Value, descriptor: &Descriptor) -> ValidationResult {
        let errors = validate_value(input, &descriptor.input_schema, "input");
        ValidationResult {
            ok: errors.is_empty(),
            errors,
        }
    }

    /// Capability directory names, sorted. Entries starting with `_` or `.` are skipped.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in
            fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))?
        {
            let entry = entry.with_context(|| format!("read entry in {}", self.dir.display()))?;
            if !entry.file_type().context("read entry type")?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('_') || name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Validate every listed descriptor, returning `(name, errors)` per capability.
    pub fn validate_all(&self) -> Result<Vec<(String, Vec<String>)>> {
        let mut report = Vec::new();
        for name in self.list()? {
            let errors = match self.resolve(&name) {
                Ok(_) => Vec::new(),
                Err(RegistryError::InvalidDescriptor { errors, .. }) => errors,
                Err(err) => vec![err.to_string()],
            };
            report.push((name, errors));
        }
        Ok(report)
    }
}

fn check_name(name: &str) -> Result<(), RegistryError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name.contains(['/', '\\'])
        || name == "."
        || name == ".."
    {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}
