//! Factory configuration stored in `factory.toml` at the repository root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "factory.toml";

/// Factory configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults and
/// relative directories resolve against the repository root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FactoryConfig {
    /// Directory holding one subdirectory per run.
    pub runs_dir: PathBuf,

    /// Directory holding `<name>/capability.json` descriptors.
    pub capabilities_dir: PathBuf,

    /// Maximum characters of capability input kept per `commands.log` line.
    pub log_preview_chars: usize,

    pub validate: ValidateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidateConfig {
    /// Per-command wall-clock limit; the child is killed on expiry.
    pub timeout_secs: u64,

    /// Truncate each command's stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10 * 60,
            output_limit_bytes: 10_240,
        }
    }
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from(".factory/runs"),
            capabilities_dir: PathBuf::from("capabilities"),
            log_preview_chars: 120,
            validate: ValidateConfig::default(),
        }
    }
}

impl FactoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.runs_dir.as_os_str().is_empty() {
            return Err(anyhow!("runs_dir must not be empty"));
        }
        if self.capabilities_dir.as_os_str().is_empty() {
            return Err(anyhow!("capabilities_dir must not be empty"));
        }
        if self.log_preview_chars == 0 {
            return Err(anyhow!("log_preview_chars must be > 0"));
        }
        if self.validate.timeout_secs == 0 {
            return Err(anyhow!("validate.timeout_secs must be > 0"));
        }
        if self.validate.output_limit_bytes == 0 {
            return Err(anyhow!("validate.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn runs_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.runs_dir)
    }

    pub fn capabilities_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.capabilities_dir)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FactoryConfig::default()`.
pub fn load_config(path: &Path) -> Result<FactoryConfig> {
    if !path.exists() {
        let cfg = FactoryConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FactoryConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FactoryConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, FactoryConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        let cfg = FactoryConfig {
            log_preview_chars: 40,
            ..FactoryConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[validate]\ntimeout_secs = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.validate.timeout_secs, 5);
        assert_eq!(cfg.validate.output_limit_bytes, 10_240);
        assert_eq!(cfg.runs_dir, PathBuf::from(".factory/runs"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "log_preview_chars = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("log_preview_chars must be > 0"));
    }
}
