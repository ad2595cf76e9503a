//! Workspace scaffolding for `factory init`.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde_json::json;
use tracing::info;

use super::config::{CONFIG_FILE, FactoryConfig, write_config};
use super::write_atomic;
use crate::registry::descriptor::DESCRIPTOR_FILE;

macro_rules! builtin_descriptor {
    ($name:literal) => {
        (
            $name,
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../capabilities/",
                $name,
                "/capability.json"
            )),
        )
    };
}

/// Descriptors shipped with the binary, keyed by capability name.
pub const BUILTIN_DESCRIPTORS: [(&str, &str); 6] = [
    builtin_descriptor!("git-pr"),
    builtin_descriptor!("patch"),
    builtin_descriptor!("plan"),
    builtin_descriptor!("repo-patch"),
    builtin_descriptor!("repo-read"),
    builtin_descriptor!("validate"),
];

const FACTORY_DIR: &str = ".factory";
const FACTORY_GITIGNORE: &str = "runs/\n";

/// Options for [`init_workspace`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite existing factory-owned files.
    pub force: bool,
}

/// Files written by [`init_workspace`].
#[derive(Debug, Clone)]
pub struct InitReport {
    pub config_path: PathBuf,
    pub descriptor_paths: Vec<PathBuf>,
    pub gitignore_path: PathBuf,
}

/// Write `factory.toml`, the built-in descriptors, and `.factory/.gitignore`.
///
/// Fails if any of them already exists unless `options.force` is set.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<InitReport> {
    let config = FactoryConfig::default();
    let config_path = root.join(CONFIG_FILE);
    let capabilities_dir = config.capabilities_dir(root);
    let descriptor_paths: Vec<PathBuf> = BUILTIN_DESCRIPTORS
        .iter()
        .map(|(name, _)| capabilities_dir.join(name).join(DESCRIPTOR_FILE))
        .collect();
    let gitignore_path = root.join(FACTORY_DIR).join(".gitignore");

    if !options.force {
        let existing: Vec<String> = std::iter::once(&config_path)
            .chain(descriptor_paths.iter())
            .chain(std::iter::once(&gitignore_path))
            .filter(|path| path.exists())
            .map(|path| path.display().to_string())
            .collect();
        if !existing.is_empty() {
            return Err(anyhow!(
                "factory init: {} already exists (use --force to overwrite)",
                existing.join(", ")
            ));
        }
    }

    write_config(&config_path, &config)?;
    for ((_, contents), path) in BUILTIN_DESCRIPTORS.iter().zip(&descriptor_paths) {
        write_atomic(path, contents.as_bytes())?;
    }
    write_atomic(&gitignore_path, FACTORY_GITIGNORE.as_bytes())?;
    info!(root = %root.display(), force = options.force, "initialized factory workspace");

    Ok(InitReport {
        config_path,
        descriptor_paths,
        gitignore_path,
    })
}

/// Lowercase `raw`, replacing every run of other characters with a single `-`.
pub fn kebab_case(raw: &str) -> String {
    let mut out = String::new();
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

/// Write a descriptor stub for a new capability under `capabilities_dir`.
///
/// The stub's entry is `builtin:<name>`, which stays unwired until a
/// capability with that name is added to the capability table.
pub fn new_capability(capabilities_dir: &Path, raw_name: &str) -> Result<PathBuf> {
    let name = kebab_case(raw_name);
    if name.is_empty() {
        return Err(anyhow!("invalid capability name {raw_name:?}"));
    }
    let dir = capabilities_dir.join(&name);
    if dir.exists() {
        return Err(anyhow!("capability already exists: {}", dir.display()));
    }

    let descriptor = json!({
        "id": format!("factory.{name}"),
        "name": name,
        "version": "0.1.0",
        "entry": format!("builtin:{name}"),
        "description": "",
        "inputSchema": { "type": "object", "properties": {} },
        "outputSchema": { "type": "object", "properties": {} },
        "capabilities": []
    });
    let mut contents = serde_json::to_string_pretty(&descriptor)?;
    contents.push('\n');
    let path = dir.join(DESCRIPTOR_FILE);
    write_atomic(&path, contents.as_bytes())?;
    info!(capability = %name, path = %path.display(), "scaffolded capability");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use std::fs;

    #[test]
    fn init_writes_config_descriptors_and_gitignore() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = init_workspace(temp.path(), &InitOptions::default()).expect("init");

        assert!(report.config_path.is_file());
        assert_eq!(report.descriptor_paths.len(), BUILTIN_DESCRIPTORS.len());
        assert_eq!(
            fs::read_to_string(&report.gitignore_path).expect("read"),
            FACTORY_GITIGNORE
        );

        let registry = Registry::new(temp.path().join("capabilities"));
        assert_eq!(
            registry.list().expect("list"),
            vec!["git-pr", "patch", "plan", "repo-patch", "repo-read", "validate"]
        );
    }

    #[test]
    fn shipped_descriptors_are_valid() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions::default()).expect("init");

        let registry = Registry::new(temp.path().join("capabilities"));
        for (name, errors) in registry.validate_all().expect("validate all") {
            assert!(errors.is_empty(), "{name}: {errors:?}");
        }
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions::default()).expect("init");

        let err = init_workspace(temp.path(), &InitOptions::default()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn force_restores_edited_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = init_workspace(temp.path(), &InitOptions::default()).expect("init");
        fs::write(&report.config_path, "runs_dir = \"elsewhere\"\n").expect("edit");

        init_workspace(temp.path(), &InitOptions { force: true }).expect("re-init");

        let config =
            crate::io::config::load_config(&report.config_path).expect("load config");
        assert_eq!(config, FactoryConfig::default());
    }

    #[test]
    fn kebab_case_normalizes_names() {
        assert_eq!(kebab_case("Retrieval Smoke"), "retrieval-smoke");
        assert_eq!(kebab_case("  lint__check!! "), "lint-check");
        assert_eq!(kebab_case("--"), "");
    }

    #[test]
    fn new_capability_writes_a_valid_stub() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("capabilities");

        let path = new_capability(&dir, "Lint Check").expect("scaffold");
        assert_eq!(path, dir.join("lint-check").join(DESCRIPTOR_FILE));

        let registry = Registry::new(&dir);
        let descriptor = registry.resolve("lint-check").expect("resolve stub");
        assert_eq!(descriptor.entry, "builtin:lint-check");

        let err = new_capability(&dir, "lint-check").unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(new_capability(&dir, "!!").is_err());
    }
}
