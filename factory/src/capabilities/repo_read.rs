//! `repo-read`: deterministic, read-only repository queries.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::paths::normalize_path;
use crate::registry::Capability;

/// Directories never walked, regardless of `.gitignore`.
const ALWAYS_SKIPPED: [&str; 3] = [".git", ".factory", "target"];

static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:pub(?:\([^)]*\))?\s+)?(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|type|const|static|mod|function|class|interface)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
    .expect("symbol regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryType {
    FileList,
    FileContent,
    SymbolSearch,
    References,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    #[serde(rename = "type")]
    pub kind: QueryType,
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Input {
    repo_root: PathBuf,
    queries: Vec<Query>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Match {
    File {
        path: String,
    },
    Content {
        path: String,
        content: String,
        #[serde(rename = "lineCount")]
        line_count: usize,
    },
    Symbol {
        path: String,
        line: String,
        #[serde(rename = "lineNumber")]
        line_number: usize,
        symbol: String,
    },
    Reference {
        path: String,
        line: String,
        #[serde(rename = "lineNumber")]
        line_number: usize,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryResult {
    query_index: usize,
    #[serde(rename = "type")]
    kind: QueryType,
    matches: Vec<Match>,
}

pub struct RepoRead;

impl Capability for RepoRead {
    #[instrument(skip_all, name = "repo_read")]
    fn run(&self, input: &Value) -> Result<Value> {
        let input: Input =
            serde_json::from_value(input.clone()).context("parse repo-read input")?;
        if !input.repo_root.is_dir() {
            bail!("repoRoot {} is not a directory", input.repo_root.display());
        }
        let rules = IgnoreRules::load(&input.repo_root)?;
        let mut cache: BTreeMap<Option<String>, Vec<String>> = BTreeMap::new();
        let mut results = Vec::with_capacity(input.queries.len());

        for (idx, query) in input.queries.iter().enumerate() {
            let scope = query.scope.as_deref().and_then(normalize_path);
            if !cache.contains_key(&scope) {
                let files = collect_files(&input.repo_root, scope.as_deref(), &rules)?;
                cache.insert(scope.clone(), files);
            }
            let files = cache.get(&scope).map(Vec::as_slice).unwrap_or_default();
            let matches = run_query(&input.repo_root, query, files);
            debug!(query = idx, matches = matches.len(), "query finished");
            results.push(QueryResult {
                query_index: idx,
                kind: query.kind,
                matches,
            });
        }

        Ok(serde_json::json!({ "results": results }))
    }
}

fn run_query(root: &Path, query: &Query, files: &[String]) -> Vec<Match> {
    match query.kind {
        QueryType::FileList => files
            .iter()
            .filter(|path| path_matches(path, &query.pattern))
            .map(|path| Match::File { path: path.clone() })
            .collect(),
        QueryType::FileContent => files
            .iter()
            .filter(|path| path_matches(path, &query.pattern))
            .filter_map(|path| {
                let content = read_text(root, path)?;
                Some(Match::Content {
                    path: path.clone(),
                    line_count: content.lines().count(),
                    content,
                })
            })
            .collect(),
        QueryType::SymbolSearch => scan_lines(root, files, |line| {
            let trimmed = line.trim_start();
            let caps = SYMBOL_RE.captures(trimmed)?;
            if !query.pattern.is_empty() && !trimmed.contains(&query.pattern) {
                return None;
            }
            Some(caps[1].to_string())
        })
        .into_iter()
        .map(|(path, line_number, line, symbol)| Match::Symbol {
            path,
            line,
            line_number,
            symbol,
        })
        .collect(),
        QueryType::References => scan_lines(root, files, |line| {
            let trimmed = line.trim_start();
            let is_reference = trimmed.starts_with("use ")
                || trimmed.starts_with("pub use ")
                || trimmed.starts_with("mod ")
                || trimmed.starts_with("import ")
                || trimmed.contains("require(");
            (is_reference && line.contains(&query.pattern)).then(String::new)
        })
        .into_iter()
        .map(|(path, line_number, line, _)| Match::Reference {
            path,
            line,
            line_number,
        })
        .collect(),
    }
}

/// Visit every line of every readable file, keeping lines `select` accepts.
fn scan_lines<F>(root: &Path, files: &[String], select: F) -> Vec<(String, usize, String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut hits = Vec::new();
    for path in files {
        let Some(text) = read_text(root, path) else {
            continue;
        };
        for (idx, line) in text.lines().enumerate() {
            if let Some(extra) = select(line) {
                hits.push((path.clone(), idx + 1, line.to_string(), extra));
            }
        }
    }
    hits
}

fn read_text(root: &Path, rel: &str) -> Option<String> {
    fs::read_to_string(root.join(rel)).ok()
}

fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{escaped}$")).ok()
}

fn path_matches(path: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let base = path.rsplit('/').next().unwrap_or(path);
    if pattern.contains('*') {
        return glob_to_regex(pattern).is_some_and(|re| re.is_match(path) || re.is_match(base));
    }
    path.contains(pattern)
}

fn in_scope(path: &str, scope: Option<&str>) -> bool {
    match scope {
        None => true,
        Some(scope) => path == scope || path.starts_with(&format!("{scope}/")),
    }
}

fn should_descend(path: &str, scope: Option<&str>) -> bool {
    match scope {
        None => true,
        Some(scope) => in_scope(path, Some(scope)) || scope.starts_with(&format!("{path}/")),
    }
}

/// Repository files under `scope`, sorted by path.
fn collect_files(root: &Path, scope: Option<&str>, rules: &IgnoreRules) -> Result<Vec<String>> {
    let mut files = Vec::new();
    walk(root, root, scope, rules, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(
    root: &Path,
    dir: &Path,
    scope: Option<&str>,
    rules: &IgnoreRules,
    files: &mut Vec<String>,
) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("read dir {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("read dir {}", dir.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);

        if is_dir {
            let name = entry.file_name();
            if ALWAYS_SKIPPED.iter().any(|skip| name == *skip) {
                continue;
            }
            if rules.is_ignored(&rel, true) || !should_descend(&rel, scope) {
                continue;
            }
            walk(root, &path, scope, rules, files)?;
            continue;
        }

        if rules.is_ignored(&rel, false) || !in_scope(&rel, scope) {
            continue;
        }
        files.push(rel);
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct IgnoreRule {
    negated: bool,
    directory_only: bool,
    pattern: String,
}

impl IgnoreRule {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let (negated, raw) = match line.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, line),
        };
        let directory_only = raw.ends_with('/');
        let pattern = raw.trim_start_matches('/').trim_end_matches('/').to_string();
        if pattern.is_empty() {
            return None;
        }
        Some(Self {
            negated,
            directory_only,
            pattern,
        })
    }

    fn matches(&self, path: &str, is_dir: bool) -> bool {
        let segments: Vec<&str> = path.split('/').collect();
        let base = segments.last().copied().unwrap_or(path);

        if self.directory_only && !is_dir && path.starts_with(&format!("{}/", self.pattern)) {
            return true;
        }
        if self.pattern.contains('*') {
            let Some(re) = glob_to_regex(&self.pattern) else {
                return false;
            };
            if self.directory_only {
                return (is_dir && (re.is_match(path) || re.is_match(base)))
                    || segments[..segments.len().saturating_sub(1)]
                        .iter()
                        .any(|segment| re.is_match(segment));
            }
            return re.is_match(path) || re.is_match(base);
        }
        if !self.pattern.contains('/') {
            if self.directory_only {
                let dirs = if is_dir {
                    &segments[..]
                } else {
                    &segments[..segments.len().saturating_sub(1)]
                };
                return dirs.contains(&self.pattern.as_str());
            }
            return segments.contains(&self.pattern.as_str());
        }
        if self.directory_only && !is_dir {
            return false;
        }
        path == self.pattern || path.starts_with(&format!("{}/", self.pattern))
    }
}

/// Simple root `.gitignore` rules: plain names, `*` globs, trailing `/`, `!` negation.
#[derive(Debug, Clone, Default)]
struct IgnoreRules {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRules {
    fn load(root: &Path) -> Result<Self> {
        let path = root.join(".gitignore");
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(Self {
            rules: text.lines().filter_map(IgnoreRule::parse).collect(),
        })
    }

    /// Last matching rule wins.
    fn is_ignored(&self, path: &str, is_dir: bool) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(path, is_dir))
            .is_some_and(|rule| !rule.negated)
    }
}
