//! Repository-relative path normalization and scope matching.

/// Normalize a repository-relative path for comparison.
///
/// Backslashes become `/`, empty and `.` segments are dropped, a leading `/`
/// is stripped and `..` is resolved. Returns `None` when the path escapes the
/// repository root or is empty after normalization.
pub fn normalize_path(raw: &str) -> Option<String> {
    let unified = raw.trim().replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

/// A normalized `fileScope` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeEntry {
    pub path: String,
    /// Entry was written with a trailing separator and matches by prefix only.
    pub directory_only: bool,
}

impl ScopeEntry {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let directory_only = trimmed.ends_with('/') || trimmed.ends_with('\\');
        Some(Self {
            path: normalize_path(trimmed)?,
            directory_only,
        })
    }

    /// True if the normalized `target` is covered by this entry.
    pub fn covers(&self, target: &str) -> bool {
        let under = target
            .strip_prefix(self.path.as_str())
            .is_some_and(|rest| rest.starts_with('/'));
        if self.directory_only {
            return under;
        }
        target == self.path || under
    }
}

/// True if `target` normalizes and lies within at least one scope entry.
pub fn is_path_in_scope(target: &str, file_scope: &[String]) -> bool {
    let Some(target) = normalize_path(target) else {
        return false;
    };
    file_scope
        .iter()
        .filter_map(|entry| ScopeEntry::parse(entry))
        .any(|entry| entry.covers(&target))
}

/// Last path segment of a normalized path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Replace characters outside `[A-Za-z0-9._-]` so the name is safe as a file name.
pub fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        return "_".to_string();
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn equivalent_spellings_normalize_identically() {
        let expected = Some("a/b".to_string());
        assert_eq!(normalize_path("a/b"), expected);
        assert_eq!(normalize_path("./a/b"), expected);
        assert_eq!(normalize_path("a//b"), expected);
        assert_eq!(normalize_path("a\\b"), expected);
        assert_eq!(normalize_path("/a/b"), expected);
        assert_eq!(normalize_path("a/c/../b"), expected);
    }

    #[test]
    fn escaping_or_empty_paths_do_not_normalize() {
        assert_eq!(normalize_path("../etc/passwd"), None);
        assert_eq!(normalize_path("a/../../b"), None);
        assert_eq!(normalize_path("./"), None);
        assert_eq!(normalize_path(""), None);
    }

    #[test]
    fn exact_entry_matches_itself_and_children() {
        let scope = scope(&["src/lib.rs", "docs"]);
        assert!(is_path_in_scope("src/lib.rs", &scope));
        assert!(is_path_in_scope("./src//lib.rs", &scope));
        assert!(is_path_in_scope("docs/guide.md", &scope));
        assert!(!is_path_in_scope("docs-old/guide.md", &scope));
        assert!(!is_path_in_scope("src/main.rs", &scope));
    }

    #[test]
    fn directory_entries_match_by_prefix_only() {
        let scope = scope(&["src/"]);
        assert!(is_path_in_scope("src/main.rs", &scope));
        assert!(!is_path_in_scope("src", &scope));
        assert!(!is_path_in_scope("srcfoo/main.rs", &scope));
    }

    #[test]
    fn escaping_target_is_never_in_scope() {
        assert!(!is_path_in_scope("../hello.txt", &scope(&["hello.txt"])));
    }

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_file_name("hello.txt"), "hello.txt");
        assert_eq!(sanitize_file_name("we ird$name"), "we_ird_name");
        assert_eq!(basename("a/b/c.rs"), "c.rs");
    }
}
