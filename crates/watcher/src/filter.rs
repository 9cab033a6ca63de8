//! Extension filter and ignore set
//!
//! Both are built once from the shared tables in `bsync_core::lang` and are
//! read-only afterwards, so the watch loop, the flush thread and the tracker
//! can share them without locking.
//!
//! Ignore sources:
//! 1. Built-in directory prefixes (always active)
//! 2. Prefixes from config (`watch.ignore_prefixes`)
//! 3. The root `.gitignore` (optional)

use bsync_core::error::ConfigError;
use bsync_core::lang;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path};
use std::sync::Arc;

/// Set of file extensions the session reacts to
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    extensions: Arc<HashSet<String>>,
    /// Languages named in the filter; empty means "all"
    languages: Vec<String>,
}

impl ExtensionFilter {
    /// Build from a language filter (empty = every known language)
    pub fn for_languages(languages: &[String]) -> Result<Self, ConfigError> {
        let pairs = lang::resolve(languages)?;

        let extensions = pairs.iter().map(|(_, ext)| ext.to_string()).collect();
        let named: BTreeSet<String> = if languages.is_empty() {
            BTreeSet::new()
        } else {
            pairs.iter().map(|(name, _)| name.to_string()).collect()
        };

        Ok(Self {
            extensions: Arc::new(extensions),
            languages: named.into_iter().collect(),
        })
    }

    /// Does this path carry one of the selected extensions?
    ///
    /// Extensions compare ASCII case-insensitively, so `Main.KT` is Kotlin.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Languages named in the filter (empty when all are active)
    pub fn languages(&self) -> &[String] {
        &self.languages
    }
}

/// Directory-prefix ignore set
#[derive(Clone)]
pub struct IgnoreSet {
    prefixes: Arc<Vec<String>>,
    gitignore: Option<Arc<Gitignore>>,
}

impl IgnoreSet {
    /// Built-in prefixes plus `extra`
    ///
    /// With `use_gitignore`, patterns from `<root>/.gitignore` also apply.
    pub fn new(root: &Path, extra: &[String], use_gitignore: bool) -> anyhow::Result<Self> {
        let mut prefixes: Vec<String> = lang::IGNORED_DIR_PREFIXES
            .iter()
            .map(|p| p.to_string())
            .collect();
        for prefix in extra {
            let prefix = prefix.trim().trim_end_matches('/');
            if !prefix.is_empty() && !prefixes.iter().any(|p| p == prefix) {
                prefixes.push(prefix.to_string());
            }
        }

        let gitignore = if use_gitignore {
            let gitignore_path = root.join(".gitignore");
            if gitignore_path.exists() {
                let mut builder = GitignoreBuilder::new(root);
                if let Some(e) = builder.add(&gitignore_path) {
                    tracing::warn!("partial .gitignore at {}: {e}", gitignore_path.display());
                }
                Some(Arc::new(builder.build()?))
            } else {
                None
            }
        } else {
            None
        };

        Ok(Self {
            prefixes: Arc::new(prefixes),
            gitignore,
        })
    }

    /// Does a single directory name start with an ignored prefix?
    pub fn is_ignored_name(&self, name: &str) -> bool {
        self.prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// Is the directory at `relative` (to the root) excluded?
    ///
    /// Every component is checked, so anything below an ignored directory is
    /// ignored too.
    pub fn is_ignored_dir(&self, relative: &Path) -> bool {
        for component in relative.components() {
            if let Component::Normal(name) = component {
                if self.is_ignored_name(&name.to_string_lossy()) {
                    return true;
                }
            }
        }

        match &self.gitignore {
            Some(gitignore) if !relative.as_os_str().is_empty() => gitignore
                .matched_path_or_any_parents(relative, true)
                .is_ignore(),
            _ => false,
        }
    }

    /// Is the file at `relative` excluded?
    ///
    /// Only its directories are matched against prefixes; a file named
    /// `.gitignore` is not inside `.git`.
    pub fn is_ignored_file(&self, relative: &Path) -> bool {
        if let Some(parent) = relative.parent() {
            if self.is_ignored_dir(parent) {
                return true;
            }
        }

        match &self.gitignore {
            Some(gitignore) => gitignore
                .matched_path_or_any_parents(relative, false)
                .is_ignore(),
            None => false,
        }
    }

    /// Number of active ignore sources
    pub fn active_sources(&self) -> usize {
        let extra = self.prefixes.len() > lang::IGNORED_DIR_PREFIXES.len();
        1 + usize::from(extra) + usize::from(self.gitignore.is_some())
    }
}

impl std::fmt::Debug for IgnoreSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnoreSet")
            .field("prefixes", &self.prefixes)
            .field("gitignore", &self.gitignore.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_extension_filter_is_exact() {
        let filter =
            ExtensionFilter::for_languages(&["go".to_string(), "kotlin".to_string()]).unwrap();

        assert!(filter.matches(Path::new("src/main.go")));
        assert!(filter.matches(Path::new("app/Main.kt")));
        assert!(filter.matches(Path::new("build.gradle.kts")));
        assert!(!filter.matches(Path::new("tools/gen.py")));
        assert!(!filter.matches(Path::new("README")));
        assert!(!filter.matches(Path::new("main.gox")));
        assert_eq!(filter.languages(), &["go".to_string(), "kotlin".to_string()]);
    }

    #[test]
    fn test_extension_case_is_ignored() {
        let filter = ExtensionFilter::for_languages(&["kotlin".to_string()]).unwrap();

        assert!(filter.matches(Path::new("app/Main.KT")));
        assert!(filter.matches(Path::new("build.gradle.KTS")));
        assert!(!filter.matches(Path::new("tools/GEN.PY")));
    }

    #[test]
    fn test_empty_filter_accepts_all_languages() {
        let filter = ExtensionFilter::for_languages(&[]).unwrap();
        assert!(filter.matches(Path::new("a.py")));
        assert!(filter.matches(Path::new("a.rs")));
        assert!(filter.languages().is_empty());
    }

    #[test]
    fn test_unknown_language_fails_construction() {
        assert!(ExtensionFilter::for_languages(&["klingon".to_string()]).is_err());
    }

    #[test]
    fn test_builtin_prefixes_always_enforced() {
        let temp_dir = TempDir::new().unwrap();
        let ignore = IgnoreSet::new(temp_dir.path(), &[], false).unwrap();

        assert!(ignore.is_ignored_dir(Path::new("node_modules")));
        assert!(ignore.is_ignored_dir(Path::new("web/node_modules/pkg")));
        assert!(ignore.is_ignored_dir(Path::new(".git/objects")));
        assert!(ignore.is_ignored_dir(Path::new("bazel-out")));
        assert!(ignore.is_ignored_dir(Path::new("bazel-bin/src")));

        assert!(!ignore.is_ignored_dir(Path::new("")));
        assert!(!ignore.is_ignored_dir(Path::new("src/server")));
        assert!(!ignore.is_ignored_dir(Path::new("bazel")));
    }

    #[test]
    fn test_file_names_are_not_prefix_matched() {
        let temp_dir = TempDir::new().unwrap();
        let ignore = IgnoreSet::new(temp_dir.path(), &[], false).unwrap();

        assert!(!ignore.is_ignored_file(Path::new(".gitignore")));
        assert!(!ignore.is_ignored_file(Path::new("src/target.go")));
        assert!(ignore.is_ignored_file(Path::new("target/debug/main.rs")));
    }

    #[test]
    fn test_extra_prefixes() {
        let temp_dir = TempDir::new().unwrap();
        let ignore =
            IgnoreSet::new(temp_dir.path(), &["third_party/".to_string()], false).unwrap();

        assert!(ignore.is_ignored_dir(Path::new("third_party/zlib")));
        assert_eq!(ignore.active_sources(), 2);
    }

    #[test]
    fn test_gitignore_patterns() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(".gitignore"), "generated/\n*.pb.go\n").unwrap();

        let ignore = IgnoreSet::new(temp_dir.path(), &[], true).unwrap();
        assert!(ignore.is_ignored_dir(Path::new("generated")));
        assert!(ignore.is_ignored_file(Path::new("generated/x.go")));
        assert!(ignore.is_ignored_file(Path::new("api/service.pb.go")));
        assert!(!ignore.is_ignored_file(Path::new("api/service.go")));
        assert_eq!(ignore.active_sources(), 2);
    }

    #[test]
    fn test_gitignore_disabled() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(".gitignore"), "generated/\n").unwrap();

        let ignore = IgnoreSet::new(temp_dir.path(), &[], false).unwrap();
        assert!(!ignore.is_ignored_dir(Path::new("generated")));
        assert_eq!(ignore.active_sources(), 1);
    }
}
