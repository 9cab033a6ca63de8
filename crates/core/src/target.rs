//! Directory keys and build-target addressing
//!
//! A directory key is the `/`-separated path of a directory relative to the
//! workspace root; the root itself is `"."`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};

/// Key used for the workspace root directory
pub const ROOT_DIR: &str = ".";

/// Build-file names, most specific first
pub const BUILD_FILE_NAMES: &[&str] = &["BUILD.bazel", "BUILD"];

/// Name used when a directory has no build file yet
pub const DEFAULT_BUILD_FILE: &str = "BUILD.bazel";

/// A build-target address handed to the generator
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Wildcard target for a directory key
    ///
    /// The root maps to the recursive `//...` pattern, every other
    /// directory to its own `:all` wildcard.
    pub fn for_dir(dir: &str) -> Self {
        let dir = dir.trim_matches('/');
        if dir.is_empty() || dir == ROOT_DIR {
            Self("//...".to_string())
        } else {
            Self(format!("//{dir}:all"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Directory key for a path relative to the root
///
/// Returns `"."` for the empty path.
pub fn dir_key(relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        ROOT_DIR.to_string()
    } else {
        parts.join("/")
    }
}

/// Most specific existing build file in `dir`, or the default name
pub fn build_file_name(dir: &Path) -> &'static str {
    BUILD_FILE_NAMES
        .iter()
        .copied()
        .find(|name| dir.join(name).is_file())
        .unwrap_or(DEFAULT_BUILD_FILE)
}

/// Resolve a directory key back to a path under `root`
pub fn dir_path(root: &Path, key: &str) -> std::path::PathBuf {
    if key == ROOT_DIR {
        root.to_path_buf()
    } else {
        root.join(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_root_maps_to_recursive_wildcard() {
        assert_eq!(Target::for_dir(".").as_str(), "//...");
        assert_eq!(Target::for_dir("").as_str(), "//...");
    }

    #[test]
    fn test_subdir_maps_to_package_wildcard() {
        assert_eq!(Target::for_dir("src/server").as_str(), "//src/server:all");
        assert_eq!(Target::for_dir("/lib/").to_string(), "//lib:all");
    }

    #[test]
    fn test_dir_key() {
        assert_eq!(dir_key(Path::new("")), ".");
        assert_eq!(dir_key(Path::new("src")), "src");
        assert_eq!(dir_key(Path::new("src/a/b")), "src/a/b");
        assert_eq!(dir_key(Path::new("./src")), "src");
    }

    #[test]
    fn test_build_file_name_prefers_bazel_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        assert_eq!(build_file_name(dir), "BUILD.bazel");

        fs::write(dir.join("BUILD"), "").unwrap();
        assert_eq!(build_file_name(dir), "BUILD");

        fs::write(dir.join("BUILD.bazel"), "").unwrap();
        assert_eq!(build_file_name(dir), "BUILD.bazel");
    }

    #[test]
    fn test_dir_path_round_trip() {
        let root = Path::new("/repo");
        assert_eq!(dir_path(root, "."), Path::new("/repo"));
        assert_eq!(dir_path(root, "a/b"), Path::new("/repo/a/b"));
    }
}
