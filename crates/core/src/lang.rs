//! Language and ignore tables shared by the watcher, the tracker and the generator
//!
//! Both the watch loop and the generation pass read these tables, so they
//! always agree on what counts as a source file and which directories are
//! never scanned.

use crate::error::ConfigError;

/// Language identifier -> file extensions (without the leading dot)
pub const LANGUAGES: &[(&str, &[&str])] = &[
    ("go", &["go"]),
    ("kotlin", &["kt", "kts"]),
    ("java", &["java"]),
    ("python", &["py", "pyi"]),
    ("typescript", &["ts", "tsx", "mts", "cts"]),
    ("javascript", &["js", "jsx", "mjs", "cjs"]),
    ("proto", &["proto"]),
    ("rust", &["rs"]),
    ("scala", &["scala"]),
    ("cc", &["c", "cc", "cpp", "cxx", "h", "hh", "hpp"]),
];

/// Directory-name prefixes that exclude a whole subtree
///
/// `bazel-` covers the output symlinks (`bazel-out`, `bazel-bin`, ...).
pub const IGNORED_DIR_PREFIXES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".jj",
    ".bsync",
    ".idea",
    ".vscode",
    "node_modules",
    "bazel-",
    "__pycache__",
    ".venv",
    "target",
];

/// Extensions for a single language, if it is known
pub fn extensions_for(language: &str) -> Option<&'static [&'static str]> {
    LANGUAGES
        .iter()
        .find(|(name, _)| *name == language)
        .map(|(_, exts)| *exts)
}

/// Resolve a language filter into `(language, extension)` pairs
///
/// An empty filter selects every known language.
pub fn resolve(filter: &[String]) -> Result<Vec<(&'static str, &'static str)>, ConfigError> {
    let mut pairs = Vec::new();

    if filter.is_empty() {
        for (name, exts) in LANGUAGES {
            pairs.extend(exts.iter().map(|ext| (*name, *ext)));
        }
        return Ok(pairs);
    }

    for requested in filter {
        let requested = requested.trim().to_ascii_lowercase();
        let (name, exts) = LANGUAGES
            .iter()
            .find(|(name, _)| *name == requested)
            .ok_or_else(|| ConfigError::UnknownLanguage {
                language: requested.clone(),
                known: known_languages().join(", "),
            })?;
        pairs.extend(exts.iter().map(|ext| (*name, *ext)));
    }

    Ok(pairs)
}

/// Names of all known languages, in table order
pub fn known_languages() -> Vec<&'static str> {
    LANGUAGES.iter().map(|(name, _)| *name).collect()
}
