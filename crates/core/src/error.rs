//! Error types shared across buildsync crates

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown language '{language}' (known: {known})")]
    UnknownLanguage { language: String, known: String },

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("generator command is empty")]
    EmptyGeneratorCommand,
}

/// Errors from an external generator invocation
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("failed to launch generator '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("generator exited with {}: {stderr}", exit_label(.status))]
    Failed { status: Option<i32>, stderr: String },
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Errors from the incremental tracker
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("tracker I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode tracker state: {0}")]
    Encode(#[from] serde_json::Error),
}
