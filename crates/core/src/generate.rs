//! Build-file generator collaborator
//!
//! The watcher treats generation as an opaque, possibly slow, fallible call.

use crate::error::GenerateError;
use crate::target::Target;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

/// Output of a successful generation pass
#[derive(Debug, Clone, Default)]
pub struct GenerateOutput {
    /// Diagnostic output (stdout + stderr)
    pub diagnostics: String,
    pub elapsed: Duration,
}

/// Performs one rule-generation pass over a set of targets
pub trait Generator: Send + Sync {
    fn generate(&self, root: &Path, targets: &[Target]) -> Result<GenerateOutput, GenerateError>;
}

/// Generator that runs an external program
///
/// The targets are appended to the configured arguments and the program runs
/// with the workspace root as its working directory.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    /// Build from a command line such as `["bazel", "run", "//:gazelle", "--"]`
    pub fn from_command(command: &[String]) -> Result<Self, crate::ConfigError> {
        let (program, args) = command
            .split_first()
            .ok_or(crate::ConfigError::EmptyGeneratorCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Generator for CommandGenerator {
    fn generate(&self, root: &Path, targets: &[Target]) -> Result<GenerateOutput, GenerateError> {
        let started = Instant::now();

        let output = Command::new(&self.program)
            .args(&self.args)
            .args(targets.iter().map(Target::as_str))
            .current_dir(root)
            .output()
            .map_err(|source| GenerateError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(GenerateError::Failed {
                status: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(GenerateOutput {
            diagnostics: format!("{stdout}{stderr}").trim().to_string(),
            elapsed: started.elapsed(),
        })
    }
}
