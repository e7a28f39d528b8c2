//! Error types for scorecard-core.
//!
//! Only infrastructure faults live here. A tool that runs and exits non-zero
//! is reported as [`crate::pipeline::BuildOutcome::ToolFailed`], not as an
//! error.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for scorecard-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in scorecard-core.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A toolchain program could not be located.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// A toolchain program could not be started or waited on.
    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    /// A path was read from the byte store before anything wrote it.
    #[error("no such file in byte store: {}", .0.display())]
    MissingFile(PathBuf),

    /// Configuration file could not be parsed.
    #[error("config error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Configuration values are unusable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Another build attempt is already running on this pipeline.
    #[error("a build attempt is already in progress")]
    AttemptInProgress,

    /// Publishing the artifact failed.
    #[error("publish error: {0}")]
    Publish(String),

    /// Text handed to the alphabet-43 decoder contains a foreign character.
    #[error("invalid alphabet-43 character {ch:?} at offset {offset}")]
    InvalidEncoding { ch: char, offset: usize },

    /// An empty argument vector was handed to the toolchain.
    #[error("empty command line")]
    EmptyCommand,
}

impl Error {
    /// A one-line recovery hint for terminal display, if one applies.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::ToolNotFound { .. } => Some(
                "install emscripten and binaryen, or point SCORECARD_EMCC / SCORECARD_WASM_* at them",
            ),
            Error::Spawn { .. } => Some("run `scorecard doctor` to check the toolchain"),
            Error::ConfigParse(_) | Error::InvalidConfig(_) => {
                Some("check the JSON config passed with --config")
            }
            Error::AttemptInProgress => Some("wait for the running build to finish"),
            _ => None,
        }
    }

    /// Format the error together with its hint.
    pub fn with_hint(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}
