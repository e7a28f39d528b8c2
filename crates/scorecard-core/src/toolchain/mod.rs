//! Boundary to the external toolchain.
//!
//! The build pipeline never touches processes or files directly. It talks
//! to a [`ToolchainClient`], which offers a flat byte store keyed by path
//! and a way to run a command line. Implementations report every process
//! they run as a matched start/end pair on the event channel.
//!
//! - [`NativeToolchain`] runs local programs and stores bytes on disk.

mod native;

use std::future::Future;
use std::path::Path;

pub use native::{NativeToolchain, ToolRole, ToolStatus};

use crate::error::Result;

/// Outcome of one toolchain invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStepResult {
    /// Process exit code. Non-zero means the step failed.
    pub returncode: i32,
    /// Everything the process wrote to standard output.
    pub stdout: String,
    /// Everything the process wrote to standard error.
    pub stderr: String,
}

impl BuildStepResult {
    /// Whether the step exited with code zero.
    pub fn success(&self) -> bool {
        self.returncode == 0
    }
}

/// Metadata for a path in the byte store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes.
    pub size: u64,
}

/// An out-of-line toolchain with its own byte store.
pub trait ToolchainClient {
    /// Store `bytes` under `path`, replacing anything already there.
    fn write_file(&self, path: &Path, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Read back the bytes stored under `path`.
    fn read_file(&self, path: &Path) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Size of the bytes stored under `path`.
    fn stat(&self, path: &Path) -> impl Future<Output = Result<FileStat>> + Send;

    /// Remove everything stored under the directory `path`.
    ///
    /// Removing a directory that holds nothing is not an error.
    fn remove_dir(&self, path: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Run a command line, streaming its output lines as events.
    ///
    /// A non-zero exit is a normal result. `Err` means the invocation
    /// itself could not happen.
    fn run_process(
        &self,
        argv: &[String],
    ) -> impl Future<Output = Result<BuildStepResult>> + Send;

    /// Run a command line whose standard output is data, not log text.
    ///
    /// Standard error is still streamed. Defaults to [`Self::run_process`].
    fn capture_process(
        &self,
        argv: &[String],
    ) -> impl Future<Output = Result<BuildStepResult>> + Send {
        self.run_process(argv)
    }
}
