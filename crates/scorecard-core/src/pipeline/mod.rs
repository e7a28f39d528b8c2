//! Build pipeline: C source to a minimal wasm module.
//!
//! # Stages
//!
//! ```text
//! source text
//!     │ write main.c
//!     ▼
//! compile ─────────► main.wasm          (non-zero exit: ToolFailed, stop)
//!     │
//!     ▼
//! disassemble ─────► IR text
//!     │ filter_exports
//!     ▼
//! reassemble ──────► main.wasm          (scaffolding exports gone, m/d/s/p)
//!     │
//!     ▼
//! optimize ×N ─────► main.wasm          (while each pass shrinks it)
//! optimize ×1 ─────► main.wasm          (one more pass, always)
//!     │
//!     ▼
//! artifact bytes
//! ```
//!
//! Stages run strictly in order and each waits for the previous one. Every
//! attempt works in its own [`AttemptDirs`] namespace, and a pipeline
//! refuses to start a second attempt while one is in flight.

pub mod ir;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use crate::config::ToolchainConfig;
use crate::error::{Error, Result};
use crate::events::EventSender;
use crate::paths::AttemptDirs;
use crate::toolchain::{BuildStepResult, ToolchainClient};

pub use ir::filter_exports;

/// A pipeline stage that runs an external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Compile,
    Disassemble,
    Reassemble,
    Optimize,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Compile => "compile",
            BuildStage::Disassemble => "disassemble",
            BuildStage::Reassemble => "reassemble",
            BuildStage::Optimize => "optimize",
        };
        f.write_str(name)
    }
}

/// A tool ran and exited non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub stage: BuildStage,
    pub returncode: i32,
    pub stderr: String,
}

/// Everything a successful attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Attempt identifier (name of the scratch directory).
    pub attempt_id: Uuid,
    /// Final module bytes.
    pub artifact: Vec<u8>,
    /// Size right after compilation.
    pub compiled_size: u64,
    /// Size after export stripping and reassembly.
    pub stripped_size: u64,
    /// Final size after optimization.
    pub optimized_size: u64,
    /// Number of optimizer invocations, including the final extra pass.
    pub optimizer_passes: usize,
}

/// Result of an attempt that did not hit an infrastructure fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The artifact was built.
    Built(BuildReport),
    /// A tool exited non-zero; there is no artifact. Its output is already in the log.
    ToolFailed(ToolFailure),
}

impl BuildOutcome {
    /// The artifact bytes, if the attempt produced one.
    pub fn artifact(&self) -> Option<&[u8]> {
        match self {
            BuildOutcome::Built(report) => Some(&report.artifact),
            BuildOutcome::ToolFailed(_) => None,
        }
    }
}

/// The one terminal state every attempt reaches.
#[derive(Debug)]
pub enum AttemptEnd {
    /// Artifact built.
    Succeeded(BuildReport),
    /// A tool rejected the input; diagnostics are in the log.
    Failed(ToolFailure),
    /// The pipeline itself broke.
    Faulted(Error),
}

impl From<Result<BuildOutcome>> for AttemptEnd {
    fn from(result: Result<BuildOutcome>) -> Self {
        match result {
            Ok(BuildOutcome::Built(report)) => AttemptEnd::Succeeded(report),
            Ok(BuildOutcome::ToolFailed(failure)) => AttemptEnd::Failed(failure),
            Err(err) => AttemptEnd::Faulted(err),
        }
    }
}

/// Marks a pipeline busy for as long as it lives.
struct AttemptGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> AttemptGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::AttemptInProgress)?;
        Ok(Self { flag })
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Sizes produced by the optimization loop.
struct Convergence {
    size: u64,
    passes: usize,
}

/// Stage outcome: `Err` carries a tool failure that ends the attempt.
type StageResult<T> = std::result::Result<T, ToolFailure>;

fn check(stage: BuildStage, step: &BuildStepResult) -> StageResult<()> {
    if step.success() {
        Ok(())
    } else {
        tracing::info!("{stage} failed with exit code {}", step.returncode);
        Err(ToolFailure {
            stage,
            returncode: step.returncode,
            stderr: step.stderr.clone(),
        })
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Command line for the compile stage.
pub fn compile_argv(config: &ToolchainConfig, source: &Path, artifact: &Path) -> Vec<String> {
    let mut argv = vec![config.compiler.clone()];
    argv.extend(config.compile_args());
    argv.push("-o".to_string());
    argv.push(path_arg(artifact));
    argv.push(path_arg(source));
    argv
}

/// Command line for the disassemble stage.
pub fn disassemble_argv(config: &ToolchainConfig, artifact: &Path) -> Vec<String> {
    vec![config.disassembler.clone(), path_arg(artifact)]
}

/// Command line for the reassemble stage.
pub fn reassemble_argv(config: &ToolchainConfig, ir: &Path, artifact: &Path) -> Vec<String> {
    vec![
        config.assembler.clone(),
        "-all".to_string(),
        path_arg(ir),
        "-o".to_string(),
        path_arg(artifact),
    ]
}

/// Command line for one optimizer pass (same path in and out).
pub fn optimize_argv(config: &ToolchainConfig, artifact: &Path) -> Vec<String> {
    vec![
        config.optimizer.clone(),
        "-all".to_string(),
        "-Oz".to_string(),
        path_arg(artifact),
        "-o".to_string(),
        path_arg(artifact),
    ]
}

/// Drives one attempt at a time through the toolchain.
pub struct BuildPipeline<C> {
    client: C,
    config: ToolchainConfig,
    work_root: PathBuf,
    events: EventSender,
    keep_scratch: bool,
    in_flight: AtomicBool,
}

impl<C: ToolchainClient> BuildPipeline<C> {
    /// Create a pipeline.
    ///
    /// `events` receives the progress and byte-count lines; the client
    /// reports its own process events.
    pub fn new(client: C, config: ToolchainConfig, work_root: impl Into<PathBuf>, events: EventSender) -> Self {
        Self {
            client,
            config,
            work_root: work_root.into(),
            events,
            keep_scratch: false,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Keep each attempt's scratch directory instead of removing it.
    pub fn keep_scratch(mut self, keep: bool) -> Self {
        self.keep_scratch = keep;
        self
    }

    /// The toolchain client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The configuration in use.
    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// Build `source` into an optimized module.
    ///
    /// # Errors
    ///
    /// - [`Error::AttemptInProgress`] if another attempt is running.
    /// - Any toolchain or byte-store fault. A tool exiting non-zero is
    ///   not an error; it yields [`BuildOutcome::ToolFailed`].
    pub async fn run(&self, source: &str) -> Result<BuildOutcome> {
        let _guard = AttemptGuard::acquire(&self.in_flight)?;
        let attempt = AttemptDirs::new(&self.work_root);
        tracing::info!(attempt = %attempt.id, "build attempt started");

        let result = self.run_stages(&attempt, source).await;

        if !self.keep_scratch
            && let Err(e) = self.client.remove_dir(&attempt.dir).await
        {
            tracing::warn!("failed to remove {}: {}", attempt.dir.display(), e);
        }

        match &result {
            Ok(BuildOutcome::Built(report)) => {
                tracing::info!(attempt = %attempt.id, size = report.optimized_size, "build attempt finished")
            }
            Ok(BuildOutcome::ToolFailed(failure)) => {
                tracing::info!(attempt = %attempt.id, stage = %failure.stage, "build attempt failed")
            }
            Err(e) => tracing::warn!(attempt = %attempt.id, "build attempt faulted: {e}"),
        }
        result
    }

    async fn run_stages(&self, attempt: &AttemptDirs, source: &str) -> Result<BuildOutcome> {
        let source_path = attempt.source();
        let artifact = attempt.artifact();
        let ir_path = attempt.ir();

        self.events.progress("Compiling...");
        self.client.write_file(&source_path, source.as_bytes()).await?;
        let step = self
            .client
            .run_process(&compile_argv(&self.config, &source_path, &artifact))
            .await?;
        if let Err(failure) = check(BuildStage::Compile, &step) {
            return Ok(BuildOutcome::ToolFailed(failure));
        }
        let compiled_size = self.report_size(&artifact).await?;

        self.events.progress("Stripping...");
        let step = self
            .client
            .capture_process(&disassemble_argv(&self.config, &artifact))
            .await?;
        if let Err(failure) = check(BuildStage::Disassemble, &step) {
            return Ok(BuildOutcome::ToolFailed(failure));
        }
        let ir = filter_exports(&step.stdout);
        self.client.write_file(&ir_path, ir.as_bytes()).await?;
        let step = self
            .client
            .run_process(&reassemble_argv(&self.config, &ir_path, &artifact))
            .await?;
        if let Err(failure) = check(BuildStage::Reassemble, &step) {
            return Ok(BuildOutcome::ToolFailed(failure));
        }
        let stripped_size = self.report_size(&artifact).await?;

        self.events.progress("Optimizing...");
        let convergence = match self.optimize_until_stable(&artifact, stripped_size).await? {
            Ok(convergence) => convergence,
            Err(failure) => return Ok(BuildOutcome::ToolFailed(failure)),
        };
        self.events.progress(format!("{} bytes", convergence.size));

        let bytes = self.client.read_file(&artifact).await?;
        Ok(BuildOutcome::Built(BuildReport {
            attempt_id: attempt.id,
            artifact: bytes,
            compiled_size,
            stripped_size,
            optimized_size: convergence.size,
            optimizer_passes: convergence.passes,
        }))
    }

    /// Run the optimizer while it keeps shrinking the module, then once more.
    ///
    /// The first pass always runs. With sizes `s0` (input), `s1`, `s2`, ...
    /// after each pass, looping stops at the first `i` with `s[i] >= s[i-1]`,
    /// so the total number of passes is `i + 1`.
    async fn optimize_until_stable(
        &self,
        artifact: &Path,
        start_size: u64,
    ) -> Result<StageResult<Convergence>> {
        let mut size = start_size;
        let mut passes = 0;

        loop {
            let previous = size;
            if let Err(failure) = self.optimize_once(artifact).await? {
                return Ok(Err(failure));
            }
            passes += 1;
            size = self.client.stat(artifact).await?.size;
            tracing::debug!(pass = passes, previous, size, "optimizer pass");

            if size >= previous {
                break;
            }
        }

        if let Err(failure) = self.optimize_once(artifact).await? {
            return Ok(Err(failure));
        }
        passes += 1;
        size = self.client.stat(artifact).await?.size;
        tracing::debug!(pass = passes, size, "final optimizer pass");

        Ok(Ok(Convergence { size, passes }))
    }

    async fn optimize_once(&self, artifact: &Path) -> Result<StageResult<()>> {
        let step = self
            .client
            .run_process(&optimize_argv(&self.config, artifact))
            .await?;
        Ok(check(BuildStage::Optimize, &step))
    }

    async fn report_size(&self, artifact: &Path) -> Result<u64> {
        let size = self.client.stat(artifact).await?.size;
        self.events.progress(format!("{size} bytes"));
        Ok(size)
    }
}
