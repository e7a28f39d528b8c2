//! Core engine for scorecard.
//!
//! This crate provides:
//! - The build pipeline (compile, strip exports, optimize until stable)
//! - The toolchain boundary and a native implementation
//! - Lifecycle events and a nested tracker of running processes
//! - Artifact publishing (staged blob or compact viewer URL)

pub mod config;
pub mod error;
pub mod events;
pub mod paths;
pub mod pipeline;
pub mod publish;
pub mod toolchain;
pub mod tracker;

pub use config::ToolchainConfig;
pub use error::{Error, Result};
pub use events::{CapturedLog, EventDispatcher, EventSender, LogSink, ProcessEvent};
pub use paths::AttemptDirs;
pub use pipeline::{AttemptEnd, BuildOutcome, BuildPipeline, BuildReport, BuildStage, ToolFailure};
pub use publish::{ArtifactPublisher, PublishMode, PublishSlot, Published};
pub use toolchain::{BuildStepResult, FileStat, NativeToolchain, ToolchainClient};
pub use tracker::{ProcessTracker, SharedTracker};
