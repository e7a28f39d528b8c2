//! Build command implementation for scorecard CLI.
//!
//! Runs one attempt through the native toolchain, streams its log to the
//! terminal and publishes the finished module.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use scorecard_core::events::channel;
use scorecard_core::paths::default_work_root;
use scorecard_core::publish::{ARTIFACT_FILENAME, publisher_for};
use scorecard_core::tracker::lock_tracker;
use scorecard_core::{
    ArtifactPublisher, AttemptEnd, BuildPipeline, BuildReport, EventDispatcher, LogSink,
    NativeToolchain, ProcessEvent, ProcessTracker, PublishSlot, Published, SharedTracker,
    ToolchainConfig,
};

use crate::colors;
use crate::BuildOptions;

/// Execute the build command.
pub async fn execute(source: &Path, options: &BuildOptions) -> anyhow::Result<ExitCode> {
    let mut session = Session::new(source, options)?;
    let end = session.attempt().await?;

    Ok(if session.conclude(end) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Prints the event stream, nesting tool commands by tracker depth.
///
/// With `status` set, the running-process panel is redrawn on stderr
/// whenever it changes.
#[derive(Debug, Default)]
pub struct TerminalLog {
    status: bool,
}

impl TerminalLog {
    pub fn new(status: bool) -> Self {
        Self { status }
    }
}

impl LogSink for TerminalLog {
    fn on_event(&mut self, event: &ProcessEvent, tracker: &ProcessTracker) {
        match event {
            ProcessEvent::ProcessStart { argv } => {
                let indent = "  ".repeat(tracker.depth().saturating_sub(1));
                println!("{}{}$ {}{}", indent, colors::DIM, argv.join(" "), colors::RESET);
            }
            ProcessEvent::ProcessEnd => {}
            ProcessEvent::Stdout(line) => println!("{}", line),
            ProcessEvent::Stderr(line) => eprintln!("{}", line),
            ProcessEvent::Progress(line) => {
                println!("{}{}{}", colors::BOLD, line, colors::RESET);
            }
        }
        colors::flush_stdout();
    }

    fn on_refresh(&mut self, tracker: &ProcessTracker) {
        if !self.status {
            return;
        }
        for line in tracker.render() {
            eprintln!("{}[status] {}{}", colors::CYAN, line, colors::RESET);
        }
    }
}

/// Everything that outlives a single attempt.
///
/// `slot` is declared before `publisher` so the live reference is revoked
/// before the staging area goes away.
pub struct Session {
    source: PathBuf,
    config: ToolchainConfig,
    work_root: PathBuf,
    keep_scratch: bool,
    status: bool,
    output: PathBuf,
    tracker: SharedTracker,
    slot: PublishSlot,
    publisher: Box<dyn ArtifactPublisher>,
}

impl Session {
    /// Load configuration, resolve the toolchain and set up publishing.
    pub fn new(source: &Path, options: &BuildOptions) -> anyhow::Result<Self> {
        if !source.exists() {
            anyhow::bail!("Source not found: {}", source.display());
        }

        let config = load_config(options)?;
        let config = NativeToolchain::resolve(&config)?;

        let work_root = config
            .work_root
            .clone()
            .unwrap_or_else(|| default_work_root(source));
        let publisher = publisher_for(options.publish.into(), &config.viewer_url)?;

        Ok(Self {
            source: source.to_path_buf(),
            config,
            work_root,
            keep_scratch: options.keep_scratch,
            status: options.status,
            output: options
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(ARTIFACT_FILENAME)),
            tracker: ProcessTracker::shared(),
            slot: PublishSlot::new(),
            publisher,
        })
    }

    /// The source file this session builds.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Read the source and run one attempt to its terminal state.
    ///
    /// Each attempt gets its own event channel. The dispatcher is drained
    /// before returning, so every log line has been printed and the tracker
    /// reflects the whole attempt.
    pub async fn attempt(&mut self) -> anyhow::Result<AttemptEnd> {
        let text = fs::read_to_string(&self.source)?;

        let (tx, rx) = channel();
        let sink = TerminalLog::new(self.status);
        let dispatcher = EventDispatcher::new(rx, self.tracker.clone(), sink).spawn();

        let pipeline = BuildPipeline::new(
            NativeToolchain::new(tx.clone()),
            self.config.clone(),
            &self.work_root,
            tx,
        )
        .keep_scratch(self.keep_scratch);

        let result = pipeline.run(&text).await;
        drop(pipeline);

        if let Err(e) = dispatcher.await {
            tracing::warn!("event dispatcher stopped early: {}", e);
        }

        let leftover = lock_tracker(&self.tracker).reset();
        if leftover > 0 {
            tracing::debug!("cleared {} unmatched process entries", leftover);
        }

        Ok(AttemptEnd::from(result))
    }

    /// Print the terminal message for `end` and publish on success.
    ///
    /// Returns whether the attempt produced a published module.
    pub fn conclude(&mut self, end: AttemptEnd) -> bool {
        match end {
            AttemptEnd::Succeeded(report) => match self.publish(&report) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("publishing failed: {:#}", e);
                    something_went_wrong();
                    false
                }
            },
            AttemptEnd::Failed(failure) => {
                tracing::debug!("{} exited with {}", failure.stage, failure.returncode);
                println!(
                    "{}Compilation failed, check the output above{}",
                    colors::RED,
                    colors::RESET
                );
                false
            }
            AttemptEnd::Faulted(e) => {
                tracing::warn!("build faulted: {}", e.with_hint());
                something_went_wrong();
                false
            }
        }
    }

    fn publish(&mut self, report: &BuildReport) -> anyhow::Result<()> {
        let published = self.publisher.publish(&report.artifact)?;
        let published = self.slot.replace(published);

        println!(
            "{}Finished!{} Final size: {}",
            colors::GREEN,
            colors::RESET,
            report.optimized_size
        );

        match published {
            Published::Blob(handle) => {
                let saved = handle.save_as(&self.output)?;
                println!("Saved to {}{}{}", colors::CYAN, saved.display(), colors::RESET);
            }
            Published::Url(url) => println!("{}", url),
        }
        Ok(())
    }
}

fn something_went_wrong() {
    println!(
        "{}Something went wrong, please file a bug report{}",
        colors::RED,
        colors::RESET
    );
}

/// Configuration for `options`: file and environment layers, then CLI flags.
pub fn load_config(options: &BuildOptions) -> anyhow::Result<ToolchainConfig> {
    let mut config = ToolchainConfig::load(options.config.as_deref())?;
    if let Some(flags) = &options.flags {
        config.compile_flags = flags.clone();
    }
    if let Some(url) = &options.viewer_url {
        config.viewer_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}
