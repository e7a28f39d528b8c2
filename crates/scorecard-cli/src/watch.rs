//! Watch command implementation for scorecard CLI.
//!
//! Rebuilds the source on every change. One session is kept for the whole
//! run, so each new artifact replaces the previous published reference.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::{DebounceEventResult, new_debouncer, notify::RecursiveMode};
use tokio::sync::mpsc;

use crate::BuildOptions;
use crate::build::Session;
use crate::colors;

/// Debounce window for editor save bursts.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// File system event for the watched source.
#[derive(Debug, Clone)]
pub enum FileEvent {
    /// The file was written.
    Modified(PathBuf),
    /// The file is gone.
    Removed(PathBuf),
}

/// Watches a single source file.
pub struct FileWatcher {
    /// Debouncer handle (kept alive to maintain watcher).
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<FileEvent>,
}

impl FileWatcher {
    /// Watch `path`, which must be an existing file.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let target = path.canonicalize()?;
        let watch_dir = target.parent().unwrap_or(Path::new(".")).to_path_buf();

        let (tx, rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            let events = match result {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!("watch error: {}", e);
                    return;
                }
            };
            for event in events {
                if event.path != target {
                    continue;
                }
                let file_event = if event.path.exists() {
                    FileEvent::Modified(event.path.clone())
                } else {
                    FileEvent::Removed(event.path.clone())
                };
                let _ = tx.send(file_event);
            }
        })
        .map_err(|e| anyhow::anyhow!("Failed to create file watcher: {}", e))?;

        debouncer
            .watcher()
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| anyhow::anyhow!("Failed to watch {}: {}", watch_dir.display(), e))?;

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Receive the next file event.
    pub async fn recv(&mut self) -> Option<FileEvent> {
        self.rx.recv().await
    }
}

/// Execute the watch command.
pub async fn execute(source: &Path, options: &BuildOptions) -> anyhow::Result<()> {
    let mut session = Session::new(source, options)?;
    let mut watcher = FileWatcher::new(source)?;

    println!(
        "\n{}scorecard watch{} - {}{}{}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        source.display(),
        colors::RESET
    );
    println!("{}", "─".repeat(50));

    rebuild(&mut session).await;

    loop {
        tokio::select! {
            event = watcher.recv() => match event {
                Some(FileEvent::Modified(path)) => {
                    tracing::debug!("change detected in {}", path.display());
                    println!(
                        "\n{}File changed, rebuilding...{}",
                        colors::YELLOW,
                        colors::RESET
                    );
                    rebuild(&mut session).await;
                }
                Some(FileEvent::Removed(path)) => {
                    eprintln!(
                        "\n{}Warning:{} source file removed: {}",
                        colors::YELLOW,
                        colors::RESET,
                        path.display()
                    );
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    // Dropping the session revokes the last published reference
    drop(session);
    Ok(())
}

/// Run one attempt. Errors are printed, never fatal to the watch loop.
async fn rebuild(session: &mut Session) {
    match session.attempt().await {
        Ok(end) => {
            session.conclude(end);
        }
        Err(e) => eprintln!(
            "{}Error:{} {}: {}",
            colors::RED,
            colors::RESET,
            session.source().display(),
            e
        ),
    }

    println!(
        "\n{}Watching for changes... (Ctrl+C to stop){}",
        colors::DIM,
        colors::RESET
    );
}
