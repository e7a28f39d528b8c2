//! Lifecycle and output events from the toolchain.
//!
//! The toolchain runs out of line and reports what it is doing through a
//! single ordered channel. One [`EventDispatcher`] consumes that channel,
//! keeps the [`ProcessTracker`] in step with start/end events, and forwards
//! every event to a [`LogSink`].
//!
//! ```text
//! NativeToolchain ──┐
//!                   ├─► EventSender ─► mpsc ─► EventDispatcher ─┬─► ProcessTracker
//! BuildPipeline ────┘                                          └─► LogSink
//! ```

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::tracker::{ProcessTracker, SharedTracker, lock_tracker};

/// Something the toolchain or pipeline wants the outside world to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A tool invocation began.
    ProcessStart {
        /// Command line of the invocation.
        argv: Vec<String>,
    },

    /// The most recent unmatched invocation finished.
    ProcessEnd,

    /// One line of a tool's standard output.
    Stdout(String),

    /// One line of a tool's standard error.
    Stderr(String),

    /// A progress or size line written by the pipeline itself.
    Progress(String),
}

/// Sending half of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ProcessEvent>,
}

/// Receiving half of the event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<ProcessEvent>;

/// Create a connected sender/receiver pair.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

impl EventSender {
    /// A sender whose events go nowhere.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Fire and forget. Events sent after the dispatcher is gone are dropped.
    pub fn send(&self, event: ProcessEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event dropped, dispatcher is gone");
        }
    }

    /// Announce a process start.
    pub fn process_start(&self, argv: &[String]) {
        self.send(ProcessEvent::ProcessStart {
            argv: argv.to_vec(),
        });
    }

    /// Announce a process end.
    pub fn process_end(&self) {
        self.send(ProcessEvent::ProcessEnd);
    }

    /// Forward a stdout line.
    pub fn stdout(&self, line: impl Into<String>) {
        self.send(ProcessEvent::Stdout(line.into()));
    }

    /// Forward a stderr line.
    pub fn stderr(&self, line: impl Into<String>) {
        self.send(ProcessEvent::Stderr(line.into()));
    }

    /// Write a pipeline progress line.
    pub fn progress(&self, line: impl Into<String>) {
        self.send(ProcessEvent::Progress(line.into()));
    }
}

/// Destination for the log side of the event stream.
pub trait LogSink: Send {
    /// Called once per event, after the tracker has applied it.
    fn on_event(&mut self, event: &ProcessEvent, tracker: &ProcessTracker);

    /// Called when the set of running processes changed.
    ///
    /// Refreshes are coalesced: a burst of queued events produces one call
    /// after the last of them has been applied.
    fn on_refresh(&mut self, _tracker: &ProcessTracker) {}
}

/// Sink that records the log as text lines.
///
/// Start events become `$ argv` lines; end events leave no line.
#[derive(Debug, Clone, Default)]
pub struct CapturedLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CapturedLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Whether any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for CapturedLog {
    fn on_event(&mut self, event: &ProcessEvent, _tracker: &ProcessTracker) {
        let line = match event {
            ProcessEvent::ProcessStart { argv } => format!("$ {}", argv.join(" ")),
            ProcessEvent::ProcessEnd => return,
            ProcessEvent::Stdout(line)
            | ProcessEvent::Stderr(line)
            | ProcessEvent::Progress(line) => line.clone(),
        };
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}

/// Single consumer of the event channel.
pub struct EventDispatcher<S> {
    rx: EventReceiver,
    tracker: SharedTracker,
    sink: S,
}

impl<S: LogSink> EventDispatcher<S> {
    /// Create a dispatcher feeding `tracker` and `sink`.
    pub fn new(rx: EventReceiver, tracker: SharedTracker, sink: S) -> Self {
        Self { rx, tracker, sink }
    }

    /// Apply one event to the tracker, then hand it to the sink.
    pub fn dispatch(&mut self, event: ProcessEvent) {
        let mut tracker = lock_tracker(&self.tracker);
        match &event {
            ProcessEvent::ProcessStart { argv } => {
                tracker.on_start(argv.clone());
            }
            ProcessEvent::ProcessEnd => {
                tracker.on_end();
            }
            _ => {}
        }
        self.sink.on_event(&event, &tracker);
    }

    /// Hand the sink the status panel if the tracker asked for a redraw.
    pub fn refresh(&mut self) {
        let mut tracker = lock_tracker(&self.tracker);
        if tracker.take_refresh() {
            self.sink.on_refresh(&tracker);
        }
    }

    /// Dispatch events until every sender has been dropped, then return the sink.
    pub async fn run_until_closed(mut self) -> S {
        while let Some(event) = self.rx.recv().await {
            self.dispatch(event);
            while let Ok(event) = self.rx.try_recv() {
                self.dispatch(event);
            }
            self.refresh();
        }
        self.sink
    }
}

impl<S: LogSink + 'static> EventDispatcher<S> {
    /// Run the dispatcher on its own task.
    pub fn spawn(self) -> JoinHandle<S> {
        tokio::spawn(self.run_until_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(cmd: &str) -> Vec<String> {
        cmd.split_whitespace().map(str::to_string).collect()
    }

    #[tokio::test]
    async fn test_dispatch_preserves_order() {
        let (tx, rx) = channel();
        let tracker = ProcessTracker::shared();
        let log = CapturedLog::new();
        let handle = EventDispatcher::new(rx, tracker.clone(), log.clone()).spawn();

        tx.progress("Compiling...");
        tx.process_start(&argv("emcc main.c"));
        tx.stdout("one");
        tx.stderr("two");
        tx.stdout("three");
        tx.process_end();
        drop(tx);

        handle.await.unwrap();
        assert_eq!(
            log.lines(),
            vec!["Compiling...", "$ emcc main.c", "one", "two", "three"]
        );
        assert!(lock_tracker(&tracker).is_idle());
    }

    #[tokio::test]
    async fn test_tracker_sees_nesting() {
        struct DepthSink(Vec<usize>);
        impl LogSink for DepthSink {
            fn on_event(&mut self, _event: &ProcessEvent, tracker: &ProcessTracker) {
                self.0.push(tracker.depth());
            }
        }

        let (tx, rx) = channel();
        let dispatcher = EventDispatcher::new(rx, ProcessTracker::shared(), DepthSink(Vec::new()));

        tx.process_start(&argv("emcc"));
        tx.process_start(&argv("clang"));
        tx.process_end();
        tx.process_end();
        tx.process_end();
        drop(tx);

        let sink = dispatcher.run_until_closed().await;
        assert_eq!(sink.0, vec![1, 2, 1, 0, 0]);
    }

    #[derive(Default)]
    struct PanelSink {
        panels: Vec<Vec<String>>,
    }

    impl LogSink for PanelSink {
        fn on_event(&mut self, _event: &ProcessEvent, _tracker: &ProcessTracker) {}

        fn on_refresh(&mut self, tracker: &ProcessTracker) {
            self.panels.push(tracker.render());
        }
    }

    #[tokio::test]
    async fn test_queued_changes_refresh_once() {
        let (tx, rx) = channel();
        let dispatcher = EventDispatcher::new(rx, ProcessTracker::shared(), PanelSink::default());

        // Everything is queued before the dispatcher runs
        tx.process_start(&argv("emcc main.c"));
        tx.process_start(&argv("clang -cc1"));
        tx.stderr("warning: unused");
        tx.process_end();
        drop(tx);

        let sink = dispatcher.run_until_closed().await;
        assert_eq!(sink.panels, vec![vec!["Running:", "  emcc main.c"]]);
    }

    #[tokio::test]
    async fn test_output_alone_does_not_refresh() {
        let (tx, rx) = channel();
        let dispatcher = EventDispatcher::new(rx, ProcessTracker::shared(), PanelSink::default());

        tx.stdout("one");
        tx.progress("Compiling...");
        tx.process_end();
        drop(tx);

        let sink = dispatcher.run_until_closed().await;
        assert!(sink.panels.is_empty());
    }

    #[test]
    fn test_disconnected_sender_drops_silently() {
        let tx = EventSender::disconnected();
        tx.stdout("nobody listens");
        tx.process_end();
    }
}
