//! Nested view of the toolchain processes that are running right now.
//!
//! Start and end notifications arrive strictly nested: an end always closes
//! the most recent unmatched start. Because a new node is always attached
//! under the deepest open node, the open nodes form a single chain from the
//! root, and a stack is the whole tree.
//!
//! ```text
//! Running:
//!   emcc -Oz ... -o main.wasm main.c      depth 1
//!     clang -cc1 ...                      depth 2
//!       wasm-ld ...                       depth 3
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A tracker shared between the event dispatcher and a renderer.
pub type SharedTracker = Arc<Mutex<ProcessTracker>>;

/// Lock a shared tracker, recovering the data if a holder panicked.
pub fn lock_tracker(tracker: &SharedTracker) -> MutexGuard<'_, ProcessTracker> {
    tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One running invocation.
#[derive(Debug, Clone)]
pub struct StatusNode {
    /// Monotonic id, unique within a tracker.
    pub id: u64,
    /// Command line of the invocation.
    pub argv: Vec<String>,
    /// When the start event was observed.
    pub started_at: Instant,
}

impl StatusNode {
    /// Command line joined with spaces.
    pub fn command_line(&self) -> String {
        if self.argv.is_empty() {
            "<empty>".to_string()
        } else {
            self.argv.join(" ")
        }
    }

    /// Time since the start event.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Tracks in-flight toolchain invocations as a LIFO stack.
#[derive(Debug, Default)]
pub struct ProcessTracker {
    stack: Vec<StatusNode>,
    next_id: u64,
    refresh_pending: bool,
}

impl ProcessTracker {
    /// Create an idle tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an idle tracker wrapped for sharing.
    pub fn shared() -> SharedTracker {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Record a process start as a child of the deepest open node.
    ///
    /// Never fails. Returns the id of the new node.
    pub fn on_start(&mut self, argv: Vec<String>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        if argv.is_empty() {
            tracing::warn!("process start without argv");
        }
        tracing::debug!(depth = self.stack.len() + 1, "process start: {}", argv.join(" "));

        self.stack.push(StatusNode {
            id,
            argv,
            started_at: Instant::now(),
        });
        self.refresh_pending = true;
        id
    }

    /// Close the most recent open node.
    ///
    /// An end with nothing open is silently ignored: it returns `None` and
    /// requests no refresh.
    pub fn on_end(&mut self) -> Option<StatusNode> {
        let Some(node) = self.stack.pop() else {
            tracing::debug!("process end with no matching start, ignoring");
            return None;
        };
        tracing::debug!(
            "process end: {} ({:.2}s)",
            node.command_line(),
            node.elapsed().as_secs_f64()
        );
        self.refresh_pending = true;
        Some(node)
    }

    /// Drop every open node at once. Returns how many were removed.
    pub fn reset(&mut self) -> usize {
        let removed = self.stack.len();
        if removed > 0 {
            tracing::debug!("discarding {removed} open process nodes");
            self.stack.clear();
            self.refresh_pending = true;
        }
        removed
    }

    /// Number of open nodes.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Whether nothing is running.
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty()
    }

    /// Open nodes from outermost to innermost.
    pub fn active(&self) -> &[StatusNode] {
        &self.stack
    }

    /// The innermost running invocation.
    pub fn current(&self) -> Option<&StatusNode> {
        self.stack.last()
    }

    /// Consume the pending layout refresh request.
    ///
    /// Any number of changes since the last call collapse into one `true`.
    pub fn take_refresh(&mut self) -> bool {
        std::mem::take(&mut self.refresh_pending)
    }

    /// Render the status panel, one line per open node, indented by depth.
    pub fn render(&self) -> Vec<String> {
        if self.stack.is_empty() {
            return vec!["Idle".to_string()];
        }

        let mut lines = Vec::with_capacity(self.stack.len() + 1);
        lines.push("Running:".to_string());
        for (depth, node) in self.stack.iter().enumerate() {
            lines.push(format!("{}{}", "  ".repeat(depth + 1), node.command_line()));
        }
        lines
    }
}
