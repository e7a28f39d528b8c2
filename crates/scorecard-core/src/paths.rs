//! Per-attempt scratch directories.
//!
//! Every build attempt gets its own namespace in the byte store so that two
//! attempts can never race on the same artifact path:
//!
//! ```text
//! <work_root>/
//! └── attempts/
//!     ├── 6f1c…/      # one attempt
//!     │   ├── main.c
//!     │   ├── main.wasm
//!     │   └── main.wat
//!     └── 9a02…/
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Result;

/// File name of the persisted source text.
pub const SOURCE_FILE: &str = "main.c";

/// File name of the binary artifact, rewritten by every stage.
pub const ARTIFACT_FILE: &str = "main.wasm";

/// File name of the textual IR between disassembly and reassembly.
pub const IR_FILE: &str = "main.wat";

/// Directory name holding all attempts under a work root.
const ATTEMPTS_DIR: &str = "attempts";

/// Scratch namespace owned by a single build attempt.
#[derive(Debug, Clone)]
pub struct AttemptDirs {
    /// Unique attempt identifier.
    pub id: Uuid,

    /// The attempt directory itself.
    pub dir: PathBuf,
}

impl AttemptDirs {
    /// Name a fresh attempt directory under `work_root`.
    ///
    /// Nothing is created here. The toolchain's byte store creates the
    /// directory on first write and removes it when the attempt is done.
    pub fn new(work_root: &Path) -> Self {
        let id = Uuid::new_v4();
        let dir = work_root.join(ATTEMPTS_DIR).join(id.to_string());
        Self { id, dir }
    }

    /// Path of the source file.
    pub fn source(&self) -> PathBuf {
        self.dir.join(SOURCE_FILE)
    }

    /// Path of the binary artifact.
    pub fn artifact(&self) -> PathBuf {
        self.dir.join(ARTIFACT_FILE)
    }

    /// Path of the textual IR.
    pub fn ir(&self) -> PathBuf {
        self.dir.join(IR_FILE)
    }

    /// Remove every attempt directory under `work_root`.
    pub fn clean_all(work_root: &Path) -> Result<()> {
        let attempts = work_root.join(ATTEMPTS_DIR);
        if attempts.exists() {
            fs::remove_dir_all(&attempts)?;
        }
        Ok(())
    }
}

/// Default work root for a source file: `.scorecard` next to it.
pub fn default_work_root(source_path: &Path) -> PathBuf {
    source_path
        .parent()
        .unwrap_or(Path::new("."))
        .join(".scorecard")
}
