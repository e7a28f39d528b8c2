//! Local toolchain: programs on this machine, byte store on disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::config::ToolchainConfig;
use crate::error::{Error, Result};
use crate::events::EventSender;

use super::{BuildStepResult, FileStat, ToolchainClient};

/// What a configured program is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRole {
    Compiler,
    Disassembler,
    Assembler,
    Optimizer,
}

impl ToolRole {
    /// All roles in pipeline order.
    pub const ALL: [ToolRole; 4] = [
        ToolRole::Compiler,
        ToolRole::Disassembler,
        ToolRole::Assembler,
        ToolRole::Optimizer,
    ];

    /// Human-readable role name.
    pub fn label(self) -> &'static str {
        match self {
            ToolRole::Compiler => "compiler",
            ToolRole::Disassembler => "disassembler",
            ToolRole::Assembler => "assembler",
            ToolRole::Optimizer => "optimizer",
        }
    }

    fn program(self, config: &ToolchainConfig) -> &str {
        match self {
            ToolRole::Compiler => &config.compiler,
            ToolRole::Disassembler => &config.disassembler,
            ToolRole::Assembler => &config.assembler,
            ToolRole::Optimizer => &config.optimizer,
        }
    }
}

/// Availability of one configured program.
#[derive(Debug, Clone)]
pub struct ToolStatus {
    pub role: ToolRole,
    /// Program as configured.
    pub program: String,
    /// Absolute path, if it could be found.
    pub resolved: Option<PathBuf>,
    /// First line of `--version` output, if the program answered.
    pub version: Option<String>,
}

/// Toolchain backed by local processes and the local filesystem.
#[derive(Debug, Clone)]
pub struct NativeToolchain {
    events: EventSender,
}

impl NativeToolchain {
    /// Create a client that reports process activity to `events`.
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    /// Find a program by path or in `PATH`.
    pub fn find_program(program: &str) -> Result<PathBuf> {
        let as_path = Path::new(program);
        if as_path.components().count() > 1 {
            return if as_path.exists() {
                Ok(as_path.to_path_buf())
            } else {
                Err(Error::ToolNotFound {
                    tool: program.to_string(),
                })
            };
        }

        which::which(program).map_err(|_| Error::ToolNotFound {
            tool: program.to_string(),
        })
    }

    /// Return a copy of `config` with every program replaced by its absolute path.
    pub fn resolve(config: &ToolchainConfig) -> Result<ToolchainConfig> {
        let mut resolved = config.clone();
        for role in ToolRole::ALL {
            let path = Self::find_program(role.program(config))?;
            let path = path.to_string_lossy().into_owned();
            tracing::debug!("{} resolved to {}", role.label(), path);
            match role {
                ToolRole::Compiler => resolved.compiler = path,
                ToolRole::Disassembler => resolved.disassembler = path,
                ToolRole::Assembler => resolved.assembler = path,
                ToolRole::Optimizer => resolved.optimizer = path,
            }
        }
        Ok(resolved)
    }

    /// Check every configured program and ask it for its version.
    ///
    /// Never fails; missing programs are reported in the returned statuses.
    pub async fn inspect(config: &ToolchainConfig) -> Vec<ToolStatus> {
        let mut statuses = Vec::with_capacity(ToolRole::ALL.len());
        for role in ToolRole::ALL {
            let program = role.program(config).to_string();
            let resolved = Self::find_program(&program).ok();
            let version = match &resolved {
                Some(path) => Self::version_of(path).await,
                None => None,
            };
            statuses.push(ToolStatus {
                role,
                program,
                resolved,
                version,
            });
        }
        statuses
    }

    async fn version_of(path: &Path) -> Option<String> {
        let output = Command::new(path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|line| line.trim().to_string())
    }

    async fn spawn_and_collect(&self, argv: &[String], echo_stdout: bool) -> Result<BuildStepResult> {
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::EmptyCommand);
        };

        let spawn_error = |message: String| Error::Spawn {
            program: program.clone(),
            message,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error("failed to capture stderr".to_string()))?;

        let out_events = echo_stdout.then(|| self.events.clone());
        let err_events = Some(self.events.clone());

        let (stdout, stderr, status) = tokio::try_join!(
            collect_lines(stdout, out_events, false),
            collect_lines(stderr, err_events, true),
            child.wait(),
        )
        .map_err(|e| spawn_error(e.to_string()))?;

        // Killed by a signal: no exit code, report as a generic failure
        let returncode = status.code().unwrap_or(-1);
        tracing::debug!("{} exited with {}", program, returncode);

        Ok(BuildStepResult {
            returncode,
            stdout,
            stderr,
        })
    }

    async fn run_tracked(&self, argv: &[String], echo_stdout: bool) -> Result<BuildStepResult> {
        if argv.is_empty() {
            return Err(Error::EmptyCommand);
        }

        self.events.process_start(argv);
        let result = self.spawn_and_collect(argv, echo_stdout).await;
        self.events.process_end();
        result
    }
}

/// Read `reader` line by line, forwarding each line as it arrives.
///
/// Tools may print bytes that are not UTF-8 (a source file quoted in a
/// diagnostic, say). Lines are decoded lossily so output never aborts a run.
async fn collect_lines(
    reader: impl AsyncRead + Unpin,
    events: Option<EventSender>,
    is_stderr: bool,
) -> std::io::Result<String> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut collected = String::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);

        if let Some(events) = &events {
            if is_stderr {
                events.stderr(&*line);
            } else {
                events.stdout(&*line);
            }
        }
        collected.push_str(&line);
        collected.push('\n');
    }
    Ok(collected)
}

impl ToolchainClient for NativeToolchain {
    async fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::MissingFile(path.to_path_buf()),
            _ => Error::Io(e),
        })
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::MissingFile(path.to_path_buf()),
            _ => Error::Io(e),
        })?;
        Ok(FileStat {
            size: metadata.len(),
        })
    }

    async fn remove_dir(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn run_process(&self, argv: &[String]) -> Result<BuildStepResult> {
        self.run_tracked(argv, true).await
    }

    async fn capture_process(&self, argv: &[String]) -> Result<BuildStepResult> {
        self.run_tracked(argv, false).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::events::{CapturedLog, EventDispatcher, channel};
    use crate::tracker::{ProcessTracker, lock_tracker};
    use tempfile::TempDir;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_byte_store_roundtrip() {
        let temp = TempDir::new().unwrap();
        let client = NativeToolchain::new(EventSender::disconnected());
        let path = temp.path().join("nested").join("main.wasm");

        client.write_file(&path, b"\0asm\x01\0\0\0").await.unwrap();
        assert_eq!(client.stat(&path).await.unwrap().size, 8);
        assert_eq!(client.read_file(&path).await.unwrap(), b"\0asm\x01\0\0\0");
    }

    #[tokio::test]
    async fn test_remove_dir() {
        let temp = TempDir::new().unwrap();
        let client = NativeToolchain::new(EventSender::disconnected());
        let dir = temp.path().join("attempts").join("one");

        client.write_file(&dir.join("main.c"), b"int x;").await.unwrap();
        assert!(dir.exists());

        client.remove_dir(&dir).await.unwrap();
        assert!(!dir.exists());
        client.remove_dir(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let client = NativeToolchain::new(EventSender::disconnected());
        let err = client.read_file(&temp.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, Error::MissingFile(_)));
    }

    #[tokio::test]
    async fn test_run_process_streams_and_pairs_events() {
        let (tx, rx) = channel();
        let tracker = ProcessTracker::shared();
        let log = CapturedLog::new();
        let dispatcher = EventDispatcher::new(rx, tracker.clone(), log.clone()).spawn();

        let client = NativeToolchain::new(tx);
        let result = client
            .run_process(&argv(&["sh", "-c", "echo out; echo err >&2; exit 3"]))
            .await
            .unwrap();
        drop(client);
        dispatcher.await.unwrap();

        assert_eq!(result.returncode, 3);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(log.contains("out"));
        assert!(log.contains("err"));
        assert!(lock_tracker(&tracker).is_idle());
    }

    #[tokio::test]
    async fn test_non_utf8_output_is_a_tool_failure() {
        let (tx, rx) = channel();
        let tracker = ProcessTracker::shared();
        let log = CapturedLog::new();
        let dispatcher = EventDispatcher::new(rx, tracker.clone(), log.clone()).spawn();

        let client = NativeToolchain::new(tx);
        let result = client
            .run_process(&argv(&[
                "sh",
                "-c",
                "printf 'main.c:1: error: bad \\377 byte\\r\\n' >&2; echo after >&2; exit 1",
            ]))
            .await
            .unwrap();
        drop(client);
        dispatcher.await.unwrap();

        assert_eq!(result.returncode, 1);
        assert_eq!(result.stderr, "main.c:1: error: bad \u{FFFD} byte\nafter\n");
        assert!(log.contains("error: bad"));
        assert!(log.contains("after"));
        assert!(lock_tracker(&tracker).is_idle());
    }

    #[tokio::test]
    async fn test_capture_process_keeps_stdout_out_of_log() {
        let (tx, rx) = channel();
        let log = CapturedLog::new();
        let dispatcher = EventDispatcher::new(rx, ProcessTracker::shared(), log.clone()).spawn();

        let client = NativeToolchain::new(tx);
        let result = client
            .capture_process(&argv(&["sh", "-c", "echo '(module)'"]))
            .await
            .unwrap();
        drop(client);
        dispatcher.await.unwrap();

        assert_eq!(result.stdout, "(module)\n");
        assert!(!log.contains("(module)"));
    }

    #[tokio::test]
    async fn test_spawn_failure_still_ends_process() {
        let (tx, rx) = channel();
        let tracker = ProcessTracker::shared();
        let dispatcher = EventDispatcher::new(rx, tracker.clone(), CapturedLog::new()).spawn();

        let client = NativeToolchain::new(tx);
        let err = client
            .run_process(&argv(&["/definitely/not/a/compiler"]))
            .await
            .unwrap_err();
        drop(client);
        dispatcher.await.unwrap();

        assert!(matches!(err, Error::Spawn { .. }));
        assert!(lock_tracker(&tracker).is_idle());
    }

    #[tokio::test]
    async fn test_empty_argv() {
        let client = NativeToolchain::new(EventSender::disconnected());
        let err = client.run_process(&[]).await.unwrap_err();
        assert!(matches!(err, Error::EmptyCommand));
    }

    #[test]
    fn test_find_program() {
        assert!(NativeToolchain::find_program("sh").is_ok());
        assert!(matches!(
            NativeToolchain::find_program("/no/such/dir/emcc"),
            Err(Error::ToolNotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_reports_missing_tool() {
        let config = ToolchainConfig {
            compiler: "sh".to_string(),
            disassembler: "scorecard-missing-wasm-dis".to_string(),
            ..Default::default()
        };
        let err = NativeToolchain::resolve(&config).unwrap_err();
        match err {
            Error::ToolNotFound { tool } => assert_eq!(tool, "scorecard-missing-wasm-dis"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inspect_reports_missing() {
        let config = ToolchainConfig {
            compiler: "scorecard-missing-emcc".to_string(),
            ..Default::default()
        };
        let statuses = NativeToolchain::inspect(&config).await;
        assert_eq!(statuses.len(), 4);
        assert_eq!(statuses[0].role, ToolRole::Compiler);
        assert!(statuses[0].resolved.is_none());
        assert!(statuses[0].version.is_none());
    }
}
