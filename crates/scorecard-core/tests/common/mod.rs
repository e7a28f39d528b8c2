//! Scripted in-memory toolchain for pipeline tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use scorecard_core::events::{CapturedLog, EventDispatcher, channel};
use scorecard_core::toolchain::{BuildStepResult, FileStat, ToolchainClient};
use scorecard_core::tracker::{ProcessTracker, SharedTracker};
use scorecard_core::{BuildPipeline, Error, EventSender, Result, ToolchainConfig};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Disassembly of a typical card module.
pub const CARD_IR: &str = r#"(module
 (type $0 (func))
 (type $1 (func (result f32)))
 (memory $0 258 258)
 (export "memory" (memory $0))
 (export "title" (global $global$1))
 (export "setup" (func $1))
 (export "process" (func $2))
 (export "_initialize" (func $0))
 (export "__indirect_function_table" (table $0))
 (export "stackSave" (func $3))
 (export "stackRestore" (func $4))
 (export "stackAlloc" (func $5))
 (func $0
  (nop)
 )
)"#;

/// How each fake tool behaves.
#[derive(Debug, Clone)]
pub struct Script {
    /// Exit code of the compiler.
    pub compile_returncode: i32,
    /// Lines the compiler writes to stderr.
    pub compile_stderr: Vec<String>,
    /// Whether the compiler runs a nested sub-tool.
    pub nested_compile: bool,
    /// Size of the freshly compiled module.
    pub compiled_size: usize,
    /// Text the disassembler prints.
    pub ir: String,
    /// Exit code of the disassembler.
    pub disassemble_returncode: i32,
    /// Size of the reassembled module.
    pub reassembled_size: usize,
    /// Size after each optimizer pass; the size stays put once exhausted.
    pub optimizer_sizes: VecDeque<usize>,
    /// Tool whose invocation faults instead of running.
    pub fault_on: Option<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            compile_returncode: 0,
            compile_stderr: Vec::new(),
            nested_compile: false,
            compiled_size: 2048,
            ir: CARD_IR.to_string(),
            disassemble_returncode: 0,
            reassembled_size: 1000,
            optimizer_sizes: VecDeque::from([800, 800]),
            fault_on: None,
        }
    }
}

/// In-memory byte store plus scripted tools.
pub struct ScriptedToolchain {
    events: EventSender,
    script: Mutex<Script>,
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedToolchain {
    pub fn new(script: Script, events: EventSender) -> Self {
        Self {
            events,
            script: Mutex::new(script),
            files: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every command line run so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// How many times `tool` was run.
    pub fn count(&self, tool: &str) -> usize {
        self.calls().iter().filter(|argv| argv[0] == tool).count()
    }

    /// Number of paths in the byte store.
    pub fn stored(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    /// Bytes stored at the path ending in `name`.
    pub fn file_named(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|(path, _)| path.ends_with(name))
            .map(|(_, bytes)| bytes.clone())
    }

    fn output_path(argv: &[String]) -> PathBuf {
        let pos = argv.iter().position(|a| a == "-o").expect("no -o in argv");
        PathBuf::from(&argv[pos + 1])
    }

    fn store(&self, path: PathBuf, size: usize) {
        self.files.lock().unwrap().insert(path, vec![0xAB; size]);
    }

    fn resize(&self, path: &Path, size: usize) {
        if let Some(bytes) = self.files.lock().unwrap().get_mut(path) {
            bytes.resize(size, 0xCD);
        }
    }

    fn execute(&self, argv: &[String]) -> Result<BuildStepResult> {
        let mut script = self.script.lock().unwrap();
        let tool = argv[0].as_str();

        if script.fault_on.as_deref() == Some(tool) {
            return Err(Error::Spawn {
                program: tool.to_string(),
                message: "worker disconnected".to_string(),
            });
        }

        let mut result = BuildStepResult::default();
        match tool {
            "emcc" => {
                if script.nested_compile {
                    self.events.process_start(&["clang".to_string(), "-cc1".to_string()]);
                    self.events.process_end();
                }
                for line in &script.compile_stderr {
                    self.events.stderr(line.as_str());
                    result.stderr.push_str(line);
                    result.stderr.push('\n');
                }
                result.returncode = script.compile_returncode;
                if result.returncode == 0 {
                    self.store(Self::output_path(argv), script.compiled_size);
                }
            }
            "wasm-dis" => {
                result.returncode = script.disassemble_returncode;
                result.stdout = script.ir.clone();
            }
            "wasm-as" => {
                self.store(Self::output_path(argv), script.reassembled_size);
            }
            "wasm-opt" => {
                let path = Self::output_path(argv);
                let current = self.files.lock().unwrap().get(&path).map(Vec::len).unwrap_or(0);
                let next = script.optimizer_sizes.pop_front().unwrap_or(current);
                self.resize(&path, next);
            }
            other => panic!("unexpected tool {other}"),
        }
        Ok(result)
    }
}

impl ToolchainClient for ScriptedToolchain {
    async fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        tokio::task::yield_now().await;
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::MissingFile(path.to_path_buf()))
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let bytes = self.read_file(path).await?;
        Ok(FileStat {
            size: bytes.len() as u64,
        })
    }

    async fn remove_dir(&self, path: &Path) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .retain(|stored, _| !stored.starts_with(path));
        Ok(())
    }

    async fn run_process(&self, argv: &[String]) -> Result<BuildStepResult> {
        tokio::task::yield_now().await;
        self.calls.lock().unwrap().push(argv.to_vec());

        self.events.process_start(argv);
        let result = self.execute(argv);
        self.events.process_end();
        result
    }
}

/// A pipeline wired to a dispatcher, tracker and captured log.
pub struct Harness {
    pub pipeline: BuildPipeline<ScriptedToolchain>,
    pub tracker: SharedTracker,
    pub log: CapturedLog,
    pub work: TempDir,
    dispatcher: JoinHandle<CapturedLog>,
}

impl Harness {
    pub fn new(script: Script) -> Self {
        let (tx, rx) = channel();
        let tracker = ProcessTracker::shared();
        let log = CapturedLog::new();
        let dispatcher = EventDispatcher::new(rx, tracker.clone(), log.clone()).spawn();

        let work = TempDir::new().expect("Failed to create work root");
        let client = ScriptedToolchain::new(script, tx.clone());
        let pipeline = BuildPipeline::new(client, ToolchainConfig::default(), work.path(), tx);

        Self {
            pipeline,
            tracker,
            log,
            work,
            dispatcher,
        }
    }

    /// Keep attempt directories around after each run.
    pub fn keep_scratch(mut self) -> Self {
        self.pipeline = self.pipeline.keep_scratch(true);
        self
    }

    /// Drop the pipeline, wait for every event to be dispatched and return
    /// the tool calls that were made.
    pub async fn finish(self) -> Finished {
        let calls = self.pipeline.client().calls();
        drop(self.pipeline);
        self.dispatcher.await.expect("dispatcher panicked");

        Finished {
            calls,
            tracker: self.tracker,
            log: self.log,
            work: self.work,
        }
    }
}

pub struct Finished {
    pub calls: Vec<Vec<String>>,
    pub tracker: SharedTracker,
    pub log: CapturedLog,
    pub work: TempDir,
}

impl Finished {
    pub fn count(&self, tool: &str) -> usize {
        self.calls.iter().filter(|argv| argv[0] == tool).count()
    }
}
