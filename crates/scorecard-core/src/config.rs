//! Toolchain configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! `SCORECARD_*` environment overrides. The CLI applies its own flags last.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default compiler flags: size-optimized, no runtime errno or longjmp
/// support, a single exported `_process` entry and no `main`.
pub const DEFAULT_COMPILE_FLAGS: &str =
    "-Oz -Wall --no-entry -sSUPPORT_ERRNO=0 -sSUPPORT_LONGJMP=0 -sEXPORTED_FUNCTIONS=_process";

/// Default viewer that accepts an encoded module in its `c` query parameter.
pub const DEFAULT_VIEWER_URL: &str = "https://scorecard.party/";

/// Configuration for the external toolchain and publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// C compiler driver producing wasm.
    pub compiler: String,

    /// wasm binary to text disassembler.
    pub disassembler: String,

    /// wasm text to binary assembler.
    pub assembler: String,

    /// wasm size optimizer.
    pub optimizer: String,

    /// Free-text compiler flags, split on whitespace.
    pub compile_flags: String,

    /// Base URL for the compact-URL publisher.
    pub viewer_url: String,

    /// Root for per-attempt scratch directories. `None` means next to the source.
    pub work_root: Option<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: "emcc".to_string(),
            disassembler: "wasm-dis".to_string(),
            assembler: "wasm-as".to_string(),
            optimizer: "wasm-opt".to_string(),
            compile_flags: DEFAULT_COMPILE_FLAGS.to_string(),
            viewer_url: DEFAULT_VIEWER_URL.to_string(),
            work_root: None,
        }
    }
}

impl ToolchainConfig {
    /// Load configuration from a JSON file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration the CLI starts from.
    ///
    /// Uses `explicit` if given, otherwise the user config file if it
    /// exists, otherwise the defaults. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::user_config_path() {
                Some(path) if path.exists() => {
                    tracing::debug!("loading config from {}", path.display());
                    Self::from_file(&path)?
                }
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// `<config_dir>/scorecard/config.json`, if the platform has a config dir.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("scorecard").join("config.json"))
    }

    /// Apply `SCORECARD_*` overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let overrides: [(&str, &mut String); 5] = [
            ("SCORECARD_EMCC", &mut self.compiler),
            ("SCORECARD_WASM_DIS", &mut self.disassembler),
            ("SCORECARD_WASM_AS", &mut self.assembler),
            ("SCORECARD_WASM_OPT", &mut self.optimizer),
            ("SCORECARD_VIEWER_URL", &mut self.viewer_url),
        ];
        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                tracing::debug!("{key} overrides configured value");
                *slot = value;
            }
        }
    }

    /// Compiler flags as an opaque argument list.
    pub fn compile_args(&self) -> Vec<String> {
        self.compile_flags
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Reject configurations that cannot produce a build.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("compiler", &self.compiler),
            ("disassembler", &self.disassembler),
            ("assembler", &self.assembler),
            ("optimizer", &self.optimizer),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("{name} must not be empty")));
            }
        }
        if self.viewer_url.contains('?') {
            return Err(Error::InvalidConfig(
                "viewer_url must not carry a query string".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_compile_args() {
        let args = ToolchainConfig::default().compile_args();
        assert_eq!(args[0], "-Oz");
        assert!(args.contains(&"--no-entry".to_string()));
        assert!(args.contains(&"-sEXPORTED_FUNCTIONS=_process".to_string()));
        assert_eq!(args.len(), 6);
    }

    #[test]
    fn test_flags_split_on_any_whitespace() {
        let config = ToolchainConfig {
            compile_flags: "  -O2\t-fexceptions \n --proxy-to-worker ".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.compile_args(),
            vec!["-O2", "-fexceptions", "--proxy-to-worker"]
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{ "optimizer": "/opt/binaryen/bin/wasm-opt" }"#).unwrap();

        let config = ToolchainConfig::from_file(&path).unwrap();
        assert_eq!(config.optimizer, "/opt/binaryen/bin/wasm-opt");
        assert_eq!(config.compiler, "emcc");
        assert_eq!(config.compile_flags, DEFAULT_COMPILE_FLAGS);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = ToolchainConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SCORECARD_EMCC", "/emsdk/upstream/emscripten/emcc"),
            ("SCORECARD_WASM_OPT", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = ToolchainConfig::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.compiler, "/emsdk/upstream/emscripten/emcc");
        // Blank values are ignored
        assert_eq!(config.optimizer, "wasm-opt");
    }

    #[test]
    fn test_validate() {
        let config = ToolchainConfig {
            assembler: String::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = ToolchainConfig {
            viewer_url: "https://example.com/?x=1".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        assert!(ToolchainConfig::default().validate().is_ok());
    }
}
