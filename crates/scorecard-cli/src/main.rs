//! scorecard CLI - build tiny wasm scorecards from C.

mod build;
mod colors;
mod doctor;
mod watch;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use scorecard_core::paths::default_work_root;
use scorecard_core::publish::decode_viewer_url;
use scorecard_core::{AttemptDirs, PublishMode, ToolchainConfig};

#[derive(Parser)]
#[command(name = "scorecard")]
#[command(about = "Compile C into minimal wasm scorecard modules")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a source file once
    Build {
        /// Path to the C source file
        source: PathBuf,

        #[command(flatten)]
        options: BuildOptions,
    },

    /// Rebuild a source file whenever it changes
    Watch {
        /// Path to the C source file
        source: PathBuf,

        #[command(flatten)]
        options: BuildOptions,
    },

    /// Create a new source file from the template
    New {
        /// Name of the source file (without .c extension)
        name: String,
    },

    /// Check that the toolchain is installed
    Doctor {
        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Remove scratch directories kept for a source file
    Clean {
        /// Path to the C source file
        source: PathBuf,

        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Recover a module from a viewer URL
    Decode {
        /// Viewer URL carrying the encoded module
        url: String,

        /// Output path
        #[arg(short, long, default_value = "main.wasm")]
        output: PathBuf,
    },
}

/// Options shared by `build` and `watch`.
#[derive(Args, Debug, Clone)]
pub struct BuildOptions {
    /// How to publish the finished module
    #[arg(long, value_enum, default_value_t = PublishArg::Blob)]
    pub publish: PublishArg,

    /// Where to save the module when publishing as a blob
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Compiler flags, replacing the configured ones
    #[arg(long, allow_hyphen_values = true)]
    pub flags: Option<String>,

    /// Viewer base URL for `--publish url`
    #[arg(long)]
    pub viewer_url: Option<String>,

    /// JSON config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Keep each attempt's scratch directory
    #[arg(long)]
    pub keep_scratch: bool,

    /// Show the running-process panel whenever it changes
    #[arg(long)]
    pub status: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishArg {
    /// Save the module as a file
    Blob,
    /// Print a self-contained viewer URL
    Url,
}

impl From<PublishArg> for PublishMode {
    fn from(arg: PublishArg) -> Self {
        match arg {
            PublishArg::Blob => PublishMode::Blob,
            PublishArg::Url => PublishMode::Url,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format scorecard-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<scorecard_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    let code = match cli.command {
        Commands::Build { source, options } => {
            build::execute(&source, &options).await.map_err(format_error)?
        }

        Commands::Watch { source, options } => {
            watch::execute(&source, &options).await.map_err(format_error)?;
            ExitCode::SUCCESS
        }

        Commands::New { name } => {
            create_new_source(&name).map_err(format_error)?;
            ExitCode::SUCCESS
        }

        Commands::Doctor { config } => doctor::execute(config.as_deref()).await.map_err(format_error)?,

        Commands::Clean { source, config } => {
            clean_scratch(&source, config.as_deref()).map_err(format_error)?;
            ExitCode::SUCCESS
        }

        Commands::Decode { url, output } => {
            decode_url(&url, &output).map_err(format_error)?;
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}

/// Source every new scorecard starts from.
const SOURCE_TEMPLATE: &str = "float process() { return 0; }\n";

fn create_new_source(name: &str) -> anyhow::Result<()> {
    use std::fs;

    let filename = if name.ends_with(".c") {
        name.to_string()
    } else {
        format!("{}.c", name)
    };
    let path = PathBuf::from(&filename);

    if path.exists() {
        anyhow::bail!("File {} already exists", path.display());
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    fs::write(&path, SOURCE_TEMPLATE)?;

    println!(
        "{}Created{} {}",
        colors::GREEN,
        colors::RESET,
        path.display()
    );
    println!();
    println!("Build it with:");
    println!("  scorecard build {}", path.display());

    Ok(())
}

fn clean_scratch(source: &Path, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = ToolchainConfig::load(config_path)?;
    let work_root = config
        .work_root
        .unwrap_or_else(|| default_work_root(source));

    AttemptDirs::clean_all(&work_root)?;
    println!(
        "{}Cleaned{} {}",
        colors::GREEN,
        colors::RESET,
        work_root.display()
    );
    Ok(())
}

fn decode_url(url: &str, output: &Path) -> anyhow::Result<()> {
    let bytes = decode_viewer_url(url)?;
    std::fs::write(output, &bytes)?;
    println!("Wrote {} bytes to {}", bytes.len(), output.display());
    Ok(())
}
