//! Doctor command: check the configured toolchain.

use std::path::Path;
use std::process::ExitCode;

use scorecard_core::{NativeToolchain, ToolchainConfig};

use crate::colors;

/// Execute the doctor command.
pub async fn execute(config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = ToolchainConfig::load(config_path)?;
    let statuses = NativeToolchain::inspect(&config).await;

    println!("{}Toolchain{}", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));

    let mut missing = 0;
    for status in &statuses {
        match &status.resolved {
            Some(path) => {
                let version = status.version.as_deref().unwrap_or("unknown version");
                println!(
                    "{}ok{}       {:<13} {} {}({}){}",
                    colors::GREEN,
                    colors::RESET,
                    status.role.label(),
                    path.display(),
                    colors::DIM,
                    version,
                    colors::RESET
                );
            }
            None => {
                missing += 1;
                println!(
                    "{}missing{}  {:<13} {} not found",
                    colors::RED,
                    colors::RESET,
                    status.role.label(),
                    status.program
                );
            }
        }
    }

    println!();
    if missing == 0 {
        println!("{}All tools found{}", colors::GREEN, colors::RESET);
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "{}{} of {} tools missing{}",
            colors::YELLOW,
            missing,
            statuses.len(),
            colors::RESET
        );
        Ok(ExitCode::FAILURE)
    }
}
