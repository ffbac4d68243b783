//! CLI for the PDM post download manager.

mod commands;
mod control_socket;
mod manifest;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pdm_core::config;
use std::path::PathBuf;

use commands::{run_config, run_control, run_manifest, RunOverrides};
use control_socket::{ControlRequest, Target};

/// Top-level CLI for the PDM post download manager.
#[derive(Debug, Parser)]
#[command(name = "pdm")]
#[command(about = "PDM: concurrent image downloader for multi-image posts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download every post listed in a TOML manifest.
    Run {
        /// Manifest with one `[[posts]]` table per post.
        manifest: PathBuf,
        /// Download root (overrides `download_dir` from the config).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Maximum concurrent downloads per host.
        #[arg(long, value_name = "N")]
        per_host: Option<usize>,
        /// Maximum concurrent downloads overall (0 = pool size).
        #[arg(long, value_name = "N")]
        total: Option<usize>,
    },

    /// Stop a post (or `all`) in the running `pdm run`.
    Stop {
        /// Post id or `all`.
        target: Target,
    },

    /// Restart a post (or `all`) in the running `pdm run`.
    Restart {
        /// Post id or `all`.
        target: Target,
    },

    /// Show how many downloads the running `pdm run` has in flight.
    Running,

    /// Print the config file path and the effective settings.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Run {
                manifest,
                dir,
                per_host,
                total,
            } => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                let overrides = RunOverrides {
                    dir,
                    per_host,
                    total,
                };
                run_manifest(cfg, &manifest, overrides).await?;
            }
            CliCommand::Stop { target } => run_control(ControlRequest::Stop(target)).await?,
            CliCommand::Restart { target } => run_control(ControlRequest::Restart(target)).await?,
            CliCommand::Running => run_control(ControlRequest::Running).await?,
            CliCommand::Config => run_config()?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
