//! CLI for the fetchq fetch-queue manager.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fetchq_core::config;
use std::path::PathBuf;

use commands::{run_batch, run_check, run_history, RunOptions};

/// Top-level CLI for the fetchq fetch queue.
#[derive(Debug, Parser)]
#[command(name = "fetchq")]
#[command(about = "fetchq: concurrent model and repository fetch queue", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch a batch of jobs from a job file.
    Run {
        /// Path to the job file, one locator per line; "-" reads stdin.
        jobfile: String,

        /// Run up to N transfers concurrently (defaults to the config value).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,

        /// Cap each transfer at this many MB/s.
        #[arg(long, value_name = "MBPS")]
        rate: Option<f64>,

        /// Ignore partial files and start every transfer from scratch.
        #[arg(long)]
        no_resume: bool,

        /// Probe remote sizes and verify transferred files.
        #[arg(long)]
        validate: bool,

        /// Fetch even when the destination already exists.
        #[arg(long)]
        force: bool,

        /// Suppress completion notifications.
        #[arg(long)]
        no_notify: bool,

        /// Parse and list the batch without transferring anything.
        #[arg(long)]
        dry_run: bool,

        /// Workspace root holding models/ and addons/ (defaults to config, then cwd).
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// History ledger file (defaults to the XDG state path).
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,

        /// Shallow-clone repositories at this depth.
        #[arg(long, value_name = "N")]
        depth: Option<u32>,

        /// Clone submodules too.
        #[arg(long)]
        submodules: bool,
    },

    /// Print the fetch history ledger.
    History {
        /// History ledger file (defaults to the XDG state path).
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,
    },

    /// Parse job lines and show where they would land, without fetching.
    Check {
        /// Job lines, exactly as they would appear in a job file.
        #[arg(required = true)]
        line: Vec<String>,

        /// Workspace root used to resolve destinations.
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;

        match cli.command {
            CliCommand::Run {
                jobfile,
                jobs,
                rate,
                no_resume,
                validate,
                force,
                no_notify,
                dry_run,
                root,
                history,
                depth,
                submodules,
            } => {
                run_batch(
                    cfg,
                    RunOptions {
                        jobfile,
                        jobs,
                        rate,
                        no_resume,
                        validate,
                        force,
                        no_notify,
                        dry_run,
                        root,
                        history,
                        depth,
                        submodules,
                    },
                )
                .await?;
            }
            CliCommand::History { history } => run_history(&cfg, history)?,
            CliCommand::Check { line, root } => run_check(&cfg, &line, root)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
