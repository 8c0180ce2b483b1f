//! `fetchq run` – fetch a batch of jobs from a job file.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use fetchq_core::config::{self, FetchConfig};
use fetchq_core::control::CancelToken;
use fetchq_core::engine::FetchEngine;
use fetchq_core::jobspec::Layout;
use fetchq_core::status::BatchProgress;
use fetchq_core::transfer::AuthTokens;

/// Flags from the `run` subcommand, applied over the loaded config.
pub struct RunOptions {
    pub jobfile: String,
    pub jobs: Option<usize>,
    pub rate: Option<f64>,
    pub no_resume: bool,
    pub validate: bool,
    pub force: bool,
    pub no_notify: bool,
    pub dry_run: bool,
    pub root: Option<PathBuf>,
    pub history: Option<PathBuf>,
    pub depth: Option<u32>,
    pub submodules: bool,
}

pub async fn run_batch(cfg: FetchConfig, opts: RunOptions) -> Result<()> {
    let batch = read_jobfile(&opts.jobfile)?;

    let mut policy = cfg.to_policy();
    if let Some(jobs) = opts.jobs {
        policy.max_concurrent = jobs.max(1);
    }
    if let Some(rate) = opts.rate {
        policy.rate_limit_mbps = Some(rate).filter(|r| *r > 0.0);
    }
    if opts.no_resume {
        policy.resume = false;
    }
    if opts.validate {
        policy.validate = true;
    }
    if opts.force {
        policy.force = true;
    }
    if opts.no_notify {
        policy.notify = false;
    }
    if opts.dry_run {
        policy.auto_start = false;
    }
    if let Some(depth) = opts.depth {
        policy.clone_depth = Some(depth);
    }
    if opts.submodules {
        policy.clone_submodules = true;
    }

    let root = match opts.root.or_else(|| cfg.workspace_root.clone()) {
        Some(r) => r,
        None => std::env::current_dir()?,
    };
    let history_path = match opts.history.or_else(|| cfg.history_file.clone()) {
        Some(p) => p,
        None => config::default_history_path()?,
    };
    let auth = AuthTokens {
        hub_token: cfg.hub_token.clone(),
        git_token: cfg.git_token.clone(),
    };

    let engine = FetchEngine::new(Layout::under(&root), policy, auth, history_path);

    let cancel = CancelToken::default();
    let ctrlc_token = cancel.clone();
    let ctrlc = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt received, winding down...");
            ctrlc_token.cancel();
        }
    });

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<BatchProgress>(16);
    let progress_handle = tokio::spawn(async move {
        while let Some(p) = progress_rx.recv().await {
            println!(
                "\r  {}/{} settled, {} running  {:.1}%  {:.2} MB/s  ",
                p.settled, p.total, p.running, p.overall_percent, p.rate_mbps
            );
        }
        println!();
    });

    let outcome = engine.run(&batch, &cancel, Some(progress_tx)).await?;

    ctrlc.abort();
    let _ = progress_handle.await;

    print!("{}", outcome.report);
    Ok(())
}

fn read_jobfile(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading job lines from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading job file {path}"))
}
