//! `fetchq check` – parse job lines and show where they would land.

use std::path::PathBuf;

use anyhow::Result;
use fetchq_core::config::FetchConfig;
use fetchq_core::jobspec::{parse_line, Layout};

pub fn run_check(cfg: &FetchConfig, lines: &[String], root: Option<PathBuf>) -> Result<()> {
    let root = match root.or_else(|| cfg.workspace_root.clone()) {
        Some(r) => r,
        None => std::env::current_dir()?,
    };
    let layout = Layout::under(&root);

    for (i, line) in lines.iter().enumerate() {
        match parse_line(line, &layout, i, i + 1) {
            Ok(job) => {
                let reference = job.reference.as_deref().unwrap_or("-");
                println!(
                    "{:<6} {:<12} {}  ->  {}",
                    job.kind.as_str(),
                    reference,
                    job.locator,
                    job.dest.display()
                );
            }
            Err(e) => println!("error  {line}: {e}"),
        }
    }
    Ok(())
}
