//! `fetchq history` – print the fetch ledger.

use std::path::PathBuf;

use anyhow::Result;
use fetchq_core::config::{self, FetchConfig};
use fetchq_core::history::HistoryStore;
use fetchq_core::report::render_ledger;

pub fn run_history(cfg: &FetchConfig, history: Option<PathBuf>) -> Result<()> {
    let path = match history.or_else(|| cfg.history_file.clone()) {
        Some(p) => p,
        None => config::default_history_path()?,
    };
    let store = HistoryStore::load(path);
    print!("{}", render_ledger(&store));
    Ok(())
}
