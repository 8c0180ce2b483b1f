//! CLI command handlers, one file per command.

mod check;
mod history;
mod run;

pub use check::run_check;
pub use history::run_history;
pub use run::{run_batch, RunOptions};
