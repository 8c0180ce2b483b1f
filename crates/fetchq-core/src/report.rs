//! Batch summary and history ledger rendering.
//!
//! Output is deterministic: the same outcomes in the same order always
//! produce the same bytes, so scripts can diff two runs.

use std::fmt::Write as _;
use std::path::PathBuf;

use crate::history::{HistoryRecord, HistoryStore};
use crate::jobspec::JobKind;
use crate::status::{JobState, JobStatus};
use crate::transfer::TransferPolicy;

/// How one batch line ended up, joined from the job list and the status
/// board after the run. Lines that never parsed carry no kind or dest.
#[derive(Debug, Clone)]
pub struct LineOutcome {
    pub line_no: usize,
    pub display_name: String,
    pub kind: Option<JobKind>,
    pub dest: Option<PathBuf>,
    pub status: JobStatus,
}

/// Human-readable size with one decimal above the byte range.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    for unit in ["KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} TB")
}

fn on_off(v: bool) -> &'static str {
    if v {
        "on"
    } else {
        "off"
    }
}

fn size_text(status: &JobStatus) -> String {
    match status.final_size {
        Some(bytes) => format_size(bytes),
        None => "size unknown".to_string(),
    }
}

/// Renders the end-of-batch summary: counts, the effective policy, then one
/// line per batch entry in input order.
pub fn render_report(lines: &[LineOutcome], policy: &TransferPolicy) -> String {
    let mut completed = 0usize;
    let mut present = 0usize;
    let mut interrupted = 0usize;
    let mut failed = 0usize;
    let mut pending = 0usize;
    for line in lines {
        match line.status.state {
            JobState::Completed => completed += 1,
            JobState::AlreadyPresent => present += 1,
            JobState::Failed => failed += 1,
            JobState::Pending => pending += 1,
            // A batch that stopped early can leave slots mid-flight; they
            // count with the interrupted ones.
            JobState::Starting | JobState::Running | JobState::Interrupted => interrupted += 1,
        }
    }

    let mut out = String::from("fetch summary\n=============\n");
    let _ = writeln!(
        out,
        "total: {} | completed: {} | present: {} | interrupted: {} | failed: {} | not attempted: {}",
        lines.len(),
        completed,
        present,
        interrupted,
        failed,
        pending
    );
    let rate = match policy.rate_limit_mbps {
        Some(r) => format!("{r:.1} MB/s"),
        None => "unlimited".to_string(),
    };
    let _ = writeln!(
        out,
        "concurrency: {} | rate: {} | resume: {} | validate: {} | force: {}",
        policy.max_concurrent,
        rate,
        on_off(policy.resume),
        on_off(policy.validate),
        on_off(policy.force)
    );
    out.push('\n');

    for line in lines {
        match line.status.state {
            JobState::Completed => {
                let _ = writeln!(
                    out,
                    "  ✓ {} - completed ({})",
                    line.display_name,
                    size_text(&line.status)
                );
            }
            JobState::AlreadyPresent => {
                let _ = writeln!(
                    out,
                    "  ✓ {} - already present ({})",
                    line.display_name,
                    size_text(&line.status)
                );
            }
            JobState::Failed => {
                let _ = writeln!(
                    out,
                    "  ✗ {} - failed: {}",
                    line.display_name,
                    line.status.error.as_deref().unwrap_or("unknown error")
                );
            }
            JobState::Pending => match &line.dest {
                Some(dest) => {
                    let _ = writeln!(
                        out,
                        "  · {} - ready ({})",
                        line.display_name,
                        dest.display()
                    );
                }
                None => {
                    let _ = writeln!(out, "  · {} - ready", line.display_name);
                }
            },
            JobState::Starting | JobState::Running | JobState::Interrupted => {
                let _ = writeln!(out, "  ⏸ {} - interrupted", line.display_name);
            }
        }
    }
    out
}

/// Renders the full history ledger, newest first; ties break on destination
/// so the order is total.
pub fn render_ledger(store: &HistoryStore) -> String {
    let mut out = String::from("fetch history\n=============\n");
    if store.is_empty() {
        out.push_str("(empty)\n");
        return out;
    }
    let mut rows: Vec<&HistoryRecord> = store.iter().collect();
    rows.sort_by(|a, b| {
        b.completed_at
            .cmp(&a.completed_at)
            .then_with(|| a.dest.cmp(&b.dest))
    });
    let mut total_bytes = 0u64;
    for rec in &rows {
        total_bytes += rec.size_bytes;
        let _ = writeln!(
            out,
            "{}  {:>10}  {}  <- {}",
            rec.completed_at.format("%Y-%m-%d %H:%M:%S UTC"),
            format_size(rec.size_bytes),
            rec.dest,
            rec.locator
        );
    }
    let _ = writeln!(
        out,
        "\ntotal: {} item(s), {}",
        rows.len(),
        format_size(total_bytes)
    );
    out
}
