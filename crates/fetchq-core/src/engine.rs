//! Batch orchestration: parse, dedupe against history, schedule, settle.
//!
//! `FetchEngine` owns the policy and workspace layout for a run. One call to
//! [`FetchEngine::run`] takes a batch straight from text to a rendered
//! summary, with live progress available over an optional channel.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::control::CancelToken;
use crate::history::{HistoryRecord, HistoryStore};
use crate::jobspec::{parse_batch, JobKind, JobSpec, Layout};
use crate::notify::{LogNotifier, Notifier};
use crate::report::{render_ledger, render_report, LineOutcome};
use crate::scheduler;
use crate::status::{BatchProgress, JobState, StatusBoard};
use crate::transfer::repo::git_available;
use crate::transfer::{AuthTokens, TransferPolicy};

/// Cadence for aggregate progress sends while the batch runs.
const PROGRESS_TICK: Duration = Duration::from_millis(500);

/// Everything one batch run produced.
pub struct BatchOutcome {
    /// Per input line, in input order.
    pub lines: Vec<LineOutcome>,
    /// Rendered batch summary.
    pub report: String,
    /// Rendered history ledger, including this run's completions.
    pub ledger: String,
}

/// A configured fetch queue. Construct once, run batches through it.
pub struct FetchEngine {
    layout: Layout,
    policy: TransferPolicy,
    auth: AuthTokens,
    history_path: PathBuf,
    notifier: Arc<dyn Notifier>,
}

impl FetchEngine {
    pub fn new(
        layout: Layout,
        policy: TransferPolicy,
        auth: AuthTokens,
        history_path: PathBuf,
    ) -> Self {
        Self {
            layout,
            policy,
            auth,
            history_path,
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Replaces the default log-only notification sink.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Runs one batch to completion (or cancellation) and renders the
    /// summary. Jobs already satisfied by history and the workspace are
    /// settled without a transfer; when the policy disables auto start the
    /// batch is only parsed and listed.
    ///
    /// Progress aggregates are sent on `progress` every half second while
    /// workers run.
    pub async fn run(
        &self,
        batch: &str,
        cancel: &CancelToken,
        progress: Option<mpsc::Sender<BatchProgress>>,
    ) -> Result<BatchOutcome> {
        let entries = parse_batch(batch, &self.layout);
        let board = StatusBoard::new(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            if let Err(e) = &entry.parsed {
                board.update(index, |st| {
                    st.state = JobState::Failed;
                    st.error = Some(format!("parse error: {e}"));
                });
            }
        }

        for dir in [&self.layout.models_root, &self.layout.addons_root] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let mut history = HistoryStore::load(&self.history_path);

        let mut runnable: Vec<JobSpec> = Vec::new();
        for entry in &entries {
            let Ok(job) = &entry.parsed else { continue };
            if !self.policy.force {
                if let Some(rec) = history.lookup(&job.dest) {
                    if artifact_matches(job, rec, self.policy.validate) {
                        board.update(job.index, |st| {
                            st.state = JobState::AlreadyPresent;
                            st.progress_percent = 100.0;
                            st.final_size = Some(rec.size_bytes);
                        });
                        continue;
                    }
                }
            }
            runnable.push(job.clone());
        }

        if runnable.iter().any(|j| j.kind == JobKind::Repo) && !git_available() {
            for job in &runnable {
                board.update(job.index, |st| {
                    st.state = JobState::Failed;
                    st.error = Some("git not found on PATH; batch aborted".to_string());
                });
            }
            runnable.clear();
        }

        if self.policy.auto_start && !runnable.is_empty() {
            let ticker = progress.map(|tx| {
                let board = board.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(PROGRESS_TICK);
                    loop {
                        interval.tick().await;
                        if tx.send(board.aggregate()).await.is_err() {
                            break;
                        }
                    }
                })
            });

            let records = scheduler::run_batch(
                runnable,
                &board,
                &self.policy,
                &self.auth,
                cancel,
                Arc::clone(&self.notifier),
            )
            .await;

            if let Some(ticker) = ticker {
                ticker.abort();
                let _ = ticker.await;
            }

            for rec in records {
                history.record(rec);
            }
            if let Err(e) = history.save() {
                tracing::warn!("could not save history: {:#}", e);
            }
        }

        let statuses = board.snapshot_all();
        let lines: Vec<LineOutcome> = entries
            .iter()
            .zip(statuses)
            .map(|(entry, status)| match &entry.parsed {
                Ok(job) => LineOutcome {
                    line_no: entry.line_no,
                    display_name: job.display_name.clone(),
                    kind: Some(job.kind),
                    dest: Some(job.dest.clone()),
                    status,
                },
                Err(_) => LineOutcome {
                    line_no: entry.line_no,
                    display_name: entry.raw.clone(),
                    kind: None,
                    dest: None,
                    status,
                },
            })
            .collect();

        let report = render_report(&lines, &self.policy);
        let ledger = render_ledger(&history);

        if self.policy.notify && self.policy.auto_start {
            let completed = count(&lines, JobState::Completed);
            // Workers notify individual failures; the batch announcement
            // only goes out when something was actually fetched.
            if completed > 0 {
                let failed = count(&lines, JobState::Failed);
                self.notifier
                    .notify(&format!("batch finished: {completed} fetched, {failed} failed"));
            }
        }

        Ok(BatchOutcome {
            lines,
            report,
            ledger,
        })
    }
}

fn count(lines: &[LineOutcome], state: JobState) -> usize {
    lines.iter().filter(|l| l.status.state == state).count()
}

/// Whether the artifact a history record points at is still on disk (and,
/// when validating, still the recorded size).
fn artifact_matches(job: &JobSpec, rec: &HistoryRecord, validate: bool) -> bool {
    match job.kind {
        JobKind::File => match fs::metadata(&job.dest) {
            Ok(meta) if meta.is_file() => !validate || meta.len() == rec.size_bytes,
            _ => false,
        },
        JobKind::Repo => job.dest.join(".git").is_dir(),
    }
}
