//! Run queued jobs concurrently under a fixed in-flight limit.
//!
//! Keeps up to `max_concurrent` workers running at once; when one finishes,
//! the next queued job is started until the queue is empty. Jobs start in
//! submission order. Once the cancel token fires, nothing new starts and
//! in-flight workers get a short grace period to wind down.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::control::CancelToken;
use crate::history::HistoryRecord;
use crate::jobspec::JobSpec;
use crate::notify::Notifier;
use crate::status::{JobState, StatusBoard};
use crate::transfer::{run_worker, AuthTokens, TransferPolicy};

/// How long the scheduler keeps collecting in-flight workers after
/// cancellation before abandoning them.
const JOIN_GRACE: Duration = Duration::from_secs(2);

/// Runs `jobs` with up to `policy.max_concurrent` in flight at once.
/// Workers are blocking and run on the blocking pool; each reports through
/// the shared `StatusBoard` slot for its index. Returns the history records
/// of the transfers that completed.
///
/// A panicking worker is contained: its slot is marked failed and the rest
/// of the batch keeps going.
pub async fn run_batch(
    jobs: Vec<JobSpec>,
    board: &StatusBoard,
    policy: &TransferPolicy,
    auth: &AuthTokens,
    cancel: &CancelToken,
    notifier: Arc<dyn Notifier>,
) -> Vec<HistoryRecord> {
    let max_concurrent = policy.max_concurrent.max(1);
    let mut queue = jobs.into_iter();
    let mut join_set = JoinSet::new();
    let mut records = Vec::new();

    loop {
        while join_set.len() < max_concurrent && !cancel.is_cancelled() {
            let Some(job) = queue.next() else {
                break;
            };
            let board = board.clone();
            let policy = policy.clone();
            let auth = auth.clone();
            let cancel = cancel.clone();
            let notifier = Arc::clone(&notifier);
            join_set.spawn(async move {
                let index = job.index;
                let name = job.display_name.clone();
                let worker_board = board.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    run_worker(&job, &worker_board, &policy, &auth, &cancel, notifier.as_ref())
                })
                .await;
                match joined {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::error!("worker for {} panicked: {}", name, e);
                        board.update(index, |st| {
                            st.state = JobState::Failed;
                            st.error = Some(format!("worker panicked: {e}"));
                            st.rate_mbps = 0.0;
                        });
                        None
                    }
                }
            });
        }

        if join_set.is_empty() {
            break;
        }

        let joined = if cancel.is_cancelled() {
            match tokio::time::timeout(JOIN_GRACE, join_set.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    // Stragglers did not honor the token in time; leave them
                    // to the blocking pool and stop collecting.
                    join_set.abort_all();
                    break;
                }
            }
        } else {
            join_set.join_next().await
        };

        match joined {
            Some(Ok(Some(record))) => records.push(record),
            Some(Ok(None)) => {}
            Some(Err(e)) => tracing::error!("scheduler task join: {}", e),
            None => break,
        }
    }

    records
}
