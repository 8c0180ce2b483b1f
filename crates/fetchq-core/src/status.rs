//! Per-job status shared between workers, the progress ticker, and the report.
//!
//! One slot per input line, indexed by the job's batch position. Each slot has
//! exactly one writer (the worker that owns the job, or the engine for jobs it
//! settles without a worker); everyone else takes snapshots.

use std::sync::{Arc, Mutex};

/// Lifecycle of one job within a single engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Starting,
    Running,
    Completed,
    AlreadyPresent,
    Interrupted,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Starting => "starting",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::AlreadyPresent => "already present",
            JobState::Interrupted => "interrupted",
            JobState::Failed => "failed",
        }
    }

    /// True once the job can no longer change state in this invocation.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::AlreadyPresent | JobState::Interrupted | JobState::Failed
        )
    }
}

/// Snapshot of one job's progress.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub state: JobState,
    /// 0.0..=100.0; non-decreasing while the job runs.
    pub progress_percent: f64,
    /// Current transfer rate in MB/s (0.0 when unknown).
    pub rate_mbps: f64,
    /// Failure detail; set only in the Failed state.
    pub error: Option<String>,
    /// Bytes on disk for Completed / AlreadyPresent.
    pub final_size: Option<u64>,
}

impl JobStatus {
    pub fn pending() -> Self {
        Self {
            state: JobState::Pending,
            progress_percent: 0.0,
            rate_mbps: 0.0,
            error: None,
            final_size: None,
        }
    }
}

/// Aggregate view of a batch, for the progress ticker.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub total: usize,
    pub settled: usize,
    pub running: usize,
    /// Mean of per-job percentages, terminal jobs counted as 100.
    pub overall_percent: f64,
    /// Sum of the per-job rates in MB/s.
    pub rate_mbps: f64,
}

/// Fixed-size board of job slots for one invocation.
#[derive(Clone)]
pub struct StatusBoard {
    slots: Arc<Vec<Mutex<JobStatus>>>,
}

impl StatusBoard {
    pub fn new(len: usize) -> Self {
        let slots = (0..len).map(|_| Mutex::new(JobStatus::pending())).collect();
        Self { slots: Arc::new(slots) }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Mutate one slot. Callers must be that slot's single writer.
    pub fn update(&self, index: usize, f: impl FnOnce(&mut JobStatus)) {
        if let Some(slot) = self.slots.get(index) {
            f(&mut slot.lock().unwrap());
        }
    }

    pub fn snapshot(&self, index: usize) -> Option<JobStatus> {
        self.slots.get(index).map(|s| s.lock().unwrap().clone())
    }

    pub fn snapshot_all(&self) -> Vec<JobStatus> {
        self.slots.iter().map(|s| s.lock().unwrap().clone()).collect()
    }

    pub fn aggregate(&self) -> BatchProgress {
        let statuses = self.snapshot_all();
        let total = statuses.len();
        let mut settled = 0usize;
        let mut running = 0usize;
        let mut percent_sum = 0.0f64;
        let mut rate = 0.0f64;
        for st in &statuses {
            if st.state.is_terminal() {
                settled += 1;
                percent_sum += 100.0;
            } else {
                percent_sum += st.progress_percent;
            }
            if st.state == JobState::Running {
                running += 1;
                rate += st.rate_mbps;
            }
        }
        let overall_percent = if total == 0 { 100.0 } else { percent_sum / total as f64 };
        BatchProgress {
            total,
            settled,
            running,
            overall_percent,
            rate_mbps: rate,
        }
    }
}
