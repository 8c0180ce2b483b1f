//! Throughput ceiling for transfers.
//!
//! The gate keeps the average rate since transfer start at or below the
//! configured ceiling: after each chunk it computes how far ahead of schedule
//! the transfer is and sleeps off the difference. Sleeps happen in short
//! slices with a cancellation check between slices, so a cancel request is
//! never blocked behind a long sleep.

use std::time::{Duration, Instant};

use crate::control::CancelToken;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
/// Upper bound on one sleep slice; cancellation latency during throttling.
const SLICE: Duration = Duration::from_millis(100);

/// Delay needed so `bytes` over `elapsed` averages at most `limit_bytes_per_sec`.
fn delay_for(bytes: u64, limit_bytes_per_sec: f64, elapsed: Duration) -> Option<Duration> {
    if limit_bytes_per_sec <= 0.0 {
        return None;
    }
    let expected_secs = bytes as f64 / limit_bytes_per_sec;
    let behind = expected_secs - elapsed.as_secs_f64();
    if behind > 0.0 {
        Some(Duration::from_secs_f64(behind))
    } else {
        None
    }
}

/// Per-transfer rate state. Create when the transfer starts, feed every chunk.
pub struct RateGate {
    limit_bytes_per_sec: f64,
    started: Instant,
    bytes: u64,
}

impl RateGate {
    pub fn new(limit_mbps: f64) -> Self {
        Self {
            limit_bytes_per_sec: limit_mbps * BYTES_PER_MB,
            started: Instant::now(),
            bytes: 0,
        }
    }

    pub fn on_bytes(&mut self, n: u64) {
        self.bytes = self.bytes.saturating_add(n);
    }

    /// How long the transfer must pause right now to stay under the ceiling.
    pub fn required_delay(&self) -> Option<Duration> {
        delay_for(self.bytes, self.limit_bytes_per_sec, self.started.elapsed())
    }
}

/// Sleep `total`, waking every slice to check for cancellation.
/// Returns false if the token was set before the sleep finished.
pub fn sleep_interruptible(total: Duration, cancel: &CancelToken) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if cancel.is_cancelled() {
            return false;
        }
        let slice = remaining.min(SLICE);
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    !cancel.is_cancelled()
}
