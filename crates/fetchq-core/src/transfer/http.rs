//! Streaming HTTP file transfer: GET into a `.part` file, Range resume,
//! cancellation at chunk boundaries, rate gating, atomic finalize.
//!
//! The body streams through a write callback; returning zero from the
//! callback aborts the transfer, which is how cancellation and storage
//! errors stop curl mid-flight.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::jobspec::JobSpec;
use crate::probe::{self, RemoteInfo};

use super::rate::{sleep_interruptible, RateGate};
use super::{AuthTokens, FetchCtx, Fetcher, TransferError, TransferOutcome};

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Minimum gap between status-board progress updates from the write callback.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Path for the in-flight file: appends `.part` to the final path.
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

#[cfg(unix)]
fn write_chunk_at(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(not(unix))]
fn write_chunk_at(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    let mut f = file.try_clone()?;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(data)
}

/// HTTP transport for file jobs.
pub(crate) struct FileFetcher {
    url: String,
    dest: PathBuf,
    auth_header: Option<String>,
    probed: Option<RemoteInfo>,
    probe_done: bool,
}

impl FileFetcher {
    pub(crate) fn new(job: &JobSpec, auth: &AuthTokens) -> Self {
        Self {
            url: job.locator.to_string(),
            dest: job.dest.clone(),
            auth_header: auth.bearer_for(&job.locator),
            probed: None,
            probe_done: false,
        }
    }

    /// Remote size, probed at most once and only on the validation path.
    /// A failed probe leaves the size unknown; transfers still proceed.
    fn remote_total(&mut self, cx: &FetchCtx<'_>) -> Option<u64> {
        if !cx.policy.validate {
            return None;
        }
        if !self.probe_done {
            self.probe_done = true;
            match probe::probe(&self.url, self.auth_header.as_deref()) {
                Ok(info) => self.probed = Some(info),
                Err(e) => {
                    tracing::warn!("probe of {} failed, size unknown: {:#}", self.url, e)
                }
            }
        }
        self.probed.as_ref().and_then(|r| r.content_length)
    }
}

impl Fetcher for FileFetcher {
    fn already_present(&mut self, cx: &FetchCtx<'_>) -> Result<Option<u64>, TransferError> {
        let Ok(meta) = fs::metadata(&self.dest) else {
            return Ok(None);
        };
        if !meta.is_file() {
            return Err(TransferError::Conflict(format!(
                "{} exists and is not a file",
                self.dest.display()
            )));
        }
        if cx.policy.validate {
            match self.remote_total(cx) {
                Some(total) if total == meta.len() => Ok(Some(meta.len())),
                Some(_) => Ok(None),
                None => Ok(Some(meta.len())),
            }
        } else {
            Ok(Some(meta.len()))
        }
    }

    fn transfer(&mut self, cx: &FetchCtx<'_>) -> Result<TransferOutcome, TransferError> {
        if let Some(parent) = self.dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = temp_path(&self.dest);
        let expected = self.remote_total(cx);

        let mut resume_from = 0u64;
        if cx.policy.resume {
            if let Ok(meta) = fs::metadata(&temp) {
                resume_from = meta.len();
            }
        } else if temp.exists() {
            fs::remove_file(&temp)?;
        }

        if let Some(total) = expected {
            if resume_from == total && total > 0 {
                // Nothing left to request; finalize the complete partial.
                fs::rename(&temp, &self.dest)?;
                let sha256 = hash_for_history(&self.dest, cx);
                return Ok(TransferOutcome { bytes: total, sha256 });
            }
            if resume_from > total {
                // Partial is longer than the remote object: start over.
                fs::remove_file(&temp)?;
                resume_from = 0;
            }
        }

        let file = Arc::new(OpenOptions::new().create(true).write(true).open(&temp)?);
        if resume_from == 0 {
            file.set_len(0)?;
        }

        let result = perform_get(
            &self.url,
            self.auth_header.as_deref(),
            &file,
            resume_from,
            expected,
            cx,
        );

        match result {
            Ok(written) => {
                if let Some(total) = expected {
                    if written != total {
                        let _ = fs::remove_file(&temp);
                        return Err(TransferError::SizeMismatch {
                            expected: total,
                            actual: written,
                        });
                    }
                }
                drop(file);
                fs::rename(&temp, &self.dest)?;
                let sha256 = hash_for_history(&self.dest, cx);
                Ok(TransferOutcome {
                    bytes: written,
                    sha256,
                })
            }
            Err(e) => {
                if !cx.policy.resume {
                    let _ = fs::remove_file(&temp);
                }
                Err(e)
            }
        }
    }
}

fn hash_for_history(dest: &Path, cx: &FetchCtx<'_>) -> Option<String> {
    if !cx.policy.validate {
        return None;
    }
    match sha256_hex(dest) {
        Ok(h) => Some(h),
        Err(e) => {
            tracing::warn!("hash of {} failed: {}", dest.display(), e);
            None
        }
    }
}

/// SHA-256 of the finished artifact as lowercase hex. Runs after the rename,
/// never inside the transfer loop.
fn sha256_hex(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Streams one GET into `file`, honoring resume, cancellation, the rate gate,
/// and the progress cadence. Returns the final byte count in the file.
fn perform_get(
    url: &str,
    auth_header: Option<&str>,
    file: &Arc<File>,
    resume_from: u64,
    expected: Option<u64>,
    cx: &FetchCtx<'_>,
) -> Result<u64, TransferError> {
    let offset = Arc::new(AtomicU64::new(resume_from));
    let interrupted = Arc::new(AtomicBool::new(false));
    let io_error: Arc<Mutex<Option<std::io::Error>>> = Arc::new(Mutex::new(None));
    let last_status = Arc::new(AtomicU32::new(0));
    let header_total: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));

    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(CONNECT_TIMEOUT)?;
    if resume_from > 0 {
        easy.range(&format!("{resume_from}-"))?;
    }
    if let Some(line) = auth_header {
        let mut list = curl::easy::List::new();
        list.append(line)?;
        easy.http_headers(list)?;
    }

    {
        let mut transfer = easy.transfer();
        {
            let last_status = Arc::clone(&last_status);
            let header_total = Arc::clone(&header_total);
            transfer.header_function(move |data| {
                if let Ok(line) = std::str::from_utf8(data) {
                    let line = line.trim_end();
                    if let Some(code) = parse_status(line) {
                        // New response block (redirects); the last one wins.
                        last_status.store(code, Ordering::Relaxed);
                        *header_total.lock().unwrap() = None;
                    } else if let Some(total) = parse_content_range_total(line) {
                        *header_total.lock().unwrap() = Some(total);
                    } else if let Some(len) = parse_content_length(line) {
                        let code = last_status.load(Ordering::Relaxed);
                        let mut slot = header_total.lock().unwrap();
                        if slot.is_none() && (200..300).contains(&code) {
                            *slot = Some(if code == 206 { len + resume_from } else { len });
                        }
                    }
                }
                true
            })?;
        }
        {
            let offset = Arc::clone(&offset);
            let interrupted = Arc::clone(&interrupted);
            let io_error = Arc::clone(&io_error);
            let last_status = Arc::clone(&last_status);
            let header_total = Arc::clone(&header_total);
            let file = Arc::clone(file);
            let cancel = cx.cancel.clone();
            let board = cx.board.clone();
            let index = cx.index;
            let mut gate = cx.policy.rate_limit_mbps.map(RateGate::new);
            let mut range_checked = resume_from == 0;
            let mut session_bytes = 0u64;
            let started = Instant::now();
            let mut last_report = started;
            transfer.write_function(move |data| {
                if cancel.is_cancelled() {
                    interrupted.store(true, Ordering::Relaxed);
                    return Ok(0);
                }
                // Status stays 0 for non-HTTP schemes such as file://.
                let status = last_status.load(Ordering::Relaxed);
                if status != 0 && !(200..300).contains(&status) {
                    // Error body (404 page, 416 message); swallow it and let
                    // the status check after perform() raise the failure.
                    return Ok(data.len());
                }
                if !range_checked {
                    range_checked = true;
                    if status != 0 && status != 206 {
                        // Server ignored the range request: restart from zero.
                        if let Err(e) = file.set_len(0) {
                            *io_error.lock().unwrap() = Some(e);
                            return Ok(0);
                        }
                        offset.store(0, Ordering::Relaxed);
                    }
                }
                let off = offset.fetch_add(data.len() as u64, Ordering::Relaxed);
                if let Err(e) = write_chunk_at(&file, data, off) {
                    *io_error.lock().unwrap() = Some(e);
                    return Ok(0);
                }
                session_bytes += data.len() as u64;
                if let Some(gate) = gate.as_mut() {
                    gate.on_bytes(data.len() as u64);
                    if let Some(delay) = gate.required_delay() {
                        if !sleep_interruptible(delay, &cancel) {
                            interrupted.store(true, Ordering::Relaxed);
                            return Ok(0);
                        }
                    }
                }
                if last_report.elapsed() >= PROGRESS_INTERVAL {
                    last_report = Instant::now();
                    let done = offset.load(Ordering::Relaxed);
                    let total = expected.or_else(|| *header_total.lock().unwrap());
                    let elapsed = started.elapsed().as_secs_f64();
                    let rate = if elapsed > 0.0 {
                        session_bytes as f64 / elapsed / (1024.0 * 1024.0)
                    } else {
                        0.0
                    };
                    board.update(index, |st| {
                        if let Some(total) = total.filter(|t| *t > 0) {
                            let pct = (done as f64 / total as f64 * 100.0).min(100.0);
                            st.progress_percent = st.progress_percent.max(pct);
                        }
                        st.rate_mbps = rate;
                    });
                }
                Ok(data.len())
            })?;
        }
        if let Err(e) = transfer.perform() {
            if e.is_write_error() {
                if interrupted.load(Ordering::Relaxed) {
                    return Err(TransferError::Interrupted);
                }
                if let Some(io_err) = io_error.lock().unwrap().take() {
                    return Err(TransferError::Io(io_err));
                }
            }
            return Err(TransferError::Curl(e));
        }
    }

    let code = easy.response_code()?;
    if code != 0 && !(200..300).contains(&code) {
        return Err(TransferError::Http(code));
    }

    file.sync_all()?;
    Ok(offset.load(Ordering::Relaxed))
}

fn parse_status(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("HTTP/")?;
    rest.split_whitespace().nth(1)?.parse().ok()
}

fn parse_content_length(line: &str) -> Option<u64> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse().ok()
}

/// Total from `Content-Range: bytes <start>-<end>/<total>`.
fn parse_content_range_total(line: &str) -> Option<u64> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-range") {
        return None;
    }
    value.trim().rsplit('/').next()?.parse().ok()
}
