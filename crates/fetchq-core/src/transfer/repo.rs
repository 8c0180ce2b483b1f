//! Repository transfers via the system `git` binary.
//!
//! Clones run with `--progress` on a piped stderr; a reader thread turns
//! "Receiving objects" lines into percent updates while the main loop polls
//! for exit and cancellation. Cancellation asks the child to stop, waits a
//! grace period, then kills it.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::jobspec::JobSpec;

use super::{AuthTokens, FetchCtx, Fetcher, TransferError, TransferOutcome};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long a cancelled clone gets to exit on its own before a hard kill.
const KILL_GRACE: Duration = Duration::from_secs(3);
/// Non-progress stderr lines kept for the error message.
const STDERR_TAIL: usize = 20;

/// Whether `git` can be spawned at all; checked once per batch before any
/// repository job starts.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepoState {
    Missing,
    EmptyDir,
    GitRepo,
    NonEmptyDir,
}

fn repo_state(path: &Path) -> RepoState {
    let Ok(meta) = fs::metadata(path) else {
        return RepoState::Missing;
    };
    if !meta.is_dir() {
        return RepoState::NonEmptyDir;
    }
    if path.join(".git").is_dir() {
        return RepoState::GitRepo;
    }
    match fs::read_dir(path) {
        Ok(mut entries) => {
            if entries.next().is_none() {
                RepoState::EmptyDir
            } else {
                RepoState::NonEmptyDir
            }
        }
        Err(_) => RepoState::NonEmptyDir,
    }
}

/// Recursive on-disk size; symlinks are counted as their own length, not
/// followed.
pub(crate) fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    let mut total = 0;
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            total += dir_size(&entry.path());
        } else {
            total += meta.len();
        }
    }
    total
}

/// Percent out of a `Receiving objects:  45% (450/1000), ...` stderr line.
fn parse_git_progress(line: &str) -> Option<u64> {
    let rest = line.strip_prefix("Receiving objects:")?;
    rest.trim_start().split('%').next()?.trim().parse().ok()
}

/// Git subprocess backend for repository jobs.
pub(crate) struct RepoFetcher {
    url: String,
    dest: PathBuf,
    reference: Option<String>,
}

impl RepoFetcher {
    pub(crate) fn new(job: &JobSpec, auth: &AuthTokens) -> Self {
        Self {
            url: auth.clone_url(&job.locator),
            dest: job.dest.clone(),
            reference: job.reference.clone(),
        }
    }
}

impl Fetcher for RepoFetcher {
    fn already_present(&mut self, _cx: &FetchCtx<'_>) -> Result<Option<u64>, TransferError> {
        match repo_state(&self.dest) {
            RepoState::GitRepo => Ok(Some(dir_size(&self.dest))),
            RepoState::NonEmptyDir => Err(TransferError::Conflict(format!(
                "{} exists and is not a git repository",
                self.dest.display()
            ))),
            RepoState::Missing | RepoState::EmptyDir => Ok(None),
        }
    }

    fn transfer(&mut self, cx: &FetchCtx<'_>) -> Result<TransferOutcome, TransferError> {
        let mut state = repo_state(&self.dest);
        if state == RepoState::NonEmptyDir {
            // Only force reaches this state; the preflight rejects it
            // otherwise. Clear the destination and clone fresh.
            if self.dest.is_dir() {
                fs::remove_dir_all(&self.dest)?;
            } else {
                fs::remove_file(&self.dest)?;
            }
            state = RepoState::Missing;
        }
        match state {
            RepoState::GitRepo => {
                // Forced refresh of an existing clone.
                let mut cmd = Command::new("git");
                cmd.arg("-C").arg(&self.dest).arg("pull").arg("--progress");
                if let Some(reference) = &self.reference {
                    cmd.arg("origin").arg(reference);
                }
                run_git(cmd, cx, None)?;
            }
            state => {
                if let Some(parent) = self.dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let created = state == RepoState::Missing;
                let mut cmd = Command::new("git");
                cmd.arg("clone").arg("--progress");
                if let Some(depth) = cx.policy.clone_depth {
                    cmd.arg("--depth").arg(depth.to_string());
                }
                if cx.policy.clone_submodules {
                    cmd.arg("--recurse-submodules");
                }
                if let Some(reference) = &self.reference {
                    cmd.arg("-b").arg(reference);
                }
                cmd.arg(&self.url).arg(&self.dest);
                // Only remove the directory on failure if the clone created it.
                run_git(cmd, cx, created.then_some(self.dest.as_path()))?;
            }
        }
        Ok(TransferOutcome {
            bytes: dir_size(&self.dest),
            sha256: None,
        })
    }
}

/// Runs a git command to completion, feeding progress to the status board.
/// `cleanup_on_fail` is removed when the command is cancelled or exits
/// non-zero.
fn run_git(
    mut cmd: Command,
    cx: &FetchCtx<'_>,
    cleanup_on_fail: Option<&Path>,
) -> Result<(), TransferError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| TransferError::Git(format!("failed to spawn git: {e}")))?;

    let percent = Arc::new(AtomicU64::new(0));
    let tail: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let reader = child.stderr.take().map(|stderr| {
        let percent = Arc::clone(&percent);
        let tail = Arc::clone(&tail);
        thread::spawn(move || drain_stderr(stderr, &percent, &tail))
    });

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TransferError::Io(e));
            }
        }
        if cx.cancel.is_cancelled() {
            stop_child(&mut child);
            if let Some(reader) = reader {
                let _ = reader.join();
            }
            if let Some(dir) = cleanup_on_fail {
                let _ = fs::remove_dir_all(dir);
            }
            return Err(TransferError::Interrupted);
        }
        let pct = percent.load(Ordering::Relaxed) as f64;
        cx.board.update(cx.index, |st| {
            st.progress_percent = st.progress_percent.max(pct.min(100.0));
        });
        thread::sleep(POLL_INTERVAL);
    };

    if let Some(reader) = reader {
        let _ = reader.join();
    }

    if !status.success() {
        if let Some(dir) = cleanup_on_fail {
            let _ = fs::remove_dir_all(dir);
        }
        let lines = tail.lock().unwrap();
        let detail = if lines.is_empty() {
            match status.code() {
                Some(code) => format!("git exited with status {code}"),
                None => "git terminated by signal".to_string(),
            }
        } else {
            lines.join("; ")
        };
        return Err(TransferError::Git(detail));
    }
    Ok(())
}

/// Splits git's stderr on both `\r` and `\n`: progress updates rewrite one
/// line in place, everything else is a real message worth keeping.
fn drain_stderr(mut stderr: impl Read, percent: &AtomicU64, tail: &Mutex<Vec<String>>) {
    let mut buf = [0u8; 4096];
    let mut pending = String::new();
    loop {
        let n = match stderr.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        pending.push_str(&String::from_utf8_lossy(&buf[..n]));
        while let Some(pos) = pending.find(['\r', '\n']) {
            let line: String = pending.drain(..=pos).collect();
            consume_line(line.trim_end_matches(['\r', '\n']), percent, tail);
        }
    }
    let rest = std::mem::take(&mut pending);
    consume_line(&rest, percent, tail);
}

fn consume_line(line: &str, percent: &AtomicU64, tail: &Mutex<Vec<String>>) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    if let Some(pct) = parse_git_progress(line) {
        percent.store(pct, Ordering::Relaxed);
        return;
    }
    let mut lines = tail.lock().unwrap();
    lines.push(line.to_string());
    let excess = lines.len().saturating_sub(STDERR_TAIL);
    if excess > 0 {
        lines.drain(..excess);
    }
}

#[cfg(unix)]
fn stop_child(child: &mut Child) {
    use std::time::Instant;

    unsafe {
        libc::kill(child.id() as i32, libc::SIGTERM);
    }
    let grace = Instant::now();
    while grace.elapsed() < KILL_GRACE {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn stop_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn progress_lines() {
        assert_eq!(
            parse_git_progress("Receiving objects:  45% (450/1000), 1.2 MiB | 500 KiB/s"),
            Some(45)
        );
        assert_eq!(
            parse_git_progress("Receiving objects: 100% (10/10), done."),
            Some(100)
        );
        assert_eq!(parse_git_progress("Resolving deltas: 100% (5/5), done."), None);
        assert_eq!(parse_git_progress("Cloning into 'repo'..."), None);
    }

    #[test]
    fn repo_states() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(repo_state(&missing), RepoState::Missing);

        let empty = dir.path().join("empty");
        fs::create_dir(&empty).unwrap();
        assert_eq!(repo_state(&empty), RepoState::EmptyDir);

        let cloned = dir.path().join("cloned");
        fs::create_dir_all(cloned.join(".git")).unwrap();
        assert_eq!(repo_state(&cloned), RepoState::GitRepo);

        let occupied = dir.path().join("occupied");
        fs::create_dir(&occupied).unwrap();
        File::create(occupied.join("keep.txt")).unwrap();
        assert_eq!(repo_state(&occupied), RepoState::NonEmptyDir);

        let file = dir.path().join("plain.txt");
        File::create(&file).unwrap();
        assert_eq!(repo_state(&file), RepoState::NonEmptyDir);
    }

    #[test]
    fn dir_size_sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = File::create(dir.path().join("a.bin")).unwrap();
        a.write_all(&[0u8; 100]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let mut b = File::create(dir.path().join("sub/b.bin")).unwrap();
        b.write_all(&[0u8; 50]).unwrap();
        assert_eq!(dir_size(dir.path()), 150);
    }

    #[test]
    fn stderr_splitting_keeps_messages_and_percent() {
        let percent = AtomicU64::new(0);
        let tail = Mutex::new(Vec::new());
        let data = b"Cloning into 'repo'...\nReceiving objects:  10% (1/10)\rReceiving objects:  80% (8/10)\rfatal: the remote end hung up\n";
        drain_stderr(&data[..], &percent, &tail);
        assert_eq!(percent.load(Ordering::Relaxed), 80);
        let lines = tail.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                "Cloning into 'repo'...".to_string(),
                "fatal: the remote end hung up".to_string()
            ]
        );
    }
}
