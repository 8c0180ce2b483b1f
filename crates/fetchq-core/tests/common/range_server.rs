//! Minimal HTTP/1.1 server with Range GET support for integration tests.
//!
//! Serves a fixed set of paths, records every request, and can trickle the
//! body out in delayed chunks so tests get a window to observe concurrency
//! and cancellation.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Pause between body chunks; zero writes the body in one go.
    pub chunk_delay: Duration,
    /// Body bytes per chunk when trickling.
    pub chunk_size: usize,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            chunk_delay: Duration::ZERO,
            chunk_size: 4096,
        }
    }
}

/// One observed request.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub method: String,
    pub path: String,
    pub range_start: Option<u64>,
}

/// Handle to a running server. The listener thread runs until the process
/// exits.
pub struct ServerHandle {
    base_url: String,
    log: Arc<Mutex<Vec<RequestRecord>>>,
    peak: Arc<AtomicUsize>,
}

impl ServerHandle {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.log.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    /// Highest number of connections that were open at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Starts a server in a background thread serving `paths`. The server runs
/// until the process exits.
pub fn serve(paths: Vec<(&str, Vec<u8>)>) -> ServerHandle {
    serve_with_options(paths, RangeServerOptions::default())
}

/// Like `serve` but with customized behavior (ranges off, trickled bodies).
pub fn serve_with_options(paths: Vec<(&str, Vec<u8>)>, opts: RangeServerOptions) -> ServerHandle {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let bodies: Arc<HashMap<String, Vec<u8>>> = Arc::new(
        paths
            .into_iter()
            .map(|(p, b)| (format!("/{}", p.trim_start_matches('/')), b))
            .collect(),
    );
    let log: Arc<Mutex<Vec<RequestRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    {
        let log = Arc::clone(&log);
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let bodies = Arc::clone(&bodies);
                let log = Arc::clone(&log);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    handle(stream, &bodies, &log, opts);
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
    }
    ServerHandle {
        base_url: format!("http://127.0.0.1:{}/", port),
        log,
        peak,
    }
}

fn handle(
    mut stream: TcpStream,
    bodies: &HashMap<String, Vec<u8>>,
    log: &Mutex<Vec<RequestRecord>>,
    opts: RangeServerOptions,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, path, range) = parse_request(request);
    log.lock().unwrap().push(RequestRecord {
        method: method.to_string(),
        path: path.to_string(),
        range_start: range.map(|(start, _)| start),
    });

    let Some(body) = bodies.get(path) else {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nnot found");
        return;
    };
    let total = body.len() as u64;

    if method.eq_ignore_ascii_case("HEAD") {
        let response =
            format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nAccept-Ranges: bytes\r\n\r\n");
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n");
        return;
    }

    let (status, content_range, slice) = match range.filter(|_| opts.support_ranges) {
        Some((start, end_incl)) => {
            let start = start.min(total);
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start > end_incl {
                (
                    "416 Range Not Satisfiable",
                    format!("bytes */{total}"),
                    &body[0..0],
                )
            } else {
                let lo = start as usize;
                let hi = (end_incl + 1).min(total) as usize;
                (
                    "206 Partial Content",
                    format!("bytes {}-{}/{}", lo, hi - 1, total),
                    &body[lo..hi],
                )
            }
        }
        None => (
            "200 OK",
            format!("bytes 0-{}/{}", total.saturating_sub(1), total),
            &body[..],
        ),
    };

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Range: {content_range}\r\nAccept-Ranges: bytes\r\n\r\n",
        slice.len()
    );
    if stream.write_all(response.as_bytes()).is_err() {
        return;
    }
    if opts.chunk_delay.is_zero() {
        let _ = stream.write_all(slice);
        return;
    }
    let mut chunks = slice.chunks(opts.chunk_size.max(1)).peekable();
    while let Some(chunk) = chunks.next() {
        if stream.write_all(chunk).is_err() {
            return;
        }
        // Sleep only between chunks: a trailing sleep after the final chunk
        // would keep the handler (and the active-connection count) alive past
        // the end of the response and overcount peak concurrency.
        if chunks.peek().is_some() {
            thread::sleep(opts.chunk_delay);
        }
    }
}

/// Returns (method, path, optional (start, end_inclusive) for Range: bytes=X-Y).
fn parse_request(request: &str) -> (&str, &str, Option<(u64, u64)>) {
    let mut method = "";
    let mut path = "/";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            let mut parts = line.split_whitespace();
            method = parts.next().unwrap_or("");
            path = parts.next().unwrap_or("/");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if value.to_lowercase().starts_with("bytes=") {
                    let part = value[6..].trim();
                    if let Some((a, b)) = part.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim();
                        let end_incl = if end.is_empty() {
                            u64::MAX
                        } else {
                            end.parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, path, range)
}
