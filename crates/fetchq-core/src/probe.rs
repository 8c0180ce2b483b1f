//! Remote metadata probe: HEAD request for size and resume-relevant headers.
//!
//! Used before a validated transfer to learn the expected byte count, and for
//! the already-present size comparison. Probe failures are soft; a transfer
//! can proceed with an unknown total.

use anyhow::{Context, Result};
use std::str;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Parsed response metadata from a HEAD request.
#[derive(Debug, Clone, Default)]
pub struct RemoteInfo {
    /// Total size in bytes, if the server sent `Content-Length`.
    pub content_length: Option<u64>,
    /// True if the server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Performs a HEAD request and returns parsed metadata.
///
/// Follows redirects; `auth_header` is a full header line such as
/// `Authorization: Bearer <token>`. Blocking; call from `spawn_blocking`
/// when used from async code.
pub fn probe(url: &str, auth_header: Option<&str>) -> Result<RemoteInfo> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.nobody(true)?; // HEAD request
    easy.follow_location(true)?;
    easy.connect_timeout(PROBE_TIMEOUT)?;
    easy.timeout(PROBE_TIMEOUT)?;

    if let Some(line) = auth_header {
        let mut list = curl::easy::List::new();
        list.append(line)?;
        easy.http_headers(list)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                headers.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.perform().context("HEAD request failed")?;
    }

    let code = easy.response_code().context("no response code")?;
    if !(200..300).contains(&code) {
        anyhow::bail!("HEAD {} returned HTTP {}", url, code);
    }

    Ok(parse_headers(&headers))
}

/// Folds raw header lines into `RemoteInfo`. Each status line starts a new
/// response block (redirect chains), so the final block wins.
fn parse_headers(lines: &[String]) -> RemoteInfo {
    let mut info = RemoteInfo::default();
    for line in lines {
        if line.starts_with("HTTP/") {
            info = RemoteInfo::default();
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => info.content_length = value.parse().ok(),
            "accept-ranges" => info.accept_ranges = value.eq_ignore_ascii_case("bytes"),
            "etag" => info.etag = Some(value.to_string()),
            "last-modified" => info.last_modified = Some(value.to_string()),
            _ => {}
        }
    }
    info
}
