//! Job line parsing and destination resolution.
//!
//! One non-empty input line describes one fetch job:
//!
//! ```text
//! [ref:<name>] <locator> [<destination-hint> [<rename>]]
//! ```
//!
//! The locator decides the job kind (file transfer vs repository clone); the
//! hint places the artifact inside the workspace layout, with the `models/`
//! and `addons/` prefixes selecting a root explicitly. Parsing is pure: the
//! same line always yields the same job, and a bad line never aborts the
//! batch.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Hint prefix that pins a destination under the models root.
pub const MODELS_PREFIX: &str = "models/";
/// Hint prefix that pins a destination under the addons root.
pub const ADDONS_PREFIX: &str = "addons/";

/// Host whose repositories hold model weights and route under the models root.
const HUB_HOST: &str = "huggingface.co";

/// What the transfer worker will do for this job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    File,
    Repo,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::File => "file",
            JobKind::Repo => "repo",
        }
    }
}

/// Immutable description of one fetch job, produced only by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub kind: JobKind,
    pub locator: Url,
    /// Absolute destination: file path for files, clone directory for repos.
    pub dest: PathBuf,
    /// Branch or tag to check out (repos only).
    pub reference: Option<String>,
    /// Short name used in reports and progress lines.
    pub display_name: String,
    /// Position within the batch; admission order and status-board slot.
    pub index: usize,
    /// 1-based input line number.
    pub line_no: usize,
}

/// Workspace roots that destination hints resolve against.
#[derive(Debug, Clone)]
pub struct Layout {
    pub models_root: PathBuf,
    pub addons_root: PathBuf,
}

impl Layout {
    /// Standard layout under one workspace root: `<root>/models`, `<root>/addons`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            models_root: root.join("models"),
            addons_root: root.join("addons"),
        }
    }
}

/// Per-line parse failure. Contained to the line; siblings still run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty line")]
    EmptyLine,
    #[error("no locator after the ref token")]
    MissingLocator,
    #[error("locator is not a valid http(s)/file URL: {0}")]
    InvalidLocator(String),
    #[error("cannot derive a destination name from the locator; add a rename token")]
    AmbiguousFilename,
}

/// One input line of a batch, parsed or not.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub line_no: usize,
    pub raw: String,
    pub parsed: Result<JobSpec, ParseError>,
}

/// Parse a whole batch. Blank lines and `#` comments are skipped; every other
/// line produces exactly one entry, in input order.
pub fn parse_batch(input: &str, layout: &Layout) -> Vec<BatchEntry> {
    let mut entries = Vec::new();
    for (i, raw_line) in input.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let index = entries.len();
        let parsed = parse_line(line, layout, index, i + 1);
        entries.push(BatchEntry {
            line_no: i + 1,
            raw: line.to_string(),
            parsed,
        });
    }
    entries
}

/// Parse a single job line into a `JobSpec` positioned at `index`/`line_no`.
pub fn parse_line(
    line: &str,
    layout: &Layout,
    index: usize,
    line_no: usize,
) -> Result<JobSpec, ParseError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(ParseError::EmptyLine);
    }

    let mut rest = &tokens[..];
    let mut reference = None;
    if let Some(name) = tokens[0].strip_prefix("ref:") {
        if name.is_empty() {
            return Err(ParseError::InvalidLocator(tokens[0].to_string()));
        }
        reference = Some(name.to_string());
        rest = &tokens[1..];
    }

    let Some(&loc_tok) = rest.first() else {
        return Err(ParseError::MissingLocator);
    };
    let locator =
        Url::parse(loc_tok).map_err(|_| ParseError::InvalidLocator(loc_tok.to_string()))?;
    if !matches!(locator.scheme(), "http" | "https" | "file") {
        return Err(ParseError::InvalidLocator(loc_tok.to_string()));
    }

    let kind = classify(&locator, reference.is_some());
    let (dest, display_name) = resolve_destination(
        kind,
        &locator,
        rest.get(1).copied(),
        rest.get(2).copied(),
        layout,
    )?;

    Ok(JobSpec {
        kind,
        locator,
        dest,
        reference,
        display_name,
        index,
        line_no,
    })
}

/// Job-kind inference from the locator alone (plus an explicit ref token).
fn classify(locator: &Url, has_reference: bool) -> JobKind {
    if has_reference {
        return JobKind::Repo;
    }
    let path = locator.path();
    if path.ends_with(".git") {
        return JobKind::Repo;
    }
    let host = locator.host_str().unwrap_or("");
    let host = host.strip_prefix("www.").unwrap_or(host);
    match host {
        "github.com" | "gitlab.com" | "codeberg.org" => {
            // Release assets are plain file downloads even on code hosts.
            if path.contains("/releases/download/") {
                JobKind::File
            } else {
                JobKind::Repo
            }
        }
        HUB_HOST => {
            if path.contains("/resolve/") {
                JobKind::File
            } else {
                JobKind::Repo
            }
        }
        _ => JobKind::File,
    }
}

fn resolve_destination(
    kind: JobKind,
    locator: &Url,
    hint: Option<&str>,
    rename: Option<&str>,
    layout: &Layout,
) -> Result<(PathBuf, String), ParseError> {
    match kind {
        JobKind::File => {
            let name = match rename {
                Some(r) => checked_name(r)?,
                None => checked_name(&locator_basename(locator).ok_or(ParseError::AmbiguousFilename)?)?,
            };
            let (root, rel) = match hint {
                Some(h) => split_hint(h, layout, &layout.models_root),
                None => (layout.models_root.clone(), PathBuf::new()),
            };
            Ok((root.join(rel).join(&name), name))
        }
        JobKind::Repo => {
            let auto_root = repo_auto_root(locator, layout);
            let (root, rel) = match hint {
                Some(h) => split_hint(h, layout, &auto_root),
                None => (auto_root, PathBuf::new()),
            };
            if rel.as_os_str().is_empty() {
                let raw = locator_basename(locator).ok_or(ParseError::AmbiguousFilename)?;
                let name = checked_name(raw.strip_suffix(".git").unwrap_or(&raw))?;
                Ok((root.join(&name), name))
            } else {
                let dest = root.join(&rel);
                let name = dest
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or(ParseError::AmbiguousFilename)?;
                Ok((dest, name))
            }
        }
    }
}

/// Default root for a repository when the hint does not pin one.
fn repo_auto_root(locator: &Url, layout: &Layout) -> PathBuf {
    let host = locator.host_str().unwrap_or("");
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host == HUB_HOST {
        layout.models_root.clone()
    } else {
        layout.addons_root.clone()
    }
}

/// Split a destination hint into (root, subpath), honoring the root prefixes.
fn split_hint(hint: &str, layout: &Layout, default_root: &Path) -> (PathBuf, PathBuf) {
    if let Some(rest) = hint.strip_prefix(MODELS_PREFIX) {
        (layout.models_root.clone(), safe_subpath(rest))
    } else if hint == "models" {
        (layout.models_root.clone(), PathBuf::new())
    } else if let Some(rest) = hint.strip_prefix(ADDONS_PREFIX) {
        (layout.addons_root.clone(), safe_subpath(rest))
    } else if hint == "addons" {
        (layout.addons_root.clone(), PathBuf::new())
    } else {
        (default_root.to_path_buf(), safe_subpath(hint))
    }
}

/// Keep only normal path components; drops `..`, `.` and any absolute prefix
/// so hints cannot escape the workspace roots.
fn safe_subpath(raw: &str) -> PathBuf {
    Path::new(raw)
        .components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p),
            _ => None,
        })
        .collect()
}

/// Last non-empty path segment of the locator (query excluded).
fn locator_basename(locator: &Url) -> Option<String> {
    locator
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.to_string())
}

/// Sanitize a leaf name for the local filesystem and reject unusable results.
fn checked_name(raw: &str) -> Result<String, ParseError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != '/' && *c != '\0' && !c.is_control())
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return Err(ParseError::AmbiguousFilename);
    }
    Ok(trimmed.to_string())
}
