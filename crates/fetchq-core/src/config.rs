use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::transfer::TransferPolicy;

/// Global configuration loaded from `~/.config/fetchq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Workspace root holding `models/` and `addons/`. None = current directory.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Maximum number of jobs transferring at once.
    pub max_concurrent: usize,
    /// Throughput ceiling in MB/s shared policy for each transfer (None = unlimited).
    #[serde(default)]
    pub max_rate_mbps: Option<f64>,
    /// Continue partial file transfers from their `.part` remainder.
    pub resume: bool,
    /// Probe remote size and verify transferred byte counts against it.
    pub validate: bool,
    /// Emit completion notifications through the host notifier.
    pub notify: bool,
    /// Start transfers immediately; false = resolve and report only.
    pub auto_start: bool,
    /// Token for the model hub (sent as a bearer header / clone credential).
    #[serde(default)]
    pub hub_token: Option<String>,
    /// Token for code hosts (substituted into clone URLs).
    #[serde(default)]
    pub git_token: Option<String>,
    /// History document path. None = `~/.local/state/fetchq/history.json`.
    #[serde(default)]
    pub history_file: Option<PathBuf>,
    /// Shallow-clone depth for repository jobs (None = full clone).
    #[serde(default)]
    pub clone_depth: Option<u32>,
    /// Clone submodules recursively.
    #[serde(default)]
    pub clone_submodules: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            max_concurrent: 3,
            max_rate_mbps: None,
            resume: true,
            validate: false,
            notify: true,
            auto_start: true,
            hub_token: None,
            git_token: None,
            history_file: None,
            clone_depth: None,
            clone_submodules: false,
        }
    }
}

impl FetchConfig {
    /// Transfer policy with the values this config carries; per-invocation
    /// flags (force, CLI overrides) are applied by the caller on top.
    pub fn to_policy(&self) -> TransferPolicy {
        TransferPolicy {
            max_concurrent: self.max_concurrent.max(1),
            rate_limit_mbps: self.max_rate_mbps.filter(|r| *r > 0.0),
            resume: self.resume,
            validate: self.validate,
            force: false,
            notify: self.notify,
            auto_start: self.auto_start,
            clone_depth: self.clone_depth,
            clone_submodules: self.clone_submodules,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Default location of the history document under the XDG state dir.
pub fn default_history_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchq")?;
    Ok(xdg_dirs.get_state_home().join("history.json"))
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FetchConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: FetchConfig = toml::from_str(&data)?;
    Ok(cfg)
}
