use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Browser-like user agent sent when the config does not set one.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Global configuration loaded from `~/.config/netq/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetqConfig {
    /// Maximum number of concurrently running workers.
    pub workers: usize,
    /// Total time allowed for one transfer, in seconds.
    pub request_timeout_secs: u64,
    /// Time allowed to establish a connection, in seconds.
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    /// Whether `Dispatcher::download` submits jobs right away.
    pub auto_start: bool,
    /// Optional proxy URL (None = direct connections, environment ignored).
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for NetqConfig {
    fn default() -> Self {
        Self {
            workers: 6,
            request_timeout_secs: 10,
            connect_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            auto_start: true,
            proxy: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("netq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<NetqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = NetqConfig::default();
        write_default(&path, &default_cfg)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from(&path)
}

/// Load configuration from an explicit file.
pub fn load_from(path: &Path) -> Result<NetqConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let cfg: NetqConfig =
        toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(cfg)
}

fn write_default(path: &Path, cfg: &NetqConfig) -> Result<()> {
    let toml = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, toml)?;
    Ok(())
}
