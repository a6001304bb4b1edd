//! `netq config` – show where the config lives and what it says.

use anyhow::Result;
use netq_core::config::{self, NetqConfig};

pub fn run_config(cfg: &NetqConfig) -> Result<()> {
    println!("# {}", config::config_path()?.display());
    print!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}
