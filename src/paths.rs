//! Path resolution for bsa
//!
//! # Environment Variables
//!
//! - `BSA_CONFIG_DIR` - Override config directory
//! - `BSA_STATE_DIR` - Override state directory (service list, task ledger)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `BSA_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/bsa` (if set)
//! 3. `~/.config/bsa`
//!
//! For state_dir():
//! 1. `BSA_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/bsa` (if set)
//! 3. `~/.local/state/bsa`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "BSA_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "BSA_STATE_DIR";

const APP_DIR: &str = "bsa";

/// Get the bsa config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP_DIR);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP_DIR);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the bsa state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP_DIR);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP_DIR);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// `config.toml` in the config directory
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// `state.toml` in the state directory
pub fn state_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("state.toml"))
}

/// `tasks.toml` in the state directory
pub fn tasks_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("tasks.toml"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
