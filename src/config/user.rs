//! User configuration loading for workbridge.
//!
//! This module handles loading user-wide configuration from the XDG config directory.
//! User config location: $XDG_CONFIG_HOME/workbridge/workbridge.toml
//! Fallback: the platform config directory (~/.config on Linux)

use std::path::PathBuf;

use super::settings::{ConfigResult, SettingsFile};

/// Returns the path to the user configuration file.
///
/// The path is determined by:
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/workbridge/workbridge.toml
/// 2. Otherwise: `dirs::config_dir()`/workbridge/workbridge.toml
///
/// Returns None if no config directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(xdg_config) if !xdg_config.is_empty() => PathBuf::from(xdg_config),
        _ => dirs::config_dir()?,
    };
    Some(base.join("workbridge").join("workbridge.toml"))
}

/// Load the user config, if there is one.
pub fn load_user_config() -> ConfigResult<Option<SettingsFile>> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }

    log::debug!(
        target: "workbridge::config",
        "Loading user config from {}",
        path.display()
    );
    SettingsFile::load(&path).map(Some)
}
