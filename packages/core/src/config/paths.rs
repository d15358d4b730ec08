//! XDG-compliant path resolution for machina
//!
//! Provides consistent path resolution across platforms:
//! - Linux/macOS: ~/.config/machina/ and ~/.local/share/machina/
//! - Windows: %APPDATA%\machina\ and %LOCALAPPDATA%\machina\

use std::path::PathBuf;

use super::Config;
use crate::environment::{Environment, non_empty_var};

/// Overrides the machine store root, ahead of the config file
pub const STORAGE_PATH_VAR: &str = "MACHINA_STORAGE_PATH";

/// Get the configuration directory path
///
/// - Linux: `~/.config/machina/`
/// - macOS: `~/.config/machina/` (XDG-style, not ~/Library)
/// - Windows: `%APPDATA%\machina\`
pub fn get_config_dir() -> Option<PathBuf> {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".config").join("machina"))
    }
    #[cfg(target_os = "windows")]
    {
        directories::BaseDirs::new()
            .and_then(|dirs| dirs.config_dir().map(|d| d.to_path_buf()))
            .map(|d| d.join("machina"))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// Get the data directory path, the default machine store root
///
/// - Linux: `~/.local/share/machina/`
/// - macOS: `~/.local/share/machina/` (XDG-style, not ~/Library)
/// - Windows: `%LOCALAPPDATA%\machina\`
pub fn get_data_dir() -> Option<PathBuf> {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local").join("share").join("machina"))
    }
    #[cfg(target_os = "windows")]
    {
        directories::BaseDirs::new()
            .and_then(|dirs| dirs.data_local_dir().map(|d| d.to_path_buf()))
            .map(|d| d.join("machina"))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// Get the full path to the config file
///
/// Returns: `{config_dir}/config.json`
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join("config.json"))
}

/// Machine store root: `MACHINA_STORAGE_PATH`, then `storage_path` from the
/// config, then the data directory
pub fn get_storage_path(env: &dyn Environment, config: &Config) -> Option<PathBuf> {
    non_empty_var(env, STORAGE_PATH_VAR)
        .map(PathBuf::from)
        .or_else(|| config.storage_path.clone())
        .or_else(get_data_dir)
}
