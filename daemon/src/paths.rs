/// Canonical file paths for procwatch data files.
///
/// Both files live under the app data directory:
///   - config.toml  Written by the user or a GUI, read by the daemon.
///   - status.toml  Written by the daemon, read by the GUI.
///   - log.txt      Appended to by the daemon's tracing subscriber.
use anyhow::{bail, Result};
use std::path::PathBuf;

const APP_DIR_NAME: &str = "procwatch";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";
pub const LOG_FILE_NAME: &str = "log.txt";

/// Returns the procwatch application data directory.
///
/// Resolution order: `$PROCWATCH_HOME`, `%APPDATA%\procwatch`,
/// `$XDG_CONFIG_HOME/procwatch`, `$HOME/.config/procwatch`.
pub fn app_data_dir() -> Result<PathBuf> {
    resolve(|key| std::env::var_os(key).filter(|v| !v.is_empty()).map(PathBuf::from))
}

fn resolve(var: impl Fn(&str) -> Option<PathBuf>) -> Result<PathBuf> {
    if let Some(home) = var("PROCWATCH_HOME") {
        return Ok(home);
    }
    if let Some(appdata) = var("APPDATA") {
        return Ok(appdata.join(APP_DIR_NAME));
    }
    if let Some(xdg) = var("XDG_CONFIG_HOME") {
        return Ok(xdg.join(APP_DIR_NAME));
    }
    if let Some(home) = var("HOME") {
        return Ok(home.join(".config").join(APP_DIR_NAME));
    }
    bail!("Cannot locate an app data directory: set PROCWATCH_HOME")
}

/// Returns the full path to the config file inside `app_dir`.
pub fn config_file_path(app_dir: &std::path::Path) -> PathBuf {
    app_dir.join(CONFIG_FILE_NAME)
}

/// Returns the full path to the status file inside `app_dir`.
pub fn status_file_path(app_dir: &std::path::Path) -> PathBuf {
    app_dir.join(STATUS_FILE_NAME)
}

/// Returns the full path to the log file inside `app_dir`.
pub fn log_file_path(app_dir: &std::path::Path) -> PathBuf {
    app_dir.join(LOG_FILE_NAME)
}
