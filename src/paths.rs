//! Centralised cmdstamp user-directory resolution.
//!
//! When `CMDSTAMP_HOME` is set, it replaces **all** platform-native user
//! directories (config, data, state).
//!
//! Priority for the log file:
//!   1. `CMDSTAMP_LOG_FILE` env var
//!   2. `[history] file` in `config.toml` (handled by [`crate::config`])
//!   3. `{data_dir}/history.log`

use std::path::PathBuf;

/// Return the `CMDSTAMP_HOME` path when set and non-empty, otherwise fall
/// through to the platform-native `dirs_fallback`.
fn resolve_user_path(dirs_fallback: Option<PathBuf>) -> Option<PathBuf> {
    if let Ok(home) = std::env::var("CMDSTAMP_HOME")
        && !home.is_empty()
    {
        return Some(PathBuf::from(home));
    }
    dirs_fallback
}

/// Returns the cmdstamp config directory (holds `config.toml`).
pub fn user_dir() -> Option<PathBuf> {
    resolve_user_path(dirs::config_dir().map(|d| d.join("cmdstamp")))
}

/// Returns the base directory for the history log.
pub fn user_data_dir() -> Option<PathBuf> {
    resolve_user_path(dirs::data_local_dir().map(|d| d.join("cmdstamp")))
}

/// Directory holding one state file per live shell session.
///
/// Under `CMDSTAMP_HOME` this is `{home}/sessions`; otherwise the platform
/// state dir, falling back to the data dir on platforms without one.
pub fn sessions_dir() -> Option<PathBuf> {
    let fallback = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|d| d.join("cmdstamp"));
    resolve_user_path(fallback).map(|d| d.join("sessions"))
}

/// Path of `config.toml`, if a config directory can be determined.
pub fn config_file() -> Option<PathBuf> {
    user_dir().map(|d| d.join("config.toml"))
}

/// Default log file location, honouring `CMDSTAMP_LOG_FILE`.
pub fn default_log_file() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CMDSTAMP_LOG_FILE")
        && !p.is_empty()
    {
        return Some(PathBuf::from(p));
    }
    user_data_dir().map(|d| d.join("history.log"))
}
