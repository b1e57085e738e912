//! Where the agent keeps its files.
//!
//! ```text
//! <config_dir>/voice-agent/settings.toml
//! <data_dir>/voice-agent/sessions.jsonl
//! ```
//!
//! `config_dir` and `data_dir` come from `dirs` (`~/.config` and
//! `~/.local/share` on Linux, `Application Support` on macOS, `%APPDATA%` and
//! `%LOCALAPPDATA%` on Windows).  The working directory stands in when the
//! platform has none.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "voice-agent";

/// Resolved settings and session-log locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
    pub data_dir: PathBuf,
    /// Default append-only session log.
    pub sessions_file: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let here = || PathBuf::from(".");
        Self::from_dirs(
            &dirs::config_dir().unwrap_or_else(here),
            &dirs::data_local_dir().unwrap_or_else(here),
        )
    }

    /// Lay the agent's files out under explicit base directories.
    pub fn from_dirs(config_base: &Path, data_base: &Path) -> Self {
        let config_dir = config_base.join(APP_DIR);
        let data_dir = data_base.join(APP_DIR);
        Self {
            settings_file: config_dir.join("settings.toml"),
            sessions_file: data_dir.join("sessions.jsonl"),
            config_dir,
            data_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
