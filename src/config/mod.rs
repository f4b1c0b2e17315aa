//! User configuration
//!
//! Optional TOML config at `~/.config/remoteexec/config.toml`, merged over
//! built-in defaults. Every field has a default, so an absent file and an
//! empty file behave identically.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration load failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// remoteexec configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default ssh destination of the remote host
    pub remote: Option<String>,

    /// Directory on the remote host that project trees are synced into
    pub destination_dir: String,

    /// Directory for scheduler log files (on the submitting host)
    pub log_dir: String,

    /// Directory where rendered batch scripts are written, relative to the
    /// working directory at submission time
    pub script_dir: String,

    /// Seconds to wait after a first interrupt before leaving a followed
    /// job running in the background
    pub grace_seconds: u64,

    /// rsync exclude patterns applied when syncing the project tree
    pub rsync_excludes: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: None,
            destination_dir: "~/_remoteexec_srcs/".to_string(),
            log_dir: "~/slurm_logs".to_string(),
            script_dir: ".slurmexec".to_string(),
            grace_seconds: 3,
            rsync_excludes: vec![".git/".to_string()],
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default config file location (`~/.config/remoteexec/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config/remoteexec/config.toml"))
    }

    /// Load the default config file if present, built-in defaults otherwise.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// Expand a leading `~/` using the HOME environment variable.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
