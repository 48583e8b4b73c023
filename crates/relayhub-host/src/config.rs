//! Host configuration and on-disk layout.
//!
//! `config.toml` in the data directory tunes the ambient machinery (log
//! retention, metrics interval). A missing or unparsable file falls back
//! to defaults; configuration problems never prevent startup.

use std::path::{Path, PathBuf};

use relayhub_core::prelude::*;
use serde::Deserialize;

use crate::logs::{DEFAULT_ROTATE_LIMIT, LOG_FILE_NAME};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STORAGE_FILE_NAME: &str = "storage.json";

/// Resolved file locations under the data directory
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub data_dir: PathBuf,
    pub config_file: PathBuf,
    pub log_file: PathBuf,
    pub storage_file: PathBuf,
}

impl HostPaths {
    /// Default data dir is `<local-data>/relay-hub`, overridable by
    /// `--data-dir`.
    pub fn resolve(data_dir: Option<PathBuf>) -> Self {
        let data_dir = data_dir.unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("relay-hub")
        });
        Self::in_dir(data_dir)
    }

    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            config_file: data_dir.join(CONFIG_FILE_NAME),
            log_file: data_dir.join(LOG_FILE_NAME),
            storage_file: data_dir.join(STORAGE_FILE_NAME),
            data_dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Rotated file retention (`relayhub.log` .. `.{limit-1}`)
    pub limit: usize,
    /// Tracing filter directive, overridden by `RELAYHUB_LOG`
    pub filter: Option<String>,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_ROTATE_LIMIT,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Minimum milliseconds between two metric samples
    pub min_interval_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub logs: LogsConfig,
    pub metrics: MetricsConfig,
}

impl HostConfig {
    /// Load from `config.toml`, falling back to defaults when the file is
    /// absent or unparsable.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    debug!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {:?}: {}", path, e);
                Self::default()
            }
        }
    }
}
