//! Configuration for linksync
//!
//! An optional `linksync.toml` sets defaults for the marker name and the
//! worker pools. Command-line flags and environment variables override it.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::pipeline::DEFAULT_LINK_WORKERS;
use crate::scanner::{DEFAULT_MARKER, DEFAULT_SCAN_WORKERS, ScanOptions};

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "linksync.toml";

/// Contents of a configuration file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Marker file name searched for in recursive mode
    #[serde(default)]
    pub marker: Option<String>,

    /// Directories enumerated concurrently
    #[serde(default)]
    pub scan_workers: Option<usize>,

    /// Instructions executed concurrently
    #[serde(default)]
    pub link_workers: Option<usize>,

    /// Show scan progress
    #[serde(default)]
    pub progress: bool,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Find a configuration file by searching up from `start_dir`
    pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
        let mut current = start_dir.to_path_buf();

        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Some(candidate);
            }

            if !current.pop() {
                return None;
            }
        }
    }
}

/// Values given on the command line or through the environment
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub marker: Option<String>,
    pub scan_workers: Option<usize>,
    pub link_workers: Option<usize>,
    pub progress: bool,
}

/// Effective settings after merging defaults, file and overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub marker: String,
    pub scan_workers: usize,
    pub link_workers: usize,
    pub progress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER.to_string(),
            scan_workers: DEFAULT_SCAN_WORKERS,
            link_workers: DEFAULT_LINK_WORKERS,
            progress: false,
        }
    }
}

impl Settings {
    /// Merge `config` and `overrides` over the defaults and validate the result
    pub fn resolve(config: &Config, overrides: Overrides) -> Result<Self, ConfigError> {
        let defaults = Settings::default();

        let settings = Settings {
            marker: overrides
                .marker
                .or_else(|| config.marker.clone())
                .unwrap_or(defaults.marker),
            scan_workers: overrides
                .scan_workers
                .or(config.scan_workers)
                .unwrap_or(defaults.scan_workers),
            link_workers: overrides
                .link_workers
                .or(config.link_workers)
                .unwrap_or(defaults.link_workers),
            progress: overrides.progress || config.progress,
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.marker.trim().is_empty() {
            return Err(ConfigError::Invalid("marker must not be empty".to_string()));
        }
        if self.marker.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "marker '{}' must be a file name, not a path",
                self.marker
            )));
        }
        if self.scan_workers == 0 {
            return Err(ConfigError::Invalid(
                "scan_workers must be at least 1".to_string(),
            ));
        }
        if self.link_workers == 0 {
            return Err(ConfigError::Invalid(
                "link_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            marker: self.marker.clone(),
            workers: self.scan_workers,
        }
    }
}
