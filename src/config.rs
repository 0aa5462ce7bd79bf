//! Configuration file loading.
//!
//! The default path is `<config dir>/sefile/config.toml`. A missing file
//! means defaults; environment variables override file values.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("login.attempts must be between 1 and 10, got {0}")]
    InvalidAttempts(u32),

    #[error("log.level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub login: LoginConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Directories scanned for emulated tokens: each root, its children and
    /// its grandchildren (`/media/<user>/<mount>`).
    pub search_paths: Vec<PathBuf>,

    /// Device used when none is given on the command line.
    pub peripheral: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoginConfig {
    /// Password prompts allowed before giving up.
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            search_paths: default_search_paths(),
            peripheral: None,
        }
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self { attempts: 3 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

fn default_search_paths() -> Vec<PathBuf> {
    if cfg!(windows) {
        ('D'..='Z').map(|c| PathBuf::from(format!("{c}:\\"))).collect()
    } else {
        vec![
            PathBuf::from("/media"),
            PathBuf::from("/run/media"),
            PathBuf::from("/mnt"),
        ]
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sefile")
        .join("config.toml")
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })
    }

    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(default_config_path())
    }

    /// Supported variables:
    /// - SEFILE_DEVICE_PATHS: search paths, separated like `PATH`
    /// - SEFILE_PERIPHERAL: default device identifier
    /// - SEFILE_LOG_LEVEL: log level
    pub fn apply_env_overrides(&mut self) {
        if let Some(paths) = std::env::var_os("SEFILE_DEVICE_PATHS") {
            if !paths.is_empty() {
                self.device.search_paths = std::env::split_paths(&paths).collect();
            }
        }
        if let Ok(peripheral) = std::env::var("SEFILE_PERIPHERAL") {
            if !peripheral.is_empty() {
                self.device.peripheral = Some(peripheral);
            }
        }
        if let Ok(level) = std::env::var("SEFILE_LOG_LEVEL") {
            if !level.is_empty() {
                self.log.level = level;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.login.attempts) {
            return Err(ConfigError::InvalidAttempts(self.login.attempts));
        }
        let level = self.log.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }
        Ok(())
    }
}
