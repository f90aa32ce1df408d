//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$THREADSTORE_CONFIG` (environment variable)
//! 2. `~/.config/threadstore/config.toml` (Linux/macOS)
//!    `%APPDATA%\threadstore\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::cc::{Identity, DEFAULT_NOTE_MAX_LEN};
use crate::thread::StoreOptions;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// The service account threads are stored for.
    pub service: ServiceConfig,
    /// Storage tuning.
    pub storage: StorageConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override the data directory holding service directories and logs.
    pub data_dir: Option<PathBuf>,
}

/// The service account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service directory name under the data directory.
    pub name: String,
    /// User id assigned by the service.
    pub uid: String,
    /// Display alias.
    pub alias: String,
}

/// Storage tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// CC notes longer than this many bytes are truncated on send.
    pub cc_note_max_len: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            data_dir: None,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            uid: String::new(),
            alias: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cc_note_max_len: DEFAULT_NOTE_MAX_LEN,
        }
    }
}

impl Config {
    /// Store options for the configured service.
    pub fn store_options(&self) -> StoreOptions {
        let identity = Identity {
            uid: self.service.uid.clone(),
            alias: self.service.alias.clone(),
        };
        let mut opts = StoreOptions::new(service_dir(self), identity);
        opts.cc_note_max_len = self.storage.cc_note_max_len;
        opts
    }
}

// ── Load ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    let Some(path) = config_file_path() else {
        return Config::default();
    };
    if !path.exists() {
        return Config::default();
    }
    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "Loaded config");
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse config, using defaults"
                );
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read config file, using defaults"
            );
            Config::default()
        }
    }
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("THREADSTORE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("threadstore").join("config.toml"))
}

/// Return the data directory holding service directories and logs.
pub fn data_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.data_dir {
        return dir.clone();
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("threadstore")
}

/// Return the directory of the configured service.
pub fn service_dir(config: &Config) -> PathBuf {
    data_dir(config).join(&config.service.name)
}

/// Return the log directory.
pub fn log_dir(config: &Config) -> PathBuf {
    data_dir(config).join("log")
}
