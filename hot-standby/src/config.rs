//! Configuration management for the hot standby synchronizer.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`HOT_STANDBY_MAIN__WORKERS=8` sets `main.workers`).

use crate::codec::{self, Codec};
use crate::utils::errors::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub main: MainConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainConfig {
    /// Root of all backups: `<base_dir>/<server>/backup/<label>`
    pub base_dir: PathBuf,

    /// Parent directory for temporary extraction roots
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Default number of worker threads (0 = run jobs inline)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Compression of backup payloads (zstd, none)
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Compression level (1-22 for zstd)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,

    /// Worker threads for this server, overriding `main.workers`
    #[serde(default)]
    pub workers: Option<usize>,

    /// Hot standby root directories, processed in order
    #[serde(default)]
    pub hot_standby: Vec<PathBuf>,

    /// Directory whose contents are copied over every hot standby
    #[serde(default)]
    pub hot_standby_overrides: Option<PathBuf>,

    /// Tablespace name to hot standby tablespace directory
    #[serde(default)]
    pub hot_standby_tablespaces: BTreeMap<String, PathBuf>,
}

// Default values
fn default_workspace() -> PathBuf {
    std::env::temp_dir()
}

fn default_workers() -> usize {
    4
}

fn default_compression() -> String {
    "zstd".to_string()
}

fn default_compression_level() -> i32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply `HOT_STANDBY_*` overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("HOT_STANDBY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.main.base_dir.as_os_str().is_empty() {
            return Err(SyncError::Config("main.base_dir is required".into()));
        }

        let mut names = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(SyncError::Config("server name must not be empty".into()));
            }
            if !names.insert(server.name.as_str()) {
                return Err(SyncError::Config(format!(
                    "duplicate server name: {}",
                    server.name
                )));
            }
        }

        Ok(())
    }

    pub fn server(&self, name: &str) -> Result<&ServerConfig> {
        self.servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| SyncError::UnknownServer(name.to_string()))
    }

    pub fn number_of_workers(&self, server: &ServerConfig) -> usize {
        server.workers.unwrap_or(self.main.workers)
    }

    /// Directory holding the backups of `server`.
    pub fn server_backup_dir(&self, server: &str) -> PathBuf {
        self.main.base_dir.join(server).join("backup")
    }

    pub fn codec(&self) -> Result<Box<dyn Codec>> {
        codec::from_name(&self.main.compression, self.main.compression_level)
    }
}
