use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::discovery::{DEFAULT_BROADCAST_INTERVAL, DEFAULT_DISCOVERY_PORT};
use crate::models::NodeMode;
use crate::sync::DEFAULT_SYNC_INTERVAL;

pub const DEFAULT_PORT: u16 = 3001;

/// Source of a configuration value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    fn set(&mut self, value: T, source: ConfigSource) {
        self.value = value;
        self.source = source;
    }
}

/// Node configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    /// Directory holding one JSON file per collection
    pub data_dir: ConfigValue<PathBuf>,
    /// Shared folder for the snapshot file; local-only when unset
    pub shared_path: ConfigValue<Option<PathBuf>>,
    /// HTTP listen port
    pub port: ConfigValue<u16>,
    pub discovery_port: ConfigValue<u16>,
    pub broadcast_interval_secs: ConfigValue<u64>,
    pub sync_interval_ms: ConfigValue<u64>,
    pub mode: ConfigValue<NodeMode>,
    pub node_id: ConfigValue<String>,
    /// Run UDP discovery
    pub discovery: ConfigValue<bool>,
    /// Start the export/import timer at startup
    pub auto_sync: ConfigValue<bool>,
    /// Peers known up front (`host:port`)
    pub peers: Vec<String>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    shared_path: Option<PathBuf>,
    port: Option<u16>,
    discovery_port: Option<u16>,
    broadcast_interval_secs: Option<u64>,
    sync_interval_ms: Option<u64>,
    mode: Option<String>,
    node_id: Option<String>,
    discovery: Option<bool>,
    auto_sync: Option<bool>,
    peers: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let default = ConfigSource::Default;
        Self {
            data_dir: ConfigValue::new(Self::default_data_dir(), default),
            shared_path: ConfigValue::new(None, default),
            port: ConfigValue::new(DEFAULT_PORT, default),
            discovery_port: ConfigValue::new(DEFAULT_DISCOVERY_PORT, default),
            broadcast_interval_secs: ConfigValue::new(DEFAULT_BROADCAST_INTERVAL.as_secs(), default),
            sync_interval_ms: ConfigValue::new(DEFAULT_SYNC_INTERVAL.as_millis() as u64, default),
            mode: ConfigValue::new(NodeMode::default(), default),
            node_id: ConfigValue::new(uuid::Uuid::new_v4().to_string(), default),
            discovery: ConfigValue::new(true, default),
            auto_sync: ConfigValue::new(true, default),
            peers: Vec::new(),
            config_file: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration with priority: env vars > config file > defaults.
    ///
    /// Without an explicit path, `DATASHARE_CONFIG` and then the platform
    /// default are tried.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path
            .or_else(|| std::env::var_os("DATASHARE_CONFIG").map(PathBuf::from))
            .unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
            config.apply_file(&path, file_config)?;
            config.config_file = Some(path);
        }

        config.apply_env()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path, file: ConfigFile) -> Result<(), ConfigError> {
        let source = ConfigSource::File;
        // Relative paths are relative to the config file's directory
        let resolve = |p: PathBuf| {
            if p.is_relative() {
                path.parent().map(|dir| dir.join(&p)).unwrap_or(p)
            } else {
                p
            }
        };

        if let Some(dir) = file.data_dir {
            self.data_dir.set(resolve(dir), source);
        }
        if let Some(shared) = file.shared_path {
            self.shared_path.set(Some(resolve(shared)), source);
        }
        if let Some(port) = file.port {
            self.port.set(port, source);
        }
        if let Some(port) = file.discovery_port {
            self.discovery_port.set(port, source);
        }
        if let Some(secs) = file.broadcast_interval_secs {
            let secs = non_zero("broadcast_interval_secs", secs)?;
            self.broadcast_interval_secs.set(secs, source);
        }
        if let Some(ms) = file.sync_interval_ms {
            self.sync_interval_ms.set(non_zero("sync_interval_ms", ms)?, source);
        }
        if let Some(mode) = file.mode {
            self.mode.set(parse_value("mode", &mode)?, source);
        }
        if let Some(id) = file.node_id {
            self.node_id.set(id, source);
        }
        if let Some(enabled) = file.discovery {
            self.discovery.set(enabled, source);
        }
        if let Some(enabled) = file.auto_sync {
            self.auto_sync.set(enabled, source);
        }
        if let Some(peers) = file.peers {
            self.peers = peers;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        let source = ConfigSource::Environment;

        if let Some(dir) = std::env::var_os("DATASHARE_DATA_DIR") {
            self.data_dir.set(PathBuf::from(dir), source);
        }
        if let Some(shared) = std::env::var_os("DATASHARE_SHARED_PATH") {
            let shared = (!shared.is_empty()).then(|| PathBuf::from(shared));
            self.shared_path.set(shared, source);
        }
        if let Some(port) = env_value("DATASHARE_PORT")? {
            self.port.set(port, source);
        }
        if let Some(port) = env_value("DATASHARE_DISCOVERY_PORT")? {
            self.discovery_port.set(port, source);
        }
        if let Some(secs) = env_value("DATASHARE_BROADCAST_INTERVAL")? {
            let secs = non_zero("DATASHARE_BROADCAST_INTERVAL", secs)?;
            self.broadcast_interval_secs.set(secs, source);
        }
        if let Some(ms) = env_value("DATASHARE_SYNC_INTERVAL_MS")? {
            let ms = non_zero("DATASHARE_SYNC_INTERVAL_MS", ms)?;
            self.sync_interval_ms.set(ms, source);
        }
        if let Some(mode) = env_value("DATASHARE_MODE")? {
            self.mode.set(mode, source);
        }
        if let Ok(id) = std::env::var("DATASHARE_NODE_ID") {
            self.node_id.set(id, source);
        }
        if let Some(enabled) = env_value("DATASHARE_DISCOVERY")? {
            self.discovery.set(enabled, source);
        }
        if let Some(enabled) = env_value("DATASHARE_AUTO_SYNC")? {
            self.auto_sync.set(enabled, source);
        }
        Ok(())
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs.value)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.value)
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/datashare/
    /// - macOS: ~/Library/Application Support/datashare/
    /// - Windows: %APPDATA%/datashare/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("datashare")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/datashare/
    /// - macOS: ~/Library/Application Support/datashare/
    /// - Windows: %APPDATA%/datashare/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("datashare")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

/// Intervals drive timers, which cannot run with a zero period.
fn non_zero(key: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

fn env_value<T: FromStr>(var: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => parse_value(var, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    /// A key or env var held a value of the wrong shape
    InvalidValue(String, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(key, e) => write!(f, "Invalid value for {}: {}", key, e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError(_, e) => Some(e),
            ConfigError::ParseError(_, e) => Some(e),
            ConfigError::InvalidValue(..) => None,
        }
    }
}
