use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};

const APP_DIR: &str = "zeroconf-browser";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Restrict the mDNS daemon to one interface
    #[serde(default)]
    pub interface: Option<String>,
    /// How long the known-types scan listens for answers
    #[serde(default = "default_type_scan")]
    pub type_scan_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_base_offset")]
    pub base_offset: u32,
    #[serde(default = "default_row_height")]
    pub row_height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

fn default_db_path() -> PathBuf {
    data_dir().join("settings.db")
}

fn default_type_scan() -> u64 {
    3
}

fn default_base_offset() -> u32 {
    4
}

fn default_row_height() -> u32 {
    1
}

fn default_log_file() -> PathBuf {
    data_dir().join("zeroconf-browser.log")
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interface: None,
            type_scan_secs: default_type_scan(),
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            base_offset: default_base_offset(),
            row_height: default_row_height(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Explicit path must exist; the default location may be absent.
    pub fn resolve(explicit: Option<&str>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml")) {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }
}
