use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::media::Platform;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub ytdlp: YtDlpConfig,
    pub provision: ProvisionConfig,
    pub wifi: WifiConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Either "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct YtDlpConfig {
    /// Directory the provisioned yt-dlp executable lives in
    pub binary_dir: PathBuf,
    pub metadata_timeout_secs: u64,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary_dir: PathBuf::from("bin"),
            metadata_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Backoff,
    FollowRedirects,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProvisionConfig {
    pub target_platform: Platform,
    pub strategy: StrategyKind,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_redirects: u32,
    /// Overrides the GitHub release asset URL for the target platform
    pub release_url: Option<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            target_platform: Platform::Linux,
            strategy: StrategyKind::Backoff,
            max_attempts: 3,
            base_delay_ms: 2000,
            max_redirects: 10,
            release_url: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WifiConfig {
    pub max_upload_bytes: usize,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 5 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file {}", path))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("BIND_ADDR") {
            self.server.bind = bind;
        }
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }
}
