//! CLI and daemon configuration.

use depchain_nats::NatsConfig;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// API server URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            output_format: OutputFormat::default(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl CliConfig {
    /// Load configuration from file.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = directories::ProjectDirs::from("io", "depchain", "depchain")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "api_url" => self.api_url = value.to_string(),
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    "yaml" => OutputFormat::Yaml,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}

/// Daemon configuration, read by `depchain serve`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DaemonConfig {
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub nats: NatsSettings,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Scheduler configuration file, relative to this file.
    #[serde(default = "default_schedulers_path")]
    pub schedulers: PathBuf,
    /// Keep buildsets, pending requests and events in process memory.
    #[serde(default)]
    pub memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NatsSettings {
    #[serde(default = "default_nats_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    #[serde(default = "default_true")]
    pub enable_dlq: bool,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            urls: default_nats_urls(),
            stream_name: default_stream_name(),
            enable_dlq: true,
        }
    }
}

impl NatsSettings {
    pub fn to_nats_config(&self) -> NatsConfig {
        NatsConfig::default()
            .with_urls(self.urls.clone())
            .with_stream_name(self.stream_name.clone())
            .with_dlq(self.enable_dlq)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_max_connections() -> u32 {
    10
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_schedulers_path() -> PathBuf {
    PathBuf::from("schedulers.yaml")
}

fn default_nats_urls() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}

fn default_stream_name() -> String {
    "DEPCHAIN_EVENTS".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
            nats: NatsSettings::default(),
            listen_addr: default_listen_addr(),
            log_format: LogFormat::default(),
            schedulers: default_schedulers_path(),
            memory: false,
        }
    }
}

impl DaemonConfig {
    /// Load from `path` when it exists, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let mut config: Self = serde_yaml::from_str(&content)?;
            if config.schedulers.is_relative() {
                if let Some(dir) = path.parent() {
                    config.schedulers = dir.join(&config.schedulers);
                }
            }
            config
        } else {
            Self::default()
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(urls) = var("NATS_URL") {
            self.nats.urls = urls.split(',').map(|u| u.trim().to_string()).collect();
        }
        if let Some(addr) = var("DEPCHAIN_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        self.listen_addr
            .parse()
            .map_err(|e| format!("Invalid listen address {}: {}", self.listen_addr, e).into())
    }
}
