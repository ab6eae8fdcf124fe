use crate::error::ProxyError;
use crate::transport::{TransportOptions, DEFAULT_POOL_MAX_IDLE_PER_HOST};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutputType {
    Stdout,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTarget {
    #[serde(rename = "type")]
    pub output_type: LogOutputType,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<LogLevel>,
    pub format: Option<LogFormat>,
    /// Where backend failure records go. Without one they are sent
    /// through the `log` facade.
    #[serde(default)]
    pub target: Option<LogTarget>,
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_header_timeout_ms() -> u64 {
    15000
}

fn default_pool_max_idle_per_host() -> usize {
    DEFAULT_POOL_MAX_IDLE_PER_HOST
}

fn default_pool_idle_timeout() -> u64 {
    90
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub backend_url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_header_timeout_ms")]
    pub header_timeout_ms: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

impl BackendConfig {
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            connect_timeout_ms: default_connect_timeout_ms(),
            header_timeout_ms: default_header_timeout_ms(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }

    pub fn url(&self) -> Result<Url, ProxyError> {
        let url = Url::parse(&self.backend_url)?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ProxyError::Config(format!(
                    "Backend URL must use http or https, got '{}'",
                    other
                )));
            }
        }
        if url.host_str().is_none() {
            return Err(ProxyError::Config(format!(
                "Backend URL has no host: {}",
                self.backend_url
            )));
        }
        Ok(url)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            header_timeout: Duration::from_millis(self.header_timeout_ms),
            pool_max_idle_per_host: self.pool_max_idle_per_host,
            pool_idle_timeout: Duration::from_secs(self.pool_idle_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        self.backend.url()?;

        if self.backend.connect_timeout_ms == 0 {
            return Err(ProxyError::Config(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.backend.header_timeout_ms == 0 {
            return Err(ProxyError::Config(
                "header_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if let Some(LogTarget { output_type: LogOutputType::File, path: None }) =
            self.logging.as_ref().and_then(|l| l.target.as_ref())
        {
            return Err(ProxyError::Config("File log target requires a path".to_string()));
        }

        Ok(())
    }
}
