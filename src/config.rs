use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "SSP_CONFIG";

/// Environment variable overriding the listening port
pub const PORT_ENV: &str = "SSP_PORT";

/// Default config file path
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Listening port; backends are dialed on this same port
    pub port: u16,
    /// Read deadline for the ClientHello, in milliseconds
    pub peek_timeout_ms: u64,
    /// Upper bound on handshake bytes buffered while peeking
    pub max_hello_bytes: usize,
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Optional log file; console output is always kept
    pub file: Option<String>,
    pub json: bool,
    /// Rotate the log file daily
    pub rotation: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 443,
            peek_timeout_ms: 5000,
            max_hello_bytes: 64 * 1024,
            max_connections: 10_000,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1".to_string(),
            port: 9090,
            path: "/health".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
            rotation: true,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn peek_timeout(&self) -> Duration {
        Duration::from_millis(self.peek_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }

    /// Load configuration from file or use default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config file, using defaults: {}", e);
            Self::default()
        })
    }

    /// Load from `SSP_CONFIG` (or `config.toml`) and apply `SSP_PORT`
    pub fn from_env() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_or_default(path);
        config.apply_port_override(std::env::var(PORT_ENV).ok().as_deref())?;
        Ok(config)
    }

    pub fn apply_port_override(&mut self, value: Option<&str>) -> Result<()> {
        if let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.server.port = raw
                .parse()
                .with_context(|| format!("{} must be a port number, got {:?}", PORT_ENV, raw))?;
        }
        Ok(())
    }

    /// Check the configuration for values the proxy cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must not be 0");
        }
        if self.server.peek_timeout_ms == 0 {
            anyhow::bail!("server.peek_timeout_ms must be greater than 0");
        }
        if self.server.max_hello_bytes < 512 {
            anyhow::bail!(
                "server.max_hello_bytes must be at least 512, got {}",
                self.server.max_hello_bytes
            );
        }
        if self.server.max_connections == 0 {
            anyhow::bail!("server.max_connections must be greater than 0");
        }
        if self.stats.enabled {
            if !self.stats.path.starts_with('/') {
                anyhow::bail!("stats.path must start with '/', got {:?}", self.stats.path);
            }
            if self.stats.port == self.server.port
                && self.stats.bind_address == self.server.bind_address
            {
                anyhow::bail!(
                    "stats server conflicts with proxy listener on {}",
                    self.server.bind_addr()
                );
            }
        }
        Ok(())
    }
}
