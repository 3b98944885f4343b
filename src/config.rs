use anyhow::Context as _;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::http::parser::DEFAULT_MAX_HEADER_SIZE;

/// Environment variable naming an optional YAML config file.
pub const CONFIG_ENV: &str = "HOMEPORT_CONFIG";
/// Overrides `server.port`.
pub const PORT_ENV: &str = "PORT";
/// Overrides `server.timeout_secs`; `0` disables the timeout.
pub const TIMEOUT_ENV: &str = "LISTEN_TIMEOUT";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    /// Default tracing filter, used when `RUST_LOG` is unset.
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on. Unset means every interface, IPv6 and IPv4.
    pub address: Option<IpAddr>,
    pub port: u16,
    /// Seconds of read inactivity before a connection is killed. `0` disables.
    pub timeout_secs: u64,
    /// Largest single read from a socket.
    pub max_read_size: usize,
    /// Limit on the request line plus headers.
    pub max_header_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: 8080,
            timeout_secs: 15,
            max_read_size: 1024,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Config {
    /// Defaults, then the file named by `HOMEPORT_CONFIG`, then the
    /// `PORT` and `LISTEN_TIMEOUT` overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(port) = std::env::var(PORT_ENV) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("{PORT_ENV} is not a valid port: {port:?}"))?;
        }
        if let Ok(secs) = std::env::var(TIMEOUT_ENV) {
            self.server.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("{TIMEOUT_ENV} is not a number of seconds: {secs:?}"))?;
        }
        self.validate()
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.server.max_read_size > 0, "server.max_read_size must be positive");
        anyhow::ensure!(
            self.server.max_header_size > 0,
            "server.max_header_size must be positive"
        );
        Ok(())
    }
}
