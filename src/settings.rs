use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};
use crate::proxy::tunnel::TunnelConfig;

fn default_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8899
}

fn default_backlog() -> u32 {
    100
}

fn default_recvbuf_size() -> usize {
    8192
}

fn default_open_file_limit() -> u64 {
    1024
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_upstream_connect_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_recvbuf_size")]
    pub server_recvbuf_size: usize,
    #[serde(default = "default_recvbuf_size")]
    pub client_recvbuf_size: usize,
    #[serde(default = "default_open_file_limit")]
    pub open_file_limit: u64,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    /// Seconds a session may go without traffic before it is closed.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            backlog: default_backlog(),
            server_recvbuf_size: default_recvbuf_size(),
            client_recvbuf_size: default_recvbuf_size(),
            open_file_limit: default_open_file_limit(),
            log_file: None,
            log: default_log_format(),
            idle_timeout: default_idle_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
            upstream_connect_timeout: default_upstream_connect_timeout(),
        }
    }
}

impl Settings {
    /// Built-in defaults, then the config file, then `RELAYPROXY__*`
    /// environment variables, then command-line flags.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = resolve_config_path(cli) {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("RELAYPROXY")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.apply_cli(cli);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(hostname) = &cli.hostname {
            self.hostname = hostname.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(backlog) = cli.backlog {
            self.backlog = backlog;
        }
        if let Some(size) = cli.server_recvbuf_size {
            self.server_recvbuf_size = size;
        }
        if let Some(size) = cli.client_recvbuf_size {
            self.client_recvbuf_size = size;
        }
        if let Some(limit) = cli.open_file_limit {
            self.open_file_limit = limit;
        }
        if let Some(path) = &cli.log_file {
            self.log_file = Some(path.clone());
        }
        if let Some(format) = cli.log {
            self.log = format;
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.hostname.trim().is_empty(), "hostname must not be empty");
        ensure!(
            self.backlog > 0,
            "backlog must be greater than 0 (got {})",
            self.backlog
        );
        ensure!(
            self.server_recvbuf_size > 0,
            "server_recvbuf_size must be greater than 0 (got {})",
            self.server_recvbuf_size
        );
        ensure!(
            self.client_recvbuf_size > 0,
            "client_recvbuf_size must be greater than 0 (got {})",
            self.client_recvbuf_size
        );
        ensure!(
            self.open_file_limit > 0,
            "open_file_limit must be greater than 0 (got {})",
            self.open_file_limit
        );
        ensure!(
            self.idle_timeout > 0,
            "idle_timeout must be greater than 0 seconds (got {})",
            self.idle_timeout
        );
        ensure!(
            self.poll_interval_ms > 0,
            "poll_interval_ms must be greater than 0 (got {})",
            self.poll_interval_ms
        );
        ensure!(
            self.upstream_connect_timeout > 0,
            "upstream_connect_timeout must be greater than 0 seconds (got {})",
            self.upstream_connect_timeout
        );
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn tunnel_config(&self) -> TunnelConfig {
        TunnelConfig {
            client_recv_size: self.client_recvbuf_size,
            server_recv_size: self.server_recvbuf_size,
            idle_timeout: self.idle_timeout(),
            poll_interval: self.poll_interval(),
            connect_timeout: self.upstream_connect_timeout(),
        }
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = cli.config_path() {
        return Some(path.to_path_buf());
    }
    let candidate = PathBuf::from("relayproxy.toml");
    candidate.exists().then_some(candidate)
}
