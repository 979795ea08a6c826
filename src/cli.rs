use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "relayproxy", about = "Forward HTTP/HTTPS proxy")]
pub struct Cli {
    /// Path to an optional TOML configuration file (defaults to ./relayproxy.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address the listener binds to.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Port the listener binds to.
    #[arg(long)]
    pub port: Option<u16>,

    /// Maximum pending connections on the listening socket.
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Bytes read from an origin per readiness event.
    #[arg(long)]
    pub server_recvbuf_size: Option<usize>,

    /// Bytes read from a client per readiness event.
    #[arg(long)]
    pub client_recvbuf_size: Option<usize>,

    /// Soft limit for open file descriptors requested at startup.
    #[arg(long)]
    pub open_file_limit: Option<u64>,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub log: Option<LogFormat>,
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
