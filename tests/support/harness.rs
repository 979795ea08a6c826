use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use relayproxy::{cli::LogFormat, proxy::listener::ProxyListener, settings::Settings};

/// Loopback settings on an ephemeral port with a short poll interval.
pub fn test_settings() -> Settings {
    Settings {
        hostname: "127.0.0.1".to_string(),
        port: 0,
        backlog: 16,
        server_recvbuf_size: 8192,
        client_recvbuf_size: 8192,
        open_file_limit: 1024,
        log_file: None,
        log: LogFormat::Text,
        idle_timeout: 5,
        poll_interval_ms: 50,
        upstream_connect_timeout: 2,
    }
}

pub struct ProxyHarness {
    pub addr: SocketAddr,
    pub settings: Settings,
    handle: JoinHandle<Result<()>>,
}

impl ProxyHarness {
    pub async fn connect(&self) -> Result<TcpStream> {
        Ok(TcpStream::connect(self.addr).await?)
    }

    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

pub struct ProxyHarnessBuilder {
    settings: Settings,
}

impl Default for ProxyHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyHarnessBuilder {
    pub fn new() -> Self {
        Self {
            settings: test_settings(),
        }
    }

    pub fn with_settings<F>(mut self, func: F) -> Self
    where
        F: FnOnce(&mut Settings),
    {
        func(&mut self.settings);
        self
    }

    pub async fn spawn(self) -> Result<ProxyHarness> {
        let listener = ProxyListener::bind(&self.settings).await?;
        let addr = listener.local_addr();
        let handle = tokio::spawn(listener.serve());
        let mut settings = self.settings;
        settings.port = addr.port();
        Ok(ProxyHarness {
            addr,
            settings,
            handle,
        })
    }
}
