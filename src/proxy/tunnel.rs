use std::time::Duration;

use tokio::io::{Interest, Ready};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::logging::{SessionLogBuilder, SessionMode};

use super::{
    connection::{BufferedConnection, Received},
    error::ProxyError,
    headers::{ADDED_REQUEST_HEADERS, STRIPPED_REQUEST_HEADERS},
    http::{MessageParser, TUNNEL_ESTABLISHED_RESPONSE, parse_authority},
    upstream::connect_origin,
};

const DEFAULT_HTTP_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub client_recv_size: usize,
    pub server_recv_size: usize,
    /// A session with no traffic for this long is closed.
    pub idle_timeout: Duration,
    /// Upper bound on a single readiness wait.
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            client_recv_size: 8192,
            server_recv_size: 8192,
            idle_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelExit {
    ResponseComplete,
    IdleTimeout,
    ClientClosed,
    Rejected,
}

impl TunnelExit {
    pub fn as_str(self) -> &'static str {
        match self {
            TunnelExit::ResponseComplete => "response_complete",
            TunnelExit::IdleTimeout => "idle_timeout",
            TunnelExit::ClientClosed => "client_closed",
            TunnelExit::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Default)]
struct Readiness {
    client: Option<Ready>,
    server: Option<Ready>,
}

/// One proxied exchange between a client and the origin it asked for.
///
/// The request is parsed until complete, the origin is connected, and from
/// then on bytes are relayed in both directions. Plain requests are rewritten
/// before forwarding; CONNECT requests turn the session into an opaque relay.
pub struct Tunnel {
    config: TunnelConfig,
    client: BufferedConnection,
    server: Option<BufferedConnection>,
    request: MessageParser,
    response: MessageParser,
    response_untracked: bool,
    destination: Option<(String, u16)>,
    start_time: Instant,
    last_activity: Instant,
    bytes_in: u64,
    bytes_out: u64,
    error: Option<ProxyError>,
}

impl Tunnel {
    pub fn new(client: BufferedConnection, config: TunnelConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            client,
            server: None,
            request: MessageParser::request(),
            response: MessageParser::tracking_only(),
            response_untracked: false,
            destination: None,
            start_time: now,
            last_activity: now,
            bytes_in: 0,
            bytes_out: 0,
            error: None,
        }
    }

    /// Drive the session to completion. Both connections are closed on return.
    pub async fn run(mut self) -> TunnelExit {
        let exit = match self.process().await {
            Ok(exit) => exit,
            Err(err) => self.reject(err).await,
        };
        self.client.close();
        if let Some(server) = self.server.as_mut() {
            server.close();
        }
        self.log_summary(exit);
        exit
    }

    async fn process(&mut self) -> Result<TunnelExit, ProxyError> {
        loop {
            let readiness = self.poll_ready().await;

            if readiness.client.is_some_and(|ready| ready.is_writable()) {
                self.flush_client();
            }
            if readiness.server.is_some_and(|ready| ready.is_writable()) {
                self.flush_server();
            }
            if self.client.is_closed() {
                return Ok(TunnelExit::ClientClosed);
            }

            if readiness.client.is_some_and(|ready| ready.is_readable())
                && let Some(exit) = self.on_client_readable().await?
            {
                return Ok(exit);
            }
            if readiness.server.is_some_and(|ready| ready.is_readable()) {
                self.on_server_readable();
            }

            if !self.client.has_pending() {
                if self.response_complete() {
                    return Ok(TunnelExit::ResponseComplete);
                }
                if self.is_inactive() {
                    debug!(
                        idle_ms = self.last_activity.elapsed().as_millis() as u64,
                        "session idle"
                    );
                    return Ok(TunnelExit::IdleTimeout);
                }
            }
        }
    }

    async fn poll_ready(&self) -> Readiness {
        let client_interest = self.client.interest();
        let server = self.server.as_ref().filter(|server| !server.is_closed());
        let wait = async {
            match server {
                Some(server) => tokio::select! {
                    ready = self.client.ready(client_interest) => Readiness {
                        client: Some(ready.unwrap_or(Ready::READ_CLOSED)),
                        server: None,
                    },
                    ready = server.ready(server.interest()) => Readiness {
                        client: None,
                        server: Some(ready.unwrap_or(Ready::READ_CLOSED)),
                    },
                },
                None => Readiness {
                    client: Some(
                        self.client
                            .ready(client_interest)
                            .await
                            .unwrap_or(Ready::READ_CLOSED),
                    ),
                    server: None,
                },
            }
        };
        timeout(self.config.poll_interval, wait)
            .await
            .unwrap_or_default()
    }

    fn flush_client(&mut self) {
        match self.client.flush() {
            Ok(0) => {}
            Ok(written) => {
                self.bytes_out += written as u64;
                self.touch();
            }
            Err(err) => {
                warn!(error = %err, "write to client failed");
                self.client.close();
            }
        }
    }

    fn flush_server(&mut self) {
        let Some(server) = self.server.as_mut() else {
            return;
        };
        match server.flush() {
            Ok(0) => {}
            Ok(_) => self.last_activity = Instant::now(),
            Err(err) => {
                warn!(error = %err, "write to origin failed");
                server.close();
            }
        }
    }

    async fn on_client_readable(&mut self) -> Result<Option<TunnelExit>, ProxyError> {
        let data = match self.client.receive(self.config.client_recv_size) {
            Received::Pending => return Ok(None),
            Received::Closed => return Ok(Some(TunnelExit::ClientClosed)),
            Received::Data(data) => data,
        };
        self.touch();
        self.bytes_in += data.len() as u64;

        if let Some(server) = self.server.as_mut() {
            if server.is_closed() {
                debug!(bytes = data.len(), "origin closed; dropping client bytes");
            } else {
                server.queue(&data);
            }
            return Ok(None);
        }

        self.request.parse(&data)?;
        if self.request.is_complete() {
            self.open_server().await?;
        }
        Ok(None)
    }

    async fn open_server(&mut self) -> Result<(), ProxyError> {
        let (host, port) = resolve_destination(&self.request)?;
        self.destination = Some((host.clone(), port));
        let (stream, addr) = connect_origin(&host, port, self.config.connect_timeout).await?;
        info!(
            host = %host,
            port,
            origin = %addr,
            connect = self.request.is_connect(),
            "connected to origin"
        );

        let mut server = BufferedConnection::server(stream, addr);
        if self.request.is_connect() {
            self.client.queue(TUNNEL_ESTABLISHED_RESPONSE);
        } else {
            let head = self
                .request
                .build(STRIPPED_REQUEST_HEADERS, ADDED_REQUEST_HEADERS)
                .ok_or_else(|| ProxyError::Unroutable("request start line missing".to_string()))?;
            server.queue(&head);
        }
        let early = self.request.take_remainder();
        if !early.is_empty() {
            server.queue(&early);
        }
        self.server = Some(server);
        Ok(())
    }

    fn on_server_readable(&mut self) {
        let received = match self.server.as_mut() {
            Some(server) => server.receive(self.config.server_recv_size),
            None => return,
        };
        match received {
            Received::Pending => {}
            Received::Closed => {
                if let Some(server) = self.server.as_mut() {
                    server.close();
                }
                if !self.request.is_connect() {
                    self.response.finish_on_close();
                }
            }
            Received::Data(data) => {
                self.touch();
                if !self.request.is_connect()
                    && !self.response_untracked
                    && !self.response.is_complete()
                    && let Err(err) = self.response.parse(&data)
                {
                    debug!(error = %err, "response not parseable; relaying untracked");
                    self.response_untracked = true;
                }
                self.client.queue(&data);
            }
        }
    }

    fn response_complete(&self) -> bool {
        if self.response.is_complete() {
            return true;
        }
        self.response_untracked && self.server.as_ref().is_some_and(BufferedConnection::is_closed)
    }

    fn is_inactive(&self) -> bool {
        self.last_activity.elapsed() > self.config.idle_timeout
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    async fn reject(&mut self, err: ProxyError) -> TunnelExit {
        warn!(error = %err, reason = err.reason(), "rejecting session");
        if let Some(response) = err.response() {
            self.client.queue(response);
            self.drain_client().await;
        }
        self.error = Some(err);
        TunnelExit::Rejected
    }

    /// Flush whatever is queued for the client, giving up at the idle deadline.
    async fn drain_client(&mut self) {
        let deadline = Instant::now() + self.config.idle_timeout;
        while self.client.has_pending() && !self.client.is_closed() {
            match timeout_at(deadline, self.client.ready(Interest::WRITABLE)).await {
                Ok(Ok(ready)) if ready.is_writable() => self.flush_client(),
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
    }

    fn log_summary(&self, exit: TunnelExit) {
        let mut entry = SessionLogBuilder::new(self.client.peer())
            .bytes(self.bytes_in, self.bytes_out)
            .elapsed(self.start_time.elapsed())
            .outcome(exit.as_str());
        if let Some(method) = self.request.method() {
            entry = entry.method(method.as_str());
        }
        if let Some((host, port)) = &self.destination {
            entry = entry.destination(host.clone(), *port);
        }
        if self.server.is_some() {
            entry = entry.mode(if self.request.is_connect() {
                SessionMode::Connect
            } else {
                SessionMode::Forward
            });
        }
        if let Some(status) = self.error.as_ref().and_then(ProxyError::status) {
            entry = entry.status(status);
        } else if let Some(status) = self.response.status() {
            entry = entry.status(status);
        }
        if let Some(err) = &self.error {
            entry = entry
                .error_reason(err.reason())
                .error_detail(err.to_string());
        }
        entry.log();
    }
}

/// Work out which origin a complete request should be sent to.
///
/// CONNECT uses the authority from the request line, taking the port from the
/// `Host` header when the authority omits it. Other methods use the absolute
/// target's host and port (default 80) and fall back to the `Host` header for
/// origin-form targets.
pub fn resolve_destination(request: &MessageParser) -> Result<(String, u16), ProxyError> {
    let from_target = request
        .target()
        .and_then(|target| target.host.clone().map(|host| (host, target.port)));
    let from_header = request
        .header("host")
        .and_then(|entry| entry.value_str())
        .and_then(|value| parse_authority(value).ok())
        .and_then(|(host, port)| host.map(|host| (host, port)));

    if request.is_connect() {
        let Some((host, port)) = from_target.or_else(|| from_header.clone()) else {
            return Err(ProxyError::Unroutable("CONNECT target has no host".to_string()));
        };
        let port = port.or_else(|| {
            from_header
                .as_ref()
                .filter(|(header_host, _)| *header_host == host)
                .and_then(|(_, port)| *port)
        });
        return match port {
            Some(port) => Ok((host, port)),
            None => Err(ProxyError::Unroutable(format!(
                "CONNECT target {host} has no port"
            ))),
        };
    }

    match from_target.or(from_header) {
        Some((host, port)) => Ok((host, port.unwrap_or(DEFAULT_HTTP_PORT))),
        None => Err(ProxyError::Unroutable(
            "request target has no host and no Host header".to_string(),
        )),
    }
}
