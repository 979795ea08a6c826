use std::fs::OpenOptions;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use http::StatusCode;
use time::OffsetDateTime;
use tracing_subscriber::{EnvFilter, fmt, fmt::writer::BoxMakeWriter};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat, log_file: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (writer, ansi) = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

/// How a session used its origin connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Forward,
    Connect,
}

impl SessionMode {
    fn as_str(self) -> &'static str {
        match self {
            SessionMode::Forward => "forward",
            SessionMode::Connect => "connect",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionLogEvent {
    pub client_ip: IpAddr,
    pub client_port: u16,
    pub method: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub mode: Option<SessionMode>,
    pub status: Option<u16>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub elapsed_ms: u128,
    pub outcome: String,
    pub error_reason: Option<String>,
    pub error_detail: Option<String>,
}

#[derive(Debug)]
pub struct SessionLogBuilder {
    event: SessionLogEvent,
}

impl SessionLogBuilder {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            event: SessionLogEvent {
                client_ip: peer.ip(),
                client_port: peer.port(),
                method: None,
                host: None,
                port: None,
                mode: None,
                status: None,
                bytes_in: 0,
                bytes_out: 0,
                elapsed_ms: 0,
                outcome: String::from("unknown"),
                error_reason: None,
                error_detail: None,
            },
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.event.method = Some(method.into());
        self
    }

    pub fn destination(mut self, host: impl Into<String>, port: u16) -> Self {
        self.event.host = Some(host.into());
        self.event.port = Some(port);
        self
    }

    pub fn mode(mut self, mode: SessionMode) -> Self {
        self.event.mode = Some(mode);
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.event.status = Some(status.as_u16());
        self
    }

    /// `bytes_in` counts bytes read from the client, `bytes_out` bytes
    /// written back to it.
    pub fn bytes(mut self, in_bytes: u64, out_bytes: u64) -> Self {
        self.event.bytes_in = in_bytes;
        self.event.bytes_out = out_bytes;
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.event.elapsed_ms = elapsed.as_millis();
        self
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.event.outcome = outcome.into();
        self
    }

    pub fn error_reason(mut self, reason: impl Into<String>) -> Self {
        self.event.error_reason = Some(reason.into());
        self
    }

    pub fn error_detail(mut self, detail: impl Into<String>) -> Self {
        self.event.error_detail = Some(detail.into());
        self
    }

    pub fn build(self) -> SessionLogEvent {
        self.event
    }

    pub fn log(self) {
        log_session(self.build());
    }
}

pub fn log_session(event: SessionLogEvent) {
    let SessionLogEvent {
        client_ip,
        client_port,
        method,
        host,
        port,
        mode,
        status,
        bytes_in,
        bytes_out,
        elapsed_ms,
        outcome,
        error_reason,
        error_detail,
    } = event;

    let now = OffsetDateTime::now_utc();
    let (year, month, day) = now.to_calendar_date();
    let (hour, minute, second) = now.to_hms();
    let millisecond = now.millisecond();
    let month_number: u8 = month.into();
    let ts = format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millisecond:03}Z",
        month = month_number
    );

    tracing::info!(
        target: "session_log",
        ts,
        client_ip = %client_ip,
        client_port,
        method = method.as_deref(),
        host = host.as_deref(),
        port,
        mode = mode.map(SessionMode::as_str),
        status,
        bytes_in,
        bytes_out,
        elapsed_ms,
        outcome,
        error_reason = error_reason.as_deref(),
        error_detail = error_detail.as_deref()
    );
}
