use http::StatusCode;
use thiserror::Error;

use super::http::{BAD_GATEWAY_RESPONSE, PROXY_AUTH_REQUIRED_RESPONSE};

/// Faults raised while decoding an HTTP message from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed start line: {0}")]
    MalformedStartLine(String),
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("invalid request target '{0}'")]
    InvalidTarget(String),
    #[error("invalid Content-Length value '{0}'")]
    InvalidContentLength(String),
    #[error("invalid chunk size line '{0}'")]
    InvalidChunkSize(String),
    #[error("chunk data was not terminated by CRLF")]
    InvalidChunkTerminator,
    #[error("line exceeds configured limit of {0} bytes")]
    LineTooLong(usize),
}

/// Session-level failures. Each variant maps to how the tunnel answers the client.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("parse fault: {0}")]
    ParseFault(#[from] ParseError),
    #[error("failed to connect to origin {host}:{port}: {reason}")]
    OriginConnectFailed {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("proxy authentication required")]
    ProxyAuthRequired,
    #[error("request cannot be routed: {0}")]
    Unroutable(String),
}

impl ProxyError {
    /// The response synthesized for this failure, or `None` when the client is
    /// answered by closing the connection.
    pub fn response(&self) -> Option<&'static [u8]> {
        match self {
            ProxyError::OriginConnectFailed { .. } => Some(BAD_GATEWAY_RESPONSE),
            ProxyError::ProxyAuthRequired => Some(PROXY_AUTH_REQUIRED_RESPONSE),
            ProxyError::ParseFault(_) | ProxyError::Unroutable(_) => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProxyError::OriginConnectFailed { .. } => Some(StatusCode::BAD_GATEWAY),
            ProxyError::ProxyAuthRequired => Some(StatusCode::PROXY_AUTHENTICATION_REQUIRED),
            ProxyError::ParseFault(_) | ProxyError::Unroutable(_) => None,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ProxyError::ParseFault(_) => "parse_fault",
            ProxyError::OriginConnectFailed { .. } => "origin_connect_failed",
            ProxyError::ProxyAuthRequired => "proxy_auth_required",
            ProxyError::Unroutable(_) => "unroutable",
        }
    }
}
