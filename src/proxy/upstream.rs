use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::debug;

use crate::{proxy::error::ProxyError, util::timeout_with_context};

/// Resolve `host:port` and connect to the first address that accepts.
///
/// Any resolution or connect failure is reported as
/// [`ProxyError::OriginConnectFailed`] carrying the last failure reason.
pub async fn connect_origin(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<(TcpStream, SocketAddr), ProxyError> {
    let failed = |err: anyhow::Error| ProxyError::OriginConnectFailed {
        host: host.to_string(),
        port,
        reason: format!("{err:#}"),
    };

    let addrs: Vec<SocketAddr> = timeout_with_context(
        connect_timeout,
        lookup_host((host, port)),
        format!("resolving {host}:{port}"),
    )
    .await
    .map_err(failed)?
    .collect();
    debug!(host, port, addresses = addrs.len(), "resolved origin");

    connect_to_addrs(&addrs, connect_timeout)
        .await
        .map_err(failed)
}

/// Attempt to connect to the supplied socket addresses without performing name resolution.
pub async fn connect_to_addrs(
    addrs: &[SocketAddr],
    connect_timeout: Duration,
) -> Result<(TcpStream, SocketAddr)> {
    let mut last_err = None;
    for addr in addrs {
        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(
                        host = %addr.ip(),
                        port = addr.port(),
                        error = %err,
                        "failed to set TCP_NODELAY on origin stream"
                    );
                }
                debug!(host = %addr.ip(), port = addr.port(), "connected to origin");
                return Ok((stream, *addr));
            }
            Ok(Err(err)) => {
                last_err = Some(anyhow!(err).context(format!("failed to connect to {addr}")));
            }
            Err(_) => {
                last_err = Some(anyhow!("connection to {addr} timed out"));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("no addresses resolved for origin")))
}
