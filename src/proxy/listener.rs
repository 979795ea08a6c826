use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use nix::errno::Errno;
use tokio::net::{TcpListener, TcpSocket, TcpStream, lookup_host};
use tokio::time::{sleep, timeout};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::settings::Settings;

use super::{
    connection::BufferedConnection,
    tunnel::{Tunnel, TunnelConfig},
};

const INSTANCE_PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const DESCRIPTOR_BACKOFF: Duration = Duration::from_millis(100);

/// Listening socket that hands each accepted connection to its own [`Tunnel`].
pub struct ProxyListener {
    inner: TcpListener,
    config: TunnelConfig,
    local_addr: SocketAddr,
}

impl ProxyListener {
    /// Resolve and bind the configured address.
    ///
    /// Fails if another process already accepts connections on the port.
    /// The open-file soft limit is raised before binding.
    pub async fn bind(settings: &Settings) -> Result<Self> {
        let bind_addr = lookup_host((settings.hostname.as_str(), settings.port))
            .await
            .with_context(|| {
                format!(
                    "failed to resolve listen address {}:{}",
                    settings.hostname, settings.port
                )
            })?
            .next()
            .ok_or_else(|| {
                anyhow!(
                    "no address resolved for {}:{}",
                    settings.hostname,
                    settings.port
                )
            })?;

        if bind_addr.port() != 0 {
            ensure!(
                !instance_running(bind_addr).await,
                "another instance is already listening on port {}",
                bind_addr.port()
            );
        }

        match raise_open_file_limit(settings.open_file_limit) {
            Ok(limit) => info!(
                soft_limit = limit,
                requested = settings.open_file_limit,
                "open file limit"
            ),
            Err(err) => warn!(error = %err, "failed to raise open file limit"),
        }

        let socket = if bind_addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .context("failed to create listener socket")?;
        socket
            .set_reuseaddr(true)
            .context("failed to set SO_REUSEADDR")?;
        socket
            .bind(bind_addr)
            .with_context(|| format!("failed to bind listener on {bind_addr}"))?;
        let inner = socket
            .listen(settings.backlog)
            .with_context(|| format!("failed to listen on {bind_addr}"))?;
        let local_addr = inner.local_addr().unwrap_or(bind_addr);
        info!(address = %local_addr, backlog = settings.backlog, "proxy listener started");

        Ok(Self {
            inner,
            config: settings.tunnel_config(),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until a non-transient accept error occurs.
    pub async fn serve(self) -> Result<()> {
        let mut next_id: u64 = 0;
        let result = loop {
            match self.inner.accept().await {
                Ok((stream, peer)) => {
                    next_id += 1;
                    debug!(peer = %peer, conn = next_id, "accepted connection");
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %err, "failed to set TCP_NODELAY on client stream");
                    }
                    let tunnel = Tunnel::new(
                        BufferedConnection::client(stream, peer),
                        self.config.clone(),
                    );
                    tokio::spawn(
                        tunnel
                            .run()
                            .instrument(info_span!("tunnel", conn = next_id, peer = %peer)),
                    );
                }
                Err(err) if is_descriptor_exhaustion(&err) => {
                    warn!(error = %err, "out of file descriptors; backing off");
                    sleep(DESCRIPTOR_BACKOFF).await;
                }
                Err(err) if is_transient_accept_error(&err) => {
                    debug!(error = %err, "transient accept error");
                }
                Err(err) => break Err(fatal_accept_error(self.local_addr, err)),
            }
        };
        info!(address = %self.local_addr, "closing listener socket");
        result
    }
}

async fn instance_running(bind_addr: SocketAddr) -> bool {
    let probe = probe_addr(bind_addr);
    matches!(
        timeout(INSTANCE_PROBE_TIMEOUT, TcpStream::connect(probe)).await,
        Ok(Ok(_))
    )
}

fn probe_addr(bind_addr: SocketAddr) -> SocketAddr {
    let ip = match bind_addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, bind_addr.port())
}

fn fatal_accept_error(address: SocketAddr, err: io::Error) -> anyhow::Error {
    error!(address = %address, error = %err, "accept failed; closing listener");
    anyhow!(err).context("failed to accept incoming connection")
}

fn is_descriptor_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == Errno::EMFILE as i32 || code == Errno::ENFILE as i32
    )
}

fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Raise the soft `RLIMIT_NOFILE` toward `target`, capped at the hard limit.
/// Never lowers the current soft limit. Returns the resulting soft limit.
#[cfg(unix)]
pub fn raise_open_file_limit(target: u64) -> Result<u64> {
    use nix::sys::resource::{Resource, getrlimit, setrlimit};

    let (soft, hard) =
        getrlimit(Resource::RLIMIT_NOFILE).context("failed to read RLIMIT_NOFILE")?;
    let desired = target.min(hard);
    if desired <= soft {
        return Ok(soft);
    }
    setrlimit(Resource::RLIMIT_NOFILE, desired, hard)
        .with_context(|| format!("failed to raise RLIMIT_NOFILE to {desired}"))?;
    Ok(desired)
}

#[cfg(not(unix))]
pub fn raise_open_file_limit(target: u64) -> Result<u64> {
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn probe_uses_loopback_for_unspecified_hosts() {
        let v4: SocketAddr = "0.0.0.0:8899".parse().unwrap();
        assert_eq!(probe_addr(v4), "127.0.0.1:8899".parse().unwrap());
        let v6: SocketAddr = "[::]:8899".parse().unwrap();
        assert_eq!(probe_addr(v6), "[::1]:8899".parse().unwrap());
        let fixed: SocketAddr = "10.1.2.3:80".parse().unwrap();
        assert_eq!(probe_addr(fixed), fixed);
    }

    #[test]
    fn classifies_accept_errors() {
        assert!(is_transient_accept_error(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
        assert!(!is_transient_accept_error(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
        assert!(is_descriptor_exhaustion(&io::Error::from_raw_os_error(
            Errno::EMFILE as i32
        )));
        assert!(!is_descriptor_exhaustion(&io::Error::from(
            io::ErrorKind::ConnectionReset
        )));
    }

    #[derive(Clone, Default)]
    struct BufferWriter {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buf.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn fatal_accept_error_is_logged() {
        let writer = BufferWriter::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();
        let address: SocketAddr = "127.0.0.1:3128".parse().unwrap();

        let err = tracing::subscriber::with_default(subscriber, || {
            fatal_accept_error(address, io::Error::from(io::ErrorKind::PermissionDenied))
        });

        let output = String::from_utf8(writer.buf.lock().unwrap().clone()).unwrap();
        assert!(output.contains("ERROR"), "{output}");
        assert!(output.contains("accept failed; closing listener"), "{output}");
        assert!(output.contains("127.0.0.1:3128"), "{output}");
        assert!(format!("{err:#}").starts_with("failed to accept incoming connection"));
    }

    #[cfg(unix)]
    #[test]
    fn open_file_limit_is_never_lowered() {
        let before = raise_open_file_limit(1).unwrap();
        assert!(before >= 1);
        let after = raise_open_file_limit(1).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn detects_running_instance() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        assert!(instance_running(addr).await);
        drop(listener);
        assert!(!instance_running(addr).await);
        Ok(())
    }
}
