use std::fmt;
use std::io;
use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Client,
    Server,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::Client => f.write_str("client"),
            ConnectionRole::Server => f.write_str("server"),
        }
    }
}

/// Outcome of a single non-blocking read.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Data(Vec<u8>),
    /// The socket had nothing to read despite signalling readiness.
    Pending,
    /// Orderly shutdown by the peer, or a read error.
    Closed,
}

/// One side of a tunnel: a socket plus the bytes still waiting to be written
/// to it.
///
/// Reads and writes are single non-blocking attempts. The owner decides when
/// to call them, normally after [`BufferedConnection::ready`] reports the
/// socket readable or writable.
#[derive(Debug)]
pub struct BufferedConnection {
    stream: Option<TcpStream>,
    role: ConnectionRole,
    peer: SocketAddr,
    buffer: BytesMut,
}

impl BufferedConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr, role: ConnectionRole) -> Self {
        Self {
            stream: Some(stream),
            role,
            peer,
            buffer: BytesMut::new(),
        }
    }

    pub fn client(stream: TcpStream, peer: SocketAddr) -> Self {
        Self::new(stream, peer, ConnectionRole::Client)
    }

    pub fn server(stream: TcpStream, peer: SocketAddr) -> Self {
        Self::new(stream, peer, ConnectionRole::Server)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Always readable; writable only while output is queued.
    pub fn interest(&self) -> Interest {
        if self.has_pending() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    pub async fn ready(&self, interest: Interest) -> io::Result<Ready> {
        match &self.stream {
            Some(stream) => stream.ready(interest).await,
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Read up to `max` bytes. I/O errors are logged and reported as
    /// [`Received::Closed`].
    pub fn receive(&mut self, max: usize) -> Received {
        let Some(stream) = self.stream.as_ref() else {
            return Received::Closed;
        };
        let mut buf = vec![0u8; max];
        match stream.try_read(&mut buf) {
            Ok(0) => {
                debug!(role = %self.role, peer = %self.peer, "peer closed connection");
                Received::Closed
            }
            Ok(read) => {
                buf.truncate(read);
                Received::Data(buf)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Received::Pending,
            Err(err) => {
                warn!(role = %self.role, peer = %self.peer, error = %err, "read failed");
                Received::Closed
            }
        }
    }

    pub fn queue(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// One write attempt. Removes exactly the bytes the socket accepted and
    /// returns that count; a socket that would block accepts zero.
    pub fn flush(&mut self) -> io::Result<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let Some(stream) = self.stream.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        match stream.try_write(&self.buffer) {
            Ok(written) => {
                self.buffer.advance(written);
                Ok(written)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(err),
        }
    }

    /// Release the socket. Calling this again is a no-op.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(role = %self.role, peer = %self.peer, "closed connection");
        }
    }
}
