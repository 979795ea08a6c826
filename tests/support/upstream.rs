use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::read_until_double_crlf;

#[derive(Clone)]
enum UpstreamBehavior {
    Echo,
    HttpResponse {
        response: Arc<Vec<u8>>,
        close_after: bool,
    },
}

/// A request as the origin received it: head text and body bytes.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

/// Fake origin server bound to an ephemeral loopback port.
pub struct TestUpstream {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl TestUpstream {
    pub async fn echo() -> Result<Self> {
        Self::spawn(UpstreamBehavior::Echo).await
    }

    /// Answer each request with `response`, then close the connection.
    pub async fn http_response(response: impl Into<Vec<u8>>) -> Result<Self> {
        Self::spawn(UpstreamBehavior::HttpResponse {
            response: Arc::new(response.into()),
            close_after: true,
        })
        .await
    }

    /// Answer each request with `response` and keep the connection open until
    /// the proxy closes it.
    pub async fn http_response_keep_open(response: impl Into<Vec<u8>>) -> Result<Self> {
        Self::spawn(UpstreamBehavior::HttpResponse {
            response: Arc::new(response.into()),
            close_after: false,
        })
        .await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn spawn(behavior: UpstreamBehavior) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let behavior = behavior.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(&mut stream, behavior, recorded).await;
                });
            }
        });
        Ok(Self {
            addr,
            requests,
            handle,
        })
    }
}

impl Drop for TestUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: &mut TcpStream,
    behavior: UpstreamBehavior,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) -> Result<()> {
    match behavior {
        UpstreamBehavior::Echo => {
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        }
        UpstreamBehavior::HttpResponse {
            response,
            close_after,
        } => {
            let head = read_until_double_crlf(stream).await?;
            let length = content_length(&head);
            let mut body = vec![0u8; length];
            stream.read_exact(&mut body).await?;
            recorded.lock().unwrap().push(RecordedRequest { head, body });

            stream.write_all(&response).await?;
            if close_after {
                stream.shutdown().await.ok();
            } else {
                let mut sink = [0u8; 256];
                while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
            }
        }
    }
    Ok(())
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}
