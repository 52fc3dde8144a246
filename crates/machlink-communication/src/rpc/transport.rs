//! RPC transport
//!
//! A transport carries [`Request`]s to the controller and brings back the
//! matching [`Response`]. It knows nothing about statuses or memory areas;
//! validation happens in [`super::connection::RpcConnection`].

use async_trait::async_trait;
use machlink_core::{ConnectionError, Error, ProtocolError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::protocol::{Request, Response};

/// Session-oriented request/response channel to the controller
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Open the session
    async fn connect(&self) -> Result<()>;

    /// Close the session; a no-op when already closed
    async fn disconnect(&self);

    /// Whether a session is open
    fn is_connected(&self) -> bool;

    /// Send one request and wait for its response
    async fn call(&self, request: Request) -> Result<Response>;
}

struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Newline-delimited JSON over TCP
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    session: Mutex<Option<Session>>,
    connected: AtomicBool,
}

impl TcpTransport {
    /// Transport to `host:port`; nothing is opened until `connect`
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
            session: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn exchange(session: &mut Session, request: &Request) -> Result<Response> {
        let mut line = serde_json::to_string(request).map_err(|e| {
            Error::Protocol(ProtocolError::MalformedResponse {
                operation: request.method.clone(),
                reason: e.to_string(),
            })
        })?;
        line.push('\n');
        session
            .writer
            .write_all(line.as_bytes())
            .await
            .map_err(ConnectionError::from)?;
        session.writer.flush().await.map_err(ConnectionError::from)?;

        let mut buffer = String::new();
        loop {
            buffer.clear();
            let read = session
                .reader
                .read_line(&mut buffer)
                .await
                .map_err(ConnectionError::from)?;
            if read == 0 {
                return Err(ConnectionError::Lost {
                    reason: "controller closed the session".to_string(),
                }
                .into());
            }
            let response: Response = serde_json::from_str(buffer.trim()).map_err(|e| {
                Error::Protocol(ProtocolError::MalformedResponse {
                    operation: request.method.clone(),
                    reason: e.to_string(),
                })
            })?;
            // Answers to calls abandoned by a caller timeout arrive late.
            if response.id == request.id {
                return Ok(response);
            }
            tracing::debug!(
                expected = request.id,
                received = response.id,
                "Skipping stale response"
            );
        }
    }
}

#[async_trait]
impl RpcTransport for TcpTransport {
    async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let endpoint = self.endpoint();
        tracing::info!(endpoint = %endpoint, "Opening controller session");
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ConnectionError::Refused {
                    endpoint,
                    reason: e.to_string(),
                }
                .into())
            }
            Err(_) => {
                return Err(ConnectionError::Timeout {
                    timeout_ms: self.connect_timeout.as_millis() as u64,
                }
                .into())
            }
        };
        stream.set_nodelay(true).map_err(ConnectionError::from)?;

        let (reader, writer) = stream.into_split();
        *session = Some(Session {
            reader: BufReader::new(reader),
            writer,
        });
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(mut closed) = session.take() {
            let _ = closed.writer.shutdown().await;
            tracing::info!(endpoint = %self.endpoint(), "Controller session closed");
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(ConnectionError::NotConnected)?;

        let result = Self::exchange(session, &request).await;
        if let Err(Error::Connection(e)) = &result {
            tracing::warn!(endpoint = %self.endpoint(), "Dropping controller session: {}", e);
            *guard = None;
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }
}
