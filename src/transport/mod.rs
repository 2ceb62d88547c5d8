//! # Transport Layer
//!
//! One packet protocol over three carriers: TCP, UDP and a Unix domain socket.
//!
//! Every carrier implements [`Context`], which listens, accepts and connects,
//! and hands out [`Connection`]s, which read and write raw bytes. A context is
//! built with [`TransportOptions`]; `io_timeout: None` makes every read and
//! write block until it completes, `Some(d)` bounds each one by `d` and
//! surfaces expiry as an ordinary `TimedOut` I/O error.
//!
//! ## Scheduling
//! A listener serves one connection at a time: the accept loop awaits the
//! connection handler before accepting the next peer. Run several contexts to
//! serve several carriers at once.
//!
//! ## Shutdown
//! - [`Context::close`] stops accepting; the connection being served finishes.
//! - [`Context::abort_all`] also cancels the connection being served.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{DEFAULT_CHUNK_SIZE, MAX_PAYLOAD_SIZE};
use crate::core::buffer::ByteBuffer;
use crate::core::packet::{Header, Packet, HEADER_SIZE, MAGIC_LENGTH};
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::AUTH_TAG_LENGTH;
use crate::utils::timeout::{with_timeout, CONNECT_TIMEOUT};

#[cfg(unix)]
pub mod local;
pub mod stream;
pub mod tcp;
pub mod udp;

#[cfg(unix)]
pub use local::LocalContext;
pub use tcp::TcpContext;
pub use udp::UdpContext;

/// Where a context listens or a connection points.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Inet { address: String, port: u16 },
    Local(PathBuf),
}

impl Endpoint {
    pub fn inet(address: impl Into<String>, port: u16) -> Self {
        Endpoint::Inet {
            address: address.into(),
            port,
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Endpoint::Local(path.into())
    }

    /// Parse `host:port`.
    pub fn parse_inet(text: &str) -> Result<Self> {
        let (address, port) = text
            .rsplit_once(':')
            .ok_or_else(|| ProtocolError::ConfigError(format!("missing port in {text}")))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| ProtocolError::ConfigError(format!("bad port in {text}: {e}")))?;
        Ok(Self::inet(address.trim_matches(&['[', ']'][..]), port))
    }

    pub(crate) fn socket_addr_string(&self) -> Result<String> {
        match self {
            Endpoint::Inet { address, port } if address.contains(':') => {
                Ok(format!("[{address}]:{port}"))
            }
            Endpoint::Inet { address, port } => Ok(format!("{address}:{port}")),
            Endpoint::Local(path) => Err(ProtocolError::TransportError(format!(
                "{} is not a network endpoint",
                path.display()
            ))),
        }
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        Endpoint::inet(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Inet { address, port } => write!(f, "{address}:{port}"),
            Endpoint::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Timeouts and I/O granularity shared by every carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Bound on each read or write; `None` blocks.
    pub io_timeout: Option<Duration>,
    /// Bound on establishing an outbound connection; `None` blocks.
    pub connect_timeout: Option<Duration>,
    /// Bytes moved per socket call while streaming a large read or write.
    pub chunk_size: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            io_timeout: None,
            connect_timeout: Some(CONNECT_TIMEOUT),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TransportOptions {
    pub fn blocking() -> Self {
        Self {
            io_timeout: None,
            connect_timeout: None,
            ..Self::default()
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            io_timeout: Some(timeout),
            connect_timeout: Some(timeout),
            ..Self::default()
        }
    }
}

/// A byte pipe to one peer.
#[async_trait]
pub trait Connection: Send {
    /// Write all of `data`.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read exactly `len` bytes.
    async fn read(&mut self, len: usize) -> Result<ByteBuffer>;

    async fn close(&mut self) -> Result<()>;

    fn remote_address(&self) -> Endpoint;
}

/// Serves one accepted connection to completion.
pub type ConnectionHandler = Arc<dyn Fn(Box<dyn Connection>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`ConnectionHandler`].
pub fn handler<F, Fut>(f: F) -> ConnectionHandler
where
    F: Fn(Box<dyn Connection>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |conn| Box::pin(f(conn)))
}

/// A carrier: listens for peers and connects to them.
#[async_trait]
pub trait Context: Send + Sync {
    /// Bind and serve connections with `handler`.
    ///
    /// With `blocking` the call returns when the listener stops; otherwise it
    /// returns once bound and the accept loop runs on a background task.
    async fn listen(&self, handler: ConnectionHandler, blocking: bool) -> Result<()>;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>>;

    /// Stop accepting; the connection being served runs to completion.
    fn close(&self);

    /// Stop accepting and cancel the connection being served.
    fn abort_all(&self);

    /// Wait for a background listener to stop, at most `limit`.
    async fn wait(&self, limit: Option<Duration>) -> Result<()>;

    /// Bound address once listening.
    fn local_endpoint(&self) -> Option<Endpoint>;

    fn options(&self) -> TransportOptions;
}

/// Source of inbound connections for the shared accept loop.
#[async_trait]
pub(crate) trait Acceptor: Send + 'static {
    async fn accept(&mut self) -> Result<Box<dyn Connection>>;

    /// Release listener resources after the loop ends.
    async fn shutdown(&mut self) {}
}

/// Listener state common to every context.
pub(crate) struct ListenerState {
    pub(crate) options: TransportOptions,
    abort: CancellationToken,
    shutdown: Mutex<CancellationToken>,
    local: Mutex<Option<Endpoint>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerState {
    pub(crate) fn new(options: TransportOptions) -> Self {
        let abort = CancellationToken::new();
        let shutdown = abort.child_token();
        Self {
            options,
            abort,
            shutdown: Mutex::new(shutdown),
            local: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub(crate) fn local_endpoint(&self) -> Option<Endpoint> {
        self.local.lock().ok().and_then(|local| local.clone())
    }

    pub(crate) fn set_local_endpoint(&self, endpoint: Option<Endpoint>) {
        if let Ok(mut local) = self.local.lock() {
            *local = endpoint;
        }
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .map(|token| token.clone())
            .unwrap_or_else(|_| self.abort.child_token())
    }

    pub(crate) fn close(&self) {
        self.shutdown_token().cancel();
    }

    pub(crate) fn abort_all(&self) {
        self.abort.cancel();
    }

    /// Wait for a background accept loop to finish.
    pub(crate) async fn wait(&self, limit: Option<Duration>) -> Result<()> {
        let task = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(_) => None,
        };
        let Some(task) = task else {
            return Ok(());
        };
        with_timeout(limit, async {
            task.await
                .map_err(|e| ProtocolError::TransportError(format!("listener task failed: {e}")))
        })
        .await
    }

    /// Run the accept loop, in place or on a background task.
    pub(crate) async fn serve<A: Acceptor>(
        &self,
        acceptor: A,
        handler: ConnectionHandler,
        blocking: bool,
    ) -> Result<()> {
        if self.abort.is_cancelled() {
            return Err(ProtocolError::TransportError("context was aborted".into()));
        }
        let shutdown = {
            let mut guard = self
                .shutdown
                .lock()
                .map_err(|_| ProtocolError::TransportError("listener state poisoned".into()))?;
            if guard.is_cancelled() {
                *guard = self.abort.child_token();
            }
            guard.clone()
        };
        let abort = self.abort.clone();

        if blocking {
            accept_loop(acceptor, handler, shutdown, abort).await;
            return Ok(());
        }

        let task = tokio::spawn(accept_loop(acceptor, handler, shutdown, abort));
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(task);
        }
        Ok(())
    }
}

async fn accept_loop<A: Acceptor>(
    mut acceptor: A,
    handler: ConnectionHandler,
    shutdown: CancellationToken,
    abort: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = acceptor.accept() => accepted,
        };

        match accepted {
            Ok(conn) => {
                let peer = conn.remote_address();
                debug!(%peer, "Serving connection");
                tokio::select! {
                    _ = abort.cancelled() => {
                        warn!(%peer, "Connection aborted");
                        break;
                    }
                    _ = handler(conn) => {
                        debug!(%peer, "Connection finished");
                    }
                }
            }
            Err(e) if e.is_fatal() => {
                debug!(error = %e, "Dropped malformed inbound traffic");
            }
            Err(e) => {
                error!(error = %e, "Error accepting connection");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
        }
    }
    acceptor.shutdown().await;
    info!("Listener stopped");
}

/// Read one packet, rejecting a foreign magic before reading further.
pub async fn read_packet(conn: &mut dyn Connection, max_payload: usize) -> Result<Packet> {
    let magic = conn.read(MAGIC_LENGTH).await?;
    Header::check_magic(&magic)?;

    let rest = conn.read(HEADER_SIZE - MAGIC_LENGTH).await?;
    let mut header = magic;
    header.extend_from_slice(&rest);

    let data_size = Header::peek_data_size(&header)?;
    if data_size > max_payload.min(MAX_PAYLOAD_SIZE) as u64 {
        return Err(ProtocolError::OversizedPacket(data_size as usize));
    }

    let payload = conn.read(data_size as usize).await?;
    let tag = conn.read(AUTH_TAG_LENGTH).await?;
    let mut auth_tag = [0u8; AUTH_TAG_LENGTH];
    auth_tag.copy_from_slice(&tag);

    let packet = Packet::open(&header, payload, auth_tag)?;
    trace!(command = %packet.command(), bytes = packet.wire_len(), "Packet read");
    Ok(packet)
}

/// Write one sealed packet.
pub async fn write_packet(conn: &mut dyn Connection, packet: &Packet) -> Result<()> {
    conn.write(&packet.to_bytes()?).await?;
    trace!(command = %packet.command(), bytes = packet.wire_len(), "Packet written");
    Ok(())
}
