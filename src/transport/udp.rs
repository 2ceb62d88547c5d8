//! UDP carrier.
//!
//! A "connection" is the exchange with one peer address. The listener learns
//! its peer from the first datagram it receives and serves that peer until
//! the handler returns. Datagrams from anyone else meanwhile go to a bounded
//! backlog; the next accept serves the longest-waiting peer from it, with
//! that peer's queued datagrams in arrival order.
//! Datagrams are concatenated into a byte stream, so a packet may span
//! several of them. Delivery is not retried: a lost datagram surfaces as a
//! read timeout or an integrity failure.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;
use tracing::{debug, info, instrument, trace, warn};

use crate::core::buffer::ByteBuffer;
use crate::error::{ProtocolError, Result};
use crate::transport::{
    Acceptor, Connection, ConnectionHandler, Context, Endpoint, ListenerState, TransportOptions,
};
use crate::utils::timeout::with_timeout;

/// Largest datagram written
pub const MAX_DATAGRAM: usize = 8 * 1024;

const RECV_BUFFER: usize = 64 * 1024;

/// Datagrams held for waiting peers; the oldest is dropped beyond this
const BACKLOG_DATAGRAMS: usize = 256;

/// Datagrams from peers other than the one being served.
#[derive(Debug, Default)]
struct Backlog {
    queue: Mutex<VecDeque<(SocketAddr, Vec<u8>)>>,
}

impl Backlog {
    fn push(&self, from: SocketAddr, datagram: &[u8]) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.len() >= BACKLOG_DATAGRAMS {
            if let Some((dropped, _)) = queue.pop_front() {
                warn!(%dropped, "Datagram backlog full, dropped oldest");
            }
        }
        queue.push_back((from, datagram.to_vec()));
    }

    /// Remove the longest-waiting peer together with everything it queued.
    fn take_next_peer(&self) -> Option<(SocketAddr, BytesMut)> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let (peer, first) = queue.pop_front()?;
        let mut bytes = BytesMut::with_capacity(RECV_BUFFER.max(first.len()));
        bytes.put_slice(&first);
        queue.retain(|(from, datagram)| {
            if *from == peer {
                bytes.put_slice(datagram);
                false
            } else {
                true
            }
        });
        Some((peer, bytes))
    }

    fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub struct DatagramConnection {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    pending: BytesMut,
    backlog: Arc<Backlog>,
    options: TransportOptions,
}

impl DatagramConnection {
    fn new(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        pending: BytesMut,
        backlog: Arc<Backlog>,
        options: TransportOptions,
    ) -> Self {
        Self {
            socket,
            peer,
            pending,
            backlog,
            options,
        }
    }
}

#[async_trait]
impl Connection for DatagramConnection {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let socket = &self.socket;
        let peer = self.peer;
        with_timeout(self.options.io_timeout, async move {
            for part in data.chunks(MAX_DATAGRAM) {
                let sent = socket.send_to(part, peer).await?;
                if sent != part.len() {
                    return Err(ProtocolError::TransportError(format!(
                        "short datagram write: {sent} of {}",
                        part.len()
                    )));
                }
            }
            Ok(())
        })
        .await
    }

    async fn read(&mut self, len: usize) -> Result<ByteBuffer> {
        let socket = &self.socket;
        let peer = self.peer;
        let pending = &mut self.pending;
        let backlog = &self.backlog;
        with_timeout(self.options.io_timeout, async move {
            let mut datagram = vec![0u8; RECV_BUFFER];
            while pending.len() < len {
                let (n, from) = socket.recv_from(&mut datagram).await?;
                if from != peer {
                    trace!(%from, queued = backlog.len() + 1, "Queued datagram from another peer");
                    backlog.push(from, &datagram[..n]);
                    continue;
                }
                pending.put_slice(&datagram[..n]);
            }
            Ok(())
        })
        .await?;
        Ok(ByteBuffer::from(self.pending.split_to(len)))
    }

    async fn close(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }

    fn remote_address(&self) -> Endpoint {
        Endpoint::from(self.peer)
    }
}

pub struct UdpContext {
    bind: Endpoint,
    state: ListenerState,
}

impl UdpContext {
    pub fn new(bind: Endpoint, options: TransportOptions) -> Self {
        Self {
            bind,
            state: ListenerState::new(options),
        }
    }

    pub fn client(options: TransportOptions) -> Self {
        Self::new(Endpoint::inet("0.0.0.0", 0), options)
    }
}

struct UdpAcceptor {
    socket: Arc<UdpSocket>,
    backlog: Arc<Backlog>,
    options: TransportOptions,
}

#[async_trait]
impl Acceptor for UdpAcceptor {
    async fn accept(&mut self) -> Result<Box<dyn Connection>> {
        let (peer, pending) = match self.backlog.take_next_peer() {
            Some((peer, pending)) => {
                info!(%peer, bytes = pending.len(), "Serving queued datagram peer");
                (peer, pending)
            }
            None => {
                let mut datagram = vec![0u8; RECV_BUFFER];
                let (n, peer) = self.socket.recv_from(&mut datagram).await?;
                info!(%peer, "New datagram peer");
                (peer, BytesMut::from(&datagram[..n]))
            }
        };
        Ok(Box::new(DatagramConnection::new(
            self.socket.clone(),
            peer,
            pending,
            self.backlog.clone(),
            self.options,
        )))
    }
}

#[async_trait]
impl Context for UdpContext {
    #[instrument(skip(self, handler), fields(address = %self.bind))]
    async fn listen(&self, handler: ConnectionHandler, blocking: bool) -> Result<()> {
        let socket = UdpSocket::bind(self.bind.socket_addr_string()?).await?;
        let local = socket.local_addr()?;
        self.state.set_local_endpoint(Some(Endpoint::from(local)));
        info!(%local, "Listening on UDP");

        let acceptor = UdpAcceptor {
            socket: Arc::new(socket),
            backlog: Arc::new(Backlog::default()),
            options: self.state.options,
        };
        self.state.serve(acceptor, handler, blocking).await
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>> {
        let addr = endpoint.socket_addr_string()?;
        let socket = with_timeout(self.state.options.connect_timeout, async {
            let peer = tokio::net::lookup_host(&addr).await?.next().ok_or_else(|| {
                ProtocolError::TransportError(format!("{addr} did not resolve"))
            })?;
            let bind = if peer.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
            let socket = UdpSocket::bind(bind).await?;
            socket.connect(peer).await?;
            Ok(socket)
        })
        .await?;
        let peer = socket.peer_addr()?;
        debug!(%peer, "Connected over UDP");
        Ok(Box::new(DatagramConnection::new(
            Arc::new(socket),
            peer,
            BytesMut::with_capacity(RECV_BUFFER),
            Arc::new(Backlog::default()),
            self.state.options,
        )))
    }

    fn close(&self) {
        self.state.close();
    }

    fn abort_all(&self) {
        self.state.abort_all();
    }

    async fn wait(&self, limit: Option<Duration>) -> Result<()> {
        self.state.wait(limit).await
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        self.state.local_endpoint()
    }

    fn options(&self) -> TransportOptions {
        self.state.options
    }
}
