//! # Server
//!
//! Owns everything a listener needs: the session table, the dispatcher with
//! its registered handlers, a nonce source and metrics. Nothing is global; a
//! process may run several independent servers.
//!
//! ## Connection loop
//! 1. Read one packet. A disconnect ends the loop quietly; an integrity
//!    violation ends it and is counted.
//! 2. `OpenSession` is answered with a fresh grant.
//! 3. Every other packet must carry a live session and a fresh nonce.
//! 4. `CloseSession` removes the session and ends the connection unanswered.
//! 5. Anything else is dispatched and its reply, if any, written back.
//!
//! Packets on one connection are handled strictly in order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::config::{NetworkConfig, ServerConfig, TransportConfig};
use crate::core::packet::Packet;
use crate::error::Result;
use crate::protocol::command::Command;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handlers::{register_bot_commands, register_builtin_commands, BotApi};
use crate::protocol::handshake::server_open_session;
use crate::protocol::session::SessionManager;
use crate::protocol::transfer::{register_transfer_commands, TransferRegistry, Vfs};
use crate::transport::{
    handler, read_packet, write_packet, Connection, ConnectionHandler, Context, Endpoint,
    TcpContext, TransportOptions, UdpContext,
};
use crate::utils::metrics::Metrics;
use crate::utils::nonce::NonceGenerator;
use crate::utils::timeout::CONNECT_TIMEOUT;

/// What the connection loop does after a packet.
#[derive(Debug)]
pub enum Step {
    Reply(Option<Packet>),
    Close,
}

struct ServerInner {
    sessions: Arc<SessionManager>,
    dispatcher: Dispatcher,
    nonces: Arc<NonceGenerator>,
    metrics: Arc<Metrics>,
    max_payload: usize,
    max_transfer_size: u64,
    started: Instant,
}

#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
    transfers: Option<Arc<TransferRegistry>>,
}

impl Server {
    /// A server with the built-in commands registered.
    pub fn new(server: &ServerConfig, transport: &TransportConfig) -> Result<Self> {
        let nonces = Arc::new(NonceGenerator::new());
        let dispatcher = Dispatcher::with_nonces(nonces.clone());
        let started = Instant::now();
        register_builtin_commands(&dispatcher, started)?;

        Ok(Self {
            inner: Arc::new(ServerInner {
                sessions: Arc::new(SessionManager::new(server.session_ttl, server.max_sessions)),
                dispatcher,
                nonces,
                metrics: Arc::new(Metrics::new()),
                max_payload: transport.max_payload_size,
                max_transfer_size: server.max_transfer_size,
                started,
            }),
            transfers: None,
        })
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        Self::new(&config.server, &config.transport)
    }

    /// Forward chat commands to `bot`.
    pub fn with_bot(self, bot: Arc<dyn BotApi>) -> Result<Self> {
        register_bot_commands(&self.inner.dispatcher, bot)?;
        Ok(self)
    }

    /// Serve file transfers through `vfs`.
    pub fn with_vfs(mut self, vfs: Arc<dyn Vfs>) -> Result<Self> {
        let transfers = register_transfer_commands(
            &self.inner.dispatcher,
            vfs,
            &self.inner.sessions,
            self.inner.max_transfer_size,
        )?;
        self.transfers = Some(transfers);
        Ok(self)
    }

    /// For registering additional commands.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn transfers(&self) -> Option<&TransferRegistry> {
        self.transfers.as_deref()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.inner.started.elapsed()
    }

    /// Decide what to do with one opened packet.
    pub fn handle_packet(&self, packet: &Packet) -> Result<Step> {
        let inner = &self.inner;
        let command = packet.command();

        if command == Command::OpenSession {
            let reply = server_open_session(&inner.sessions, packet, inner.nonces.next_nonce())?;
            inner.metrics.session_opened();
            return Ok(Step::Reply(Some(reply)));
        }

        inner
            .sessions
            .verify(&packet.header.session_token, packet.header.nonce)?;

        if command == Command::CloseSession {
            if inner.sessions.close(&packet.header.session_token) {
                inner.metrics.session_closed();
            }
            return Ok(Step::Close);
        }

        inner.metrics.command_dispatched();
        Ok(Step::Reply(inner.dispatcher.dispatch(packet)?))
    }

    /// Serve one connection until the peer leaves or misbehaves.
    #[instrument(skip_all, fields(peer = %conn.remote_address()))]
    pub async fn serve_connection(&self, mut conn: Box<dyn Connection>) {
        let metrics = &self.inner.metrics;
        metrics.connection_established();

        loop {
            let packet = match read_packet(conn.as_mut(), self.inner.max_payload).await {
                Ok(packet) => packet,
                Err(e) if e.is_disconnect() => {
                    debug!("Peer disconnected");
                    break;
                }
                Err(e) => {
                    if e.is_fatal() {
                        metrics.record_rejection(&e);
                        warn!(error = %e, "Rejected packet, dropping connection");
                    } else {
                        warn!(error = %e, "Read failed, dropping connection");
                    }
                    break;
                }
            };
            metrics.packet_received(packet.wire_len() as u64);

            match self.handle_packet(&packet) {
                Ok(Step::Reply(Some(reply))) => {
                    if let Err(e) = write_packet(conn.as_mut(), &reply).await {
                        warn!(error = %e, "Write failed, dropping connection");
                        break;
                    }
                    metrics.packet_sent(reply.wire_len() as u64);
                }
                Ok(Step::Reply(None)) => {}
                Ok(Step::Close) => {
                    debug!("Session closed by peer");
                    break;
                }
                Err(e) => {
                    metrics.record_rejection(&e);
                    warn!(command = %packet.command(), error = %e, "Rejected packet, dropping connection");
                    break;
                }
            }
        }

        if let Err(e) = conn.close().await {
            debug!(error = %e, "Error closing connection");
        }
        metrics.connection_closed();
    }

    pub fn connection_handler(&self) -> ConnectionHandler {
        let server = self.clone();
        handler(move |conn| {
            let server = server.clone();
            async move { server.serve_connection(conn).await }
        })
    }

    /// Purge expired sessions every `period` until the task is aborted.
    pub fn spawn_session_sweep(&self, period: Duration) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = inner.sessions.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = inner.sessions.len(), "Swept expired sessions");
                }
            }
        })
    }

    /// Serve `context` with this server's connection loop.
    pub async fn listen(&self, context: &dyn Context, blocking: bool) -> Result<()> {
        context.listen(self.connection_handler(), blocking).await
    }
}

/// Transport options for accepted connections.
pub fn server_transport_options(config: &NetworkConfig) -> TransportOptions {
    TransportOptions {
        io_timeout: config.server.io_timeout,
        connect_timeout: Some(CONNECT_TIMEOUT),
        chunk_size: config.transport.stream_chunk_size,
    }
}

/// Run a server on every configured carrier until Ctrl-C.
pub async fn run(config: &NetworkConfig, server: Server) -> Result<()> {
    config.validate_strict()?;
    let options = server_transport_options(config);

    #[allow(unused_mut)]
    let mut contexts: Vec<Box<dyn Context>> = vec![
        Box::new(TcpContext::new(
            Endpoint::parse_inet(&config.server.tcp_address)?,
            options,
        )),
        Box::new(UdpContext::new(
            Endpoint::parse_inet(&config.server.udp_address)?,
            options,
        )),
    ];
    #[cfg(unix)]
    contexts.push(Box::new(crate::transport::LocalContext::new(
        config.server.local_socket_path.clone(),
        options,
    )));

    for context in &contexts {
        server.listen(context.as_ref(), false).await?;
    }
    let sweep = server.spawn_session_sweep(session_sweep_period(config.server.session_ttl));
    info!(listeners = contexts.len(), "Server running");

    tokio::signal::ctrl_c().await?;
    info!("Received CTRL+C signal, shutting down");

    for context in &contexts {
        context.close();
    }
    for context in &contexts {
        if let Err(e) = context.wait(Some(config.server.shutdown_timeout)).await {
            warn!(error = %e, "Listener did not stop in time, aborting");
            context.abort_all();
        }
    }
    sweep.abort();
    server.metrics().log_metrics();
    Ok(())
}

/// Half the session TTL, capped at a minute.
fn session_sweep_period(ttl: Duration) -> Duration {
    (ttl / 2).clamp(Duration::from_secs(1), Duration::from_secs(60))
}
