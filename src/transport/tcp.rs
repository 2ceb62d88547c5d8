//! TCP carrier.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::transport::stream::StreamConnection;
use crate::transport::{
    Acceptor, Connection, ConnectionHandler, Context, Endpoint, ListenerState, TransportOptions,
};
use crate::utils::timeout::with_timeout;

pub struct TcpContext {
    bind: Endpoint,
    state: ListenerState,
}

impl TcpContext {
    /// A context that listens on `bind` when asked to.
    pub fn new(bind: Endpoint, options: TransportOptions) -> Self {
        Self {
            bind,
            state: ListenerState::new(options),
        }
    }

    /// A context only used for outbound connections.
    pub fn client(options: TransportOptions) -> Self {
        Self::new(Endpoint::inet("0.0.0.0", 0), options)
    }
}

struct TcpAcceptor {
    listener: TcpListener,
    options: TransportOptions,
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&mut self) -> Result<Box<dyn Connection>> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        info!(peer = %addr, "New connection established");
        Ok(Box::new(StreamConnection::new(
            stream,
            Endpoint::from(addr),
            self.options,
        )))
    }
}

#[async_trait]
impl Context for TcpContext {
    #[instrument(skip(self, handler), fields(address = %self.bind))]
    async fn listen(&self, handler: ConnectionHandler, blocking: bool) -> Result<()> {
        let listener = TcpListener::bind(self.bind.socket_addr_string()?).await?;
        let local = listener.local_addr()?;
        self.state.set_local_endpoint(Some(Endpoint::from(local)));
        info!(%local, "Listening on TCP");

        let acceptor = TcpAcceptor {
            listener,
            options: self.state.options,
        };
        self.state.serve(acceptor, handler, blocking).await
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>> {
        let addr = endpoint.socket_addr_string()?;
        let stream = with_timeout(self.state.options.connect_timeout, async {
            Ok(TcpStream::connect(&addr).await?)
        })
        .await?;
        stream.set_nodelay(true)?;
        debug!(peer = %addr, "Connected over TCP");
        Ok(Box::new(StreamConnection::new(
            stream,
            endpoint.clone(),
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
