//! Unix domain socket carrier, addressed by a filesystem path.
//!
//! A stale socket file left by a previous run is removed before binding, and
//! the file is removed again when the listener stops.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, instrument};

use crate::error::{ProtocolError, Result};
use crate::transport::stream::StreamConnection;
use crate::transport::{
    Acceptor, Connection, ConnectionHandler, Context, Endpoint, ListenerState, TransportOptions,
};
use crate::utils::timeout::with_timeout;

pub struct LocalContext {
    path: PathBuf,
    state: ListenerState,
}

impl LocalContext {
    pub fn new(path: impl Into<PathBuf>, options: TransportOptions) -> Self {
        Self {
            path: path.into(),
            state: ListenerState::new(options),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

struct LocalAcceptor {
    listener: UnixListener,
    path: PathBuf,
    options: TransportOptions,
}

#[async_trait]
impl Acceptor for LocalAcceptor {
    async fn accept(&mut self) -> Result<Box<dyn Connection>> {
        let (stream, _) = self.listener.accept().await?;
        debug!(path = %self.path.display(), "Accepted local connection");
        Ok(Box::new(StreamConnection::new(
            stream,
            Endpoint::Local(self.path.clone()),
            self.options,
        )))
    }

    async fn shutdown(&mut self) {
        if self.path.exists() {
            if let Err(e) = tokio::fs::remove_file(&self.path).await {
                error!(error = %e, path = %self.path.display(), "Failed to remove socket file");
            } else {
                info!(path = %self.path.display(), "Removed socket file");
            }
        }
    }
}

#[async_trait]
impl Context for LocalContext {
    #[instrument(skip(self, handler), fields(socket_path = %self.path.display()))]
    async fn listen(&self, handler: ConnectionHandler, blocking: bool) -> Result<()> {
        if self.path.exists() {
            tokio::fs::remove_file(&self.path).await.ok();
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let listener = UnixListener::bind(&self.path)?;
        self.state
            .set_local_endpoint(Some(Endpoint::Local(self.path.clone())));
        info!(path = %self.path.display(), "Listening on unix socket");

        let acceptor = LocalAcceptor {
            listener,
            path: self.path.clone(),
            options: self.state.options,
        };
        self.state.serve(acceptor, handler, blocking).await
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>> {
        let Endpoint::Local(path) = endpoint else {
            return Err(ProtocolError::TransportError(format!(
                "{endpoint} is not a local socket path"
            )));
        };
        let stream = with_timeout(self.state.options.connect_timeout, async {
            Ok(UnixStream::connect(path).await?)
        })
        .await?;
        debug!(path = %path.display(), "Connected to local socket");
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
