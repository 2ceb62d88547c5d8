//! [`Connection`] over any ordered byte stream (TCP, Unix socket).

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::core::buffer::ByteBuffer;
use crate::error::Result;
use crate::transport::{Connection, Endpoint, TransportOptions};
use crate::utils::timeout::with_timeout;

pub struct StreamConnection<S> {
    stream: S,
    peer: Endpoint,
    options: TransportOptions,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: Endpoint, options: TransportOptions) -> Self {
        Self {
            stream,
            peer,
            options,
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn chunk_size(&self) -> usize {
        self.options.chunk_size.max(1)
    }
}

#[async_trait]
impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let chunk = self.chunk_size();
        let limit = self.options.io_timeout;
        let stream = &mut self.stream;
        with_timeout(limit, async move {
            let mut sent = 0;
            for part in data.chunks(chunk) {
                stream.write_all(part).await?;
                sent += part.len();
                trace!(sent, total = data.len(), "Write progress");
            }
            stream.flush().await?;
            Ok(())
        })
        .await
    }

    async fn read(&mut self, len: usize) -> Result<ByteBuffer> {
        let mut buffer = ByteBuffer::alloc(len);
        if len == 0 {
            return Ok(buffer);
        }
        let chunk = self.chunk_size();
        let limit = self.options.io_timeout;
        let stream = &mut self.stream;
        let target = buffer.as_mut_slice();
        with_timeout(limit, async move {
            let mut received = 0;
            for part in target.chunks_mut(chunk) {
                match stream.read_exact(part).await {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("peer closed after {received} of {len} bytes"),
                        )
                        .into());
                    }
                    Err(e) => return Err(e.into()),
                }
                received += part.len();
                trace!(received, total = len, "Read progress");
            }
            Ok(())
        })
        .await?;
        Ok(buffer)
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn remote_address(&self) -> Endpoint {
        self.peer.clone()
    }
}
