//! Timeout helpers shared by every transport.
//!
//! An operation runs in one of two modes. With `None` it blocks until it
//! completes or the peer goes away. With `Some(duration)` it is raced against
//! a timer; on expiry the pending operation is dropped (which cancels the
//! underlying socket call) and the caller sees an ordinary
//! [`std::io::ErrorKind::TimedOut`] I/O failure.

use std::future::Future;
use std::io;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default per-operation bound for server-side connections
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on establishing an outbound connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for listeners to wind down
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut` to completion, bounded by `limit` when one is given.
pub async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        None => fut.await,
        Some(limit) => with_timeout_error(fut, limit).await,
    }
}

/// Run `fut` with a hard bound, mapping expiry to a `TimedOut` I/O error.
pub async fn with_timeout_error<F, T>(fut: F, limit: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("operation did not complete within {}ms", limit.as_millis()),
        ))),
    }
}
