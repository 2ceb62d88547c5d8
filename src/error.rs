//! # Error Types
//!
//! Error handling for the bot control protocol.
//!
//! Every fallible operation in the crate returns [`Result<T>`], whose error
//! side is [`ProtocolError`]. The variants fall into three families that the
//! server treats differently:
//!
//! ## Error Categories
//! - **Integrity violations**: bad magic, missing session, HMAC or cipher tag
//!   mismatch, replayed nonce. The connection is dropped immediately.
//! - **Command failures**: invalid argument, ignored command, runtime or
//!   backend failure. Converted into a `GenericAck` and the connection stays open.
//! - **Transport failures**: socket errors and expired timeouts, surfaced as
//!   [`ProtocolError::Io`] so callers decide whether to reconnect.
//!
//! ## Example Usage
//! ```rust
//! use bot_socket::error::{ProtocolError, Result};
//! use bot_socket::protocol::message::AckType;
//!
//! fn check_chat(chat: i64) -> Result<()> {
//!     if chat == 0 {
//!         return Err(ProtocolError::InvalidArgument("chat id must be set".into()));
//!     }
//!     Ok(())
//! }
//!
//! let err = check_chat(0).unwrap_err();
//! assert_eq!(err.ack_type(), AckType::InvalidArgument);
//! assert!(!err.is_fatal());
//! ```

use std::io;
use thiserror::Error;

use crate::protocol::message::AckType;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Framing errors
    pub const ERR_SHORT_HEADER: &str = "Header shorter than the fixed header size";
    pub const ERR_SHORT_PACKET: &str = "Packet shorter than header, payload and tag";
    pub const ERR_TRAILING_BYTES: &str = "Trailing bytes after auth tag";

    /// Session errors
    pub const ERR_NO_SESSION: &str = "Command requires an open session";
    pub const ERR_UNKNOWN_SESSION: &str = "Unknown session token";
    pub const ERR_EXPIRED_SESSION: &str = "Session expired";

    /// Payload errors
    pub const ERR_PAYLOAD_SIZE: &str = "Payload size does not match the command";
    pub const ERR_STRING_TOO_LONG: &str = "String does not fit its fixed-width field";
    pub const ERR_PATH_OUTSIDE_ROOT: &str = "Path leaves the filesystem root";

    /// Security errors
    pub const ERR_RANDOM_SOURCE: &str = "Operating system random source unavailable";
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Incompatible peer: magic {magic:#x} is not this protocol's version")]
    IncompatiblePeer { magic: i64 },

    #[error("Invalid protocol header: {0}")]
    InvalidHeader(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Integrity check failed")]
    IntegrityFailure,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Replay detected: nonce {nonce} is not above {last_nonce}")]
    ReplayDetected { nonce: u64, last_nonce: u64 },

    #[error("Out of bounds: offset {offset} + size {size} exceeds length {len}")]
    OutOfBounds { offset: isize, size: usize, len: usize },

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Unknown payload type: {0}")]
    InvalidPayloadType(u8),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Command ignored: {0}")]
    CommandIgnored(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Errors that must terminate the connection they were observed on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::IncompatiblePeer { .. }
                | ProtocolError::InvalidHeader(_)
                | ProtocolError::Unauthenticated(_)
                | ProtocolError::IntegrityFailure
                | ProtocolError::DecryptionFailure
                | ProtocolError::ReplayDetected { .. }
                | ProtocolError::OversizedPacket(_)
                | ProtocolError::InvalidPayloadType(_)
                | ProtocolError::OutOfBounds { .. }
        )
    }

    /// True when the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Ack classification for command-level failures.
    pub fn ack_type(&self) -> AckType {
        match self {
            ProtocolError::InvalidArgument(_)
            | ProtocolError::DeserializeError(_)
            | ProtocolError::InvalidPayloadType(_)
            | ProtocolError::OutOfBounds { .. } => AckType::InvalidArgument,
            ProtocolError::CommandIgnored(_) => AckType::CommandIgnored,
            ProtocolError::Backend(_) => AckType::BackendError,
            _ => AckType::RuntimeError,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            ProtocolError::SerializeError(e.to_string())
        } else {
            ProtocolError::DeserializeError(e.to_string())
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_errors_are_fatal() {
        assert!(ProtocolError::IntegrityFailure.is_fatal());
        assert!(ProtocolError::ReplayDetected {
            nonce: 1,
            last_nonce: 1
        }
        .is_fatal());
        assert!(!ProtocolError::InvalidArgument("x".into()).is_fatal());
        assert!(!ProtocolError::Runtime("x".into()).is_fatal());
    }

    #[test]
    fn timeouts_are_plain_io_failures() {
        let err = ProtocolError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow peer"));
        assert!(!err.is_fatal());
        assert!(!err.is_disconnect());
        assert_eq!(err.ack_type(), AckType::RuntimeError);
    }

    #[test]
    fn eof_is_a_disconnect() {
        let err = ProtocolError::Io(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(err.is_disconnect());
        assert!(ProtocolError::ConnectionClosed.is_disconnect());
    }

    #[test]
    fn command_errors_map_to_ack_types() {
        assert_eq!(
            ProtocolError::CommandIgnored("dup".into()).ack_type(),
            AckType::CommandIgnored
        );
        assert_eq!(
            ProtocolError::Backend("api down".into()).ack_type(),
            AckType::BackendError
        );
    }
}
