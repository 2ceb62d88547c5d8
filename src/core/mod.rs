//! # Core Protocol Components
//!
//! Byte buffers, packet framing and the two payload representations.
//!
//! ## Components
//! - **ByteBuffer**: bounds-checked byte container with big-endian typed access
//! - **Packet**: fixed header, payload and auth tag, sealed and opened with the session key
//! - **Codec**: Tokio codec for framing packets over byte streams
//! - **Serialization**: Binary and JSON payload encodings
//!
//! ## Wire Format
//! ```text
//! [Magic(8)] [Command(4)] [PayloadType(1)] [DataSize(8)] [Token(32)] [Nonce(8)] [IV(12)]
//! [Payload(DataSize)] [AuthTag(32)]
//! ```
//!
//! ## Security
//! - Magic is checked before anything else is interpreted
//! - Payload length is validated against the configured maximum before allocation
//! - Session packets are encrypted with AES-256-GCM and authenticated with HMAC-SHA256

pub mod buffer;
pub mod codec;
pub mod packet;
pub mod serialization;
