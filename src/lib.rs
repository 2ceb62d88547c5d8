//! # bot-socket
//!
//! Authenticated, replay-resistant remote control for a long-running chat bot.
//!
//! A client opens a session and receives a random 256-bit token. Every later
//! packet carries that token, a strictly increasing nonce, an AES-256-GCM
//! encrypted payload and an HMAC-SHA256 tag over header and payload. The same
//! packet protocol runs over TCP, UDP and a Unix domain socket.
//!
//! ## Layout
//! - [`core`]: byte buffer, packet framing, payload encodings
//! - [`protocol`]: commands, sessions, dispatch, file transfer
//! - [`transport`]: carriers with blocking and timeout-bounded I/O
//! - [`service`]: server and client
//! - [`utils`]: crypto, nonces, logging, metrics, timeouts
//!
//! ## Example
//! ```ignore
//! use std::sync::Arc;
//! use bot_socket::config::NetworkConfig;
//! use bot_socket::protocol::transfer::RealFs;
//! use bot_socket::service::{run, Server};
//!
//! let config = NetworkConfig::from_env()?;
//! bot_socket::utils::logging::init_logging(&config.logging)?;
//! let server = Server::from_config(&config)?
//!     .with_bot(Arc::new(MyBot::new()))?
//!     .with_vfs(Arc::new(RealFs::new()))?;
//! run(&config, server).await?;
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::packet::Packet;
pub use crate::core::serialization::PayloadType;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::command::Command;
