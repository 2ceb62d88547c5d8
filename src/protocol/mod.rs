//! # Protocol Layer
//!
//! Commands, their payloads, and the server-side machinery that accepts them.
//!
//! ## Components
//! - **Command**: command ids and their self-documentation
//! - **Message**: typed payloads in Binary and JSON form
//! - **Session**: session table with nonce anti-replay
//! - **Handshake**: session open and close exchanges
//! - **Dispatcher**: routes opened packets to handlers
//! - **Handlers**: bot-facing and built-in commands
//! - **Transfer**: file upload and download through a VFS

pub mod command;
pub mod dispatcher;
pub mod handlers;
pub mod handshake;
pub mod message;
pub mod session;
pub mod transfer;
