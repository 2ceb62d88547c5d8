//! # Service Layer
//!
//! The two ends of the protocol: a [`Server`] that serves any transport
//! context, and a [`Client`] that drives one connection.

pub mod client;
pub mod server;

pub use client::Client;
pub use server::{run, Server, Step};
