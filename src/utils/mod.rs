//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, nonces, and timing.
//!
//! ## Components
//! - **Crypto**: AES-256-GCM payload encryption and HMAC-SHA256 packet integrity
//! - **Nonce**: Monotonic, time-anchored nonce generation for anti-replay
//! - **Logging**: `tracing-subscriber` configuration
//! - **Timeout**: Optional-timeout wrappers used by every transport
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Key material zeroed on drop (zeroize crate)
//! - Constant-time tag comparison

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod nonce;
pub mod timeout;

pub use crypto::{Crypto, SessionToken, NO_SESSION};
pub use metrics::{Metrics, MetricsSnapshot};
pub use nonce::NonceGenerator;
