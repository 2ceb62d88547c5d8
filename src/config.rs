//! # Configuration
//!
//! Wire constants shared by every peer, and the settings a server or client
//! is started with: listen endpoints for the three carriers, per-operation
//! timeouts, session lifetime and logging.
//!
//! Settings come from a TOML file ([`NetworkConfig::from_file`]), from
//! `BOT_SOCKET_*` environment variables ([`NetworkConfig::from_env`]) or from
//! code. Every section and every key may be omitted; missing ones take their
//! defaults.
//!
//! Durations are written as integer milliseconds. An I/O timeout of `0`
//! selects the blocking mode of a carrier, any other value the
//! timeout-bounded mode.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;

/// Base value of the header magic; the protocol version is added to it.
pub const MAGIC_BASE: i64 = 0xDEAD_FACE;

pub const PROTOCOL_VERSION: i64 = 13;

/// Header magic spoken by this build
pub const MAGIC: i64 = MAGIC_BASE + PROTOCOL_VERSION;

/// Largest payload accepted from the wire (64 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Fixed width of path fields on the wire
pub const MAX_PATH_SIZE: usize = 256;

/// Fixed width of message fields on the wire
pub const MAX_MSG_SIZE: usize = 256;

pub const DEFAULT_TCP_PORT: u16 = 50000;

pub const DEFAULT_UDP_PORT: u16 = 50001;

/// Bytes moved per read or write call on stream carriers
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Largest file a chunked upload may declare (256 MiB)
pub const DEFAULT_MAX_TRANSFER_SIZE: u64 = 256 * 1024 * 1024;

/// File name of the local socket inside the temp directory
pub const LOCAL_SOCKET_NAME: &str = "bot-socket.sock";

pub fn default_local_socket_path() -> PathBuf {
    std::env::temp_dir().join(LOCAL_SOCKET_NAME)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults, overridden by whichever `BOT_SOCKET_*` variables are set.
    ///
    /// | Variable | Field |
    /// | --- | --- |
    /// | `BOT_SOCKET_TCP_ADDRESS` | `server.tcp_address` |
    /// | `BOT_SOCKET_UDP_ADDRESS` | `server.udp_address` |
    /// | `BOT_SOCKET_LOCAL_PATH` | `server.local_socket_path` |
    /// | `BOT_SOCKET_CLIENT_ADDRESS` | `client.address` |
    /// | `BOT_SOCKET_IO_TIMEOUT_MS` | `server.io_timeout` and `client.io_timeout` (`0` blocks) |
    /// | `BOT_SOCKET_SESSION_TTL_SECS` | `server.session_ttl` |
    /// | `BOT_SOCKET_MAX_TRANSFER_SIZE` | `server.max_transfer_size` |
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = env_var("BOT_SOCKET_TCP_ADDRESS") {
            config.server.tcp_address = addr;
        }
        if let Some(addr) = env_var("BOT_SOCKET_UDP_ADDRESS") {
            config.server.udp_address = addr;
        }
        if let Some(path) = env_var("BOT_SOCKET_LOCAL_PATH") {
            config.server.local_socket_path = PathBuf::from(path);
        }
        if let Some(addr) = env_var("BOT_SOCKET_CLIENT_ADDRESS") {
            config.client.address = addr;
        }
        if let Some(ms) = env_number("BOT_SOCKET_IO_TIMEOUT_MS")? {
            let limit = Some(Duration::from_millis(ms)).filter(|d| !d.is_zero());
            config.server.io_timeout = limit;
            config.client.io_timeout = limit;
        }
        if let Some(secs) = env_number("BOT_SOCKET_SESSION_TTL_SECS")? {
            config.server.session_ttl = Duration::from_secs(secs);
        }
        if let Some(bytes) = env_number("BOT_SOCKET_MAX_TRANSFER_SIZE")? {
            config.server.max_transfer_size = bytes;
        }

        Ok(config)
    }

    /// Defaults with `edit` applied.
    pub fn default_with_overrides<F>(edit: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        edit(&mut config);
        config
    }

    /// The default configuration rendered as TOML.
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Cannot render config: {e}")))?;
        std::fs::write(path, text).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot write {}: {e}", path.display()))
        })
    }

    /// Every problem found, one message each; empty when usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = self.server.validate();
        problems.append(&mut self.client.validate());
        problems.append(&mut self.transport.validate());
        problems.append(&mut self.logging.validate());
        problems
    }

    pub fn validate_strict(&self) -> Result<()> {
        let problems = self.validate();
        if problems.is_empty() {
            return Ok(());
        }
        Err(ProtocolError::ConfigError(format!(
            "Invalid configuration:\n  - {}",
            problems.join("\n  - ")
        )))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_number(name: &str) -> Result<Option<u64>> {
    env_var(name)
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map_err(|e| ProtocolError::ConfigError(format!("{name}: {e}")))
        })
        .transpose()
}

fn check_socket_addr(problems: &mut Vec<String>, what: &str, address: &str, example: &str) {
    if address.is_empty() {
        problems.push(format!("{what} address cannot be empty"));
    } else if address.parse::<std::net::SocketAddr>().is_err() {
        problems.push(format!(
            "Invalid {what} address format: '{address}' (expected e.g. '{example}')"
        ));
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Stream listener, e.g. `0.0.0.0:50000`
    pub tcp_address: String,

    /// Datagram listener, e.g. `0.0.0.0:50001`
    pub udp_address: String,

    pub local_socket_path: PathBuf,

    /// Bound on each read and write of an accepted connection
    #[serde(with = "opt_millis")]
    pub io_timeout: Option<Duration>,

    /// Idle lifetime of a session; activity restarts it
    #[serde(with = "millis")]
    pub session_ttl: Duration,

    pub max_sessions: usize,

    /// Largest `total_size` a chunked upload may announce, in bytes
    pub max_transfer_size: u64,

    /// Grace period for listeners to finish before they are aborted
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_address: format!("0.0.0.0:{DEFAULT_TCP_PORT}"),
            udp_address: format!("0.0.0.0:{DEFAULT_UDP_PORT}"),
            local_socket_path: default_local_socket_path(),
            io_timeout: Some(timeout::DEFAULT_TIMEOUT),
            session_ttl: DEFAULT_SESSION_TTL,
            max_sessions: 1024,
            max_transfer_size: DEFAULT_MAX_TRANSFER_SIZE,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        check_socket_addr(&mut problems, "server TCP", &self.tcp_address, "0.0.0.0:50000");
        check_socket_addr(&mut problems, "server UDP", &self.udp_address, "0.0.0.0:50001");

        if self.local_socket_path.as_os_str().is_empty() {
            problems.push("Local socket path cannot be empty".to_string());
        }
        if matches!(self.io_timeout, Some(t) if t < Duration::from_millis(100)) {
            problems.push("Server I/O timeout too short (minimum: 100ms)".to_string());
        }

        match self.session_ttl.as_secs() {
            0 => problems.push("Session TTL too short (minimum: 1s)".to_string()),
            s if s > 7 * 24 * 3600 => {
                problems.push("Session TTL too long (maximum: 7 days)".to_string())
            }
            _ => {}
        }

        if self.max_sessions == 0 {
            problems.push("Max sessions must be greater than 0".to_string());
        }
        if self.max_transfer_size == 0 {
            problems.push("Max transfer size must be greater than 0".to_string());
        }

        match self.shutdown_timeout.as_secs() {
            0 => problems.push("Shutdown timeout too short (minimum: 1s)".to_string()),
            s if s > 60 => problems.push("Shutdown timeout too long (maximum: 60s)".to_string()),
            _ => {}
        }

        problems
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server to connect to
    pub address: String,

    #[serde(with = "millis")]
    pub connect_timeout: Duration,

    /// Bound on each read and write; `None` blocks
    #[serde(with = "opt_millis")]
    pub io_timeout: Option<Duration>,

    /// Chunk size of chunked uploads
    pub transfer_chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_TCP_PORT}"),
            connect_timeout: timeout::CONNECT_TIMEOUT,
            io_timeout: None,
            transfer_chunk_size: 1024 * 1024,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        check_socket_addr(&mut problems, "client", &self.address, "127.0.0.1:50000");

        if self.connect_timeout < Duration::from_millis(100) {
            problems.push("Connect timeout too short (minimum: 100ms)".to_string());
        }
        if matches!(self.io_timeout, Some(t) if t < Duration::from_millis(10)) {
            problems.push("Client I/O timeout too short (minimum: 10ms)".to_string());
        }

        let max_chunk = MAX_PAYLOAD_SIZE / 2;
        if self.transfer_chunk_size == 0 {
            problems.push("Transfer chunk size must be greater than 0".to_string());
        } else if self.transfer_chunk_size > max_chunk {
            problems.push(format!(
                "Transfer chunk size too large: {} bytes (maximum: {max_chunk})",
                self.transfer_chunk_size
            ));
        }

        problems
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest payload read from a peer
    pub max_payload_size: usize,

    pub stream_chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD_SIZE,
            stream_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        match self.max_payload_size {
            0 => problems.push("Max payload size cannot be 0".to_string()),
            n if n < 1024 => problems.push("Max payload size too small (minimum: 1 KB)".to_string()),
            n if n > MAX_PAYLOAD_SIZE => problems.push(format!(
                "Max payload size too large: {n} bytes (maximum: {MAX_PAYLOAD_SIZE})"
            )),
            _ => {}
        }

        if self.stream_chunk_size == 0 {
            problems.push("Stream chunk size cannot be 0".to_string());
        } else if self.stream_chunk_size > self.max_payload_size {
            problems.push("Stream chunk size cannot exceed max payload size".to_string());
        }

        problems
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Name attached to the startup log line
    pub app_name: String,

    /// Level used when `RUST_LOG` is unset
    #[serde(with = "level_name")]
    pub log_level: Level,

    pub log_to_console: bool,

    /// Append to `log_file_path` as well
    pub log_to_file: bool,

    pub log_file_path: Option<String>,

    /// One JSON object per event instead of text lines
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("bot-socket"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.app_name.is_empty() {
            problems.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            problems.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            match self.log_file_path.as_deref().map(Path::new) {
                None => problems
                    .push("log_file_path must be specified when log_to_file is true".to_string()),
                Some(path) => {
                    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                        if !dir.is_dir() {
                            problems.push(format!("Log directory does not exist: {}", dir.display()));
                        }
                    }
                }
            }
        }

        if !self.log_to_console && !self.log_to_file {
            problems.push("At least one logging output (console or file) must be enabled".to_string());
        }

        problems
    }
}

/// `Duration` as integer milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// `Option<Duration>` as integer milliseconds; `0` is `None`.
mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => super::millis::serialize(d, s),
            None => s.serialize_u64(0),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms = Option::<u64>::deserialize(d)?;
        Ok(ms.filter(|ms| *ms > 0).map(Duration::from_millis))
    }
}

/// `tracing::Level` as a lowercase name.
mod level_name {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Level, D::Error> {
        let name = String::deserialize(d)?;
        name.parse::<Level>()
            .map_err(|_| D::Error::custom(format!("unknown log level '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn magic_carries_the_version() {
        assert_eq!(MAGIC, 0xDEAD_FACE + 13);
    }

    #[test]
    fn partial_sections_take_defaults() {
        let config = NetworkConfig::from_toml(
            "[server]\nsession_ttl = 5000\n\n[logging]\nlog_level = \"debug\"\n",
        )
        .unwrap();
        assert_eq!(config.server.session_ttl, Duration::from_secs(5));
        assert_eq!(config.server.tcp_address, "0.0.0.0:50000");
        assert_eq!(config.server.io_timeout, Some(timeout::DEFAULT_TIMEOUT));
        assert_eq!(config.logging.log_level, Level::DEBUG);
        assert_eq!(config.client.io_timeout, None);
    }

    #[test]
    fn zero_timeout_selects_blocking() {
        let config = NetworkConfig::from_toml("[server]\nio_timeout = 0\n").unwrap();
        assert_eq!(config.server.io_timeout, None);
    }

    #[test]
    fn unknown_level_is_rejected() {
        let err = NetworkConfig::from_toml("[logging]\nlog_level = \"loud\"\n").unwrap_err();
        assert!(err.to_string().contains("unknown log level"));
    }
}
