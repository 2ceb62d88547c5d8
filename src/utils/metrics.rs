//! Observability counters for a running server.
//!
//! One [`Metrics`] instance is owned by each `Server` and shared with its
//! listeners; every counter is a relaxed atomic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::error::ProtocolError;

#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Connections currently being served
    pub connections_active: AtomicU64,
    /// Sessions opened through the handshake
    pub sessions_opened: AtomicU64,
    /// Sessions closed explicitly
    pub sessions_closed: AtomicU64,
    /// Packets read and accepted
    pub packets_received: AtomicU64,
    /// Packets written back
    pub packets_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    /// Packets handed to a command handler
    pub commands_dispatched: AtomicU64,
    /// Bad magic, malformed header, oversize
    pub framing_errors: AtomicU64,
    /// Missing or unknown session
    pub auth_failures: AtomicU64,
    /// HMAC or cipher tag mismatch
    pub integrity_failures: AtomicU64,
    /// Nonce reuse or regression
    pub replay_rejections: AtomicU64,
    /// Socket failures and timeouts
    pub connection_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            commands_dispatched: AtomicU64::new(0),
            framing_errors: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            integrity_failures: AtomicU64::new(0),
            replay_rejections: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn command_dispatched(&self) {
        self.commands_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Bucket a connection-terminating error into the matching counter.
    pub fn record_rejection(&self, error: &ProtocolError) {
        let counter = match error {
            ProtocolError::IncompatiblePeer { .. }
            | ProtocolError::InvalidHeader(_)
            | ProtocolError::InvalidPayloadType(_)
            | ProtocolError::OversizedPacket(_)
            | ProtocolError::OutOfBounds { .. } => &self.framing_errors,
            ProtocolError::Unauthenticated(_) => &self.auth_failures,
            ProtocolError::IntegrityFailure | ProtocolError::DecryptionFailure => {
                &self.integrity_failures
            }
            ProtocolError::ReplayDetected { .. } => &self.replay_rejections,
            _ => &self.connection_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            commands_dispatched: self.commands_dispatched.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            replay_rejections: self.replay_rejections.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            connections_total = s.connections_total,
            connections_active = s.connections_active,
            sessions_opened = s.sessions_opened,
            sessions_closed = s.sessions_closed,
            packets_received = s.packets_received,
            packets_sent = s.packets_sent,
            bytes_received = s.bytes_received,
            bytes_sent = s.bytes_sent,
            commands_dispatched = s.commands_dispatched,
            framing_errors = s.framing_errors,
            auth_failures = s.auth_failures,
            integrity_failures = s.integrity_failures,
            replay_rejections = s.replay_rejections,
            connection_errors = s.connection_errors,
            uptime_seconds = s.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub commands_dispatched: u64,
    pub framing_errors: u64,
    pub auth_failures: u64,
    pub integrity_failures: u64,
    pub replay_rejections: u64,
    pub connection_errors: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            duration_us = self.start.elapsed().as_micros() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_land_in_their_bucket() {
        let m = Metrics::new();
        m.record_rejection(&ProtocolError::IntegrityFailure);
        m.record_rejection(&ProtocolError::DecryptionFailure);
        m.record_rejection(&ProtocolError::ReplayDetected {
            nonce: 3,
            last_nonce: 5,
        });
        m.record_rejection(&ProtocolError::IncompatiblePeer { magic: 1 });
        m.record_rejection(&ProtocolError::Unauthenticated("none".into()));

        let s = m.snapshot();
        assert_eq!(s.integrity_failures, 2);
        assert_eq!(s.replay_rejections, 1);
        assert_eq!(s.framing_errors, 1);
        assert_eq!(s.auth_failures, 1);
        assert_eq!(s.connection_errors, 0);
    }

    #[test]
    fn connection_gauge_tracks_open_connections() {
        let m = Metrics::new();
        m.connection_established();
        m.connection_established();
        m.connection_closed();
        let s = m.snapshot();
        assert_eq!(s.connections_total, 2);
        assert_eq!(s.connections_active, 1);
    }
}
