//! Server Metrics
//!
//! Atomic counters for the connection layer. The server owns one
//! `ServerMetrics` behind an `Arc`; every connection task updates it
//! without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters updated by the accept loop and connection tasks
#[derive(Debug)]
pub struct ServerMetrics {
    /// Connections admitted
    pub connections_accepted: AtomicU64,
    /// Connections closed immediately by admission limits
    pub connections_rejected: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Receive events produced
    pub recv_events: AtomicU64,
    /// Bytes read from sockets
    pub bytes_received: AtomicU64,
    /// Send buffers handed to writer tasks
    pub send_buffers: AtomicU64,
    /// Bytes written to sockets
    pub bytes_sent: AtomicU64,
    /// Sends dropped because the connection was gone or its queue was full
    pub sends_dropped: AtomicU64,
    /// Accept or socket I/O errors
    pub io_errors: AtomicU64,
    start_time: Instant,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            connections_accepted: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            recv_events: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            send_buffers: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            sends_dropped: AtomicU64::new(0),
            io_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn received(&self, byte_count: u64) {
        self.recv_events.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn send_queued(&self) {
        self.send_buffers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent(&self, byte_count: u64) {
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn send_dropped(&self) {
        self.sends_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn io_error(&self) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            recv_events: self.recv_events.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_buffers: self.send_buffers.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            sends_dropped: self.sends_dropped.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Emit the current counters as one structured event
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            connections_accepted = s.connections_accepted,
            connections_rejected = s.connections_rejected,
            connections_active = s.connections_active,
            recv_events = s.recv_events,
            bytes_received = s.bytes_received,
            send_buffers = s.send_buffers,
            bytes_sent = s.bytes_sent,
            sends_dropped = s.sends_dropped,
            io_errors = s.io_errors,
            uptime_seconds = s.uptime_seconds,
            "Server metrics snapshot"
        );
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`ServerMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub connections_active: u64,
    pub recv_events: u64,
    pub bytes_received: u64,
    pub send_buffers: u64,
    pub bytes_sent: u64,
    pub sends_dropped: u64,
    pub io_errors: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let m = ServerMetrics::new();
        m.connection_accepted();
        m.connection_accepted();
        m.connection_closed();
        m.connection_rejected();
        m.received(10);
        m.sent(4);
        let s = m.snapshot();
        assert_eq!(s.connections_accepted, 2);
        assert_eq!(s.connections_active, 1);
        assert_eq!(s.connections_rejected, 1);
        assert_eq!(s.recv_events, 1);
        assert_eq!(s.bytes_received, 10);
        assert_eq!(s.bytes_sent, 4);
    }
}
