//! Relay-wide counters, kept as plain atomics.
//!
//! One `RelayMetrics` instance is shared between the registry (session
//! lifecycle), session actors (frame delivery), and the connection layer
//! (socket lifecycle). All fields are atomic for lock-free concurrent
//! access; readers get point-in-time values, not a consistent snapshot
//! across fields.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Aggregated counters for the relay.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Sessions currently held by the registry.
    active_sessions: AtomicUsize,
    /// WebSocket connections currently open.
    active_connections: AtomicUsize,
    /// Frames successfully handed to an outbound channel.
    frames_relayed: AtomicU64,
    /// Frames dropped because the recipient's channel was full or closed.
    frames_dropped: AtomicU64,
}

impl RelayMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Increment the active session count.
    pub fn session_created(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the active session count.
    pub fn session_removed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Increment the open connection count.
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the open connection count.
    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a frame delivered to an outbound channel.
    pub fn record_frame_relayed(&self) {
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame dropped on a full or closed outbound channel.
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current session count.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Current open connection count.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Total frames relayed since startup.
    #[must_use]
    pub fn frames_relayed(&self) -> u64 {
        self.frames_relayed.load(Ordering::Relaxed)
    }

    /// Total frames dropped since startup.
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_and_connection_counts() {
        let metrics = RelayMetrics::new();

        assert_eq!(metrics.session_count(), 0);
        assert_eq!(metrics.connection_count(), 0);

        metrics.session_created();
        metrics.session_created();
        assert_eq!(metrics.session_count(), 2);

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_opened();
        assert_eq!(metrics.connection_count(), 3);

        metrics.session_removed();
        assert_eq!(metrics.session_count(), 1);

        metrics.connection_closed();
        assert_eq!(metrics.connection_count(), 2);
    }

    #[test]
    fn test_frame_counters_only_grow() {
        let metrics = RelayMetrics::new();

        metrics.record_frame_relayed();
        metrics.record_frame_relayed();
        metrics.record_frame_dropped();

        assert_eq!(metrics.frames_relayed(), 2);
        assert_eq!(metrics.frames_dropped(), 1);
    }
}
