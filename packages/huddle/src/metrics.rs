//! Server metrics for observability
//!
//! Counters cover the connection lifecycle and the relay fan-out so a single
//! `/metrics` scrape shows whether deliveries are failing.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Currently active WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,

    /// Chat messages accepted and relayed
    pub messages_relayed: AtomicU64,
    /// Join/leave notices broadcast
    pub presence_events: AtomicU64,
    /// Signaling events relayed (offer/answer/ice/leave)
    pub signaling_events: AtomicU64,

    /// Per-recipient deliveries attempted
    pub deliveries_sent: AtomicU64,
    /// Per-recipient deliveries dropped (receiver gone)
    pub deliveries_failed: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn message_relayed(&self) {
        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn presence_event(&self) {
        self.presence_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn signaling_event(&self) {
        self.signaling_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_sent(&self) {
        self.deliveries_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_failed(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            relay: RelayMetrics {
                messages: self.messages_relayed.load(Ordering::Relaxed),
                presence: self.presence_events.load(Ordering::Relaxed),
                signaling: self.signaling_events.load(Ordering::Relaxed),
            },
            deliveries: DeliveryMetrics {
                sent: self.deliveries_sent.load(Ordering::Relaxed),
                failed: self.deliveries_failed.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub relay: RelayMetrics,
    pub deliveries: DeliveryMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMetrics {
    pub messages: u64,
    pub presence: u64,
    pub signaling: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryMetrics {
    pub sent: u64,
    pub failed: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    pub uptime_secs: u64,
}
