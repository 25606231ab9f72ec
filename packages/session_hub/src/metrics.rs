//! Hub metrics for observability
//!
//! Atomic counters updated by the session manager and event loops; served as
//! a JSON snapshot on `/metrics`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct HubMetrics {
    // Session metrics
    /// Sessions currently registered
    pub active_sessions: AtomicU64,
    /// Sessions created since start
    pub sessions_created: AtomicU64,
    /// Sessions torn down since start
    pub sessions_torn_down: AtomicU64,

    // Pairing metrics
    pub pairing_codes_issued: AtomicU64,
    pub pairings_completed: AtomicU64,
    pub pairings_failed: AtomicU64,

    // Message metrics
    /// Outbound messages accepted by the network
    pub messages_sent: AtomicU64,
    pub send_failures: AtomicU64,
    /// Inbound messages handled by event loops
    pub inbound_processed: AtomicU64,
    /// Inbound messages dropped because a queue was full
    pub inbound_dropped: AtomicU64,

    /// Start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn session_created(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_torn_down(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
        self.sessions_torn_down.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pairing_code_issued(&self) {
        self.pairing_codes_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pairing_completed(&self) {
        self.pairings_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pairing_failed(&self) {
        self.pairings_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_processed(&self) {
        self.inbound_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_dropped(&self) {
        self.inbound_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            sessions: SessionMetrics {
                active: self.active_sessions.load(Ordering::Relaxed),
                created: self.sessions_created.load(Ordering::Relaxed),
                torn_down: self.sessions_torn_down.load(Ordering::Relaxed),
            },
            pairing: PairingMetrics {
                codes_issued: self.pairing_codes_issued.load(Ordering::Relaxed),
                completed: self.pairings_completed.load(Ordering::Relaxed),
                failed: self.pairings_failed.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                sent: self.messages_sent.load(Ordering::Relaxed),
                send_failures: self.send_failures.load(Ordering::Relaxed),
                inbound_processed: self.inbound_processed.load(Ordering::Relaxed),
                inbound_dropped: self.inbound_dropped.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub sessions: SessionMetrics,
    pub pairing: PairingMetrics,
    pub messages: MessageMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub active: u64,
    pub created: u64,
    pub torn_down: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingMetrics {
    pub codes_issued: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub sent: u64,
    pub send_failures: u64,
    pub inbound_processed: u64,
    pub inbound_dropped: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub sessions: SessionHealth,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHealth {
    /// Sessions in the registry right now
    pub registered: u64,
    /// Registered sessions that are authenticated and marked connected
    pub connected: u64,
}
