//! Routing counters
//!
//! Cheap atomic counters updated on the dispatch path, snapshotted on
//! demand. Process-local and never persisted.

use std::sync::atomic::{AtomicU64, Ordering};

/// Director-wide counters
#[derive(Debug, Default)]
pub struct DirectorStats {
    datagrams_routed: AtomicU64,
    datagrams_delivered: AtomicU64,
    datagrams_dropped: AtomicU64,
    datagrams_forwarded: AtomicU64,
    control_messages: AtomicU64,
}

impl DirectorStats {
    pub(crate) fn record_routed(&self) {
        self.datagrams_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, count: u64) {
        self.datagrams_delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self) {
        self.datagrams_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_control(&self) {
        self.control_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams_routed: self.datagrams_routed.load(Ordering::Relaxed),
            datagrams_delivered: self.datagrams_delivered.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
            datagrams_forwarded: self.datagrams_forwarded.load(Ordering::Relaxed),
            control_messages: self.control_messages.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the director counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Datagrams taken off the queue and parsed
    pub datagrams_routed: u64,
    /// Individual deliveries to participants
    pub datagrams_delivered: u64,
    /// Datagrams with no local recipient
    pub datagrams_dropped: u64,
    /// Datagrams mirrored to the upstream director
    pub datagrams_forwarded: u64,
    /// Control messages handled for network participants
    pub control_messages: u64,
}
