//! ---
//! devs_section: "02-kernel"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Routing counters shared by one model tree."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of routing counters for dashboards and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoutingMetrics {
    /// Values emitted through `OutputPort::send`, at every hierarchy level.
    pub sent: u64,
    /// Values accepted by leaf input handlers.
    pub delivered: u64,
    /// Leaf deliveries that failed.
    pub failed: u64,
    /// Values that left the top-level model through one of its output ports.
    pub terminal: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    sent: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    terminal: AtomicU64,
}

impl Counters {
    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_terminal(&self) {
        self.terminal.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RoutingMetrics {
        RoutingMetrics {
            sent: self.sent.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            terminal: self.terminal.load(Ordering::Relaxed),
        }
    }
}
