//! ---
//! devs_section: "02-kernel"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Environment shared by one model tree."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use devs_common::{KernelConfig, ReportingConfig, RoutingConfig, SimTime, TimeSource};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::warn;

use crate::error::{DeliveryError, StateReadError};
use crate::metrics::{Counters, RoutingMetrics};
use crate::state::{ObserverId, StateObserver, StateUpdate};

/// Destination for runtime failures the kernel reports but does not act on.
///
/// Both methods default to a `tracing` warning, so an implementation only
/// overrides what it wants to capture.
pub trait ErrorSink: Send + Sync {
    fn delivery_failed(&self, error: &DeliveryError) {
        warn!(port = error.port(), error = %error, "delivery failed");
    }

    fn state_read_failed(&self, error: &StateReadError) {
        warn!(
            model = %error.model,
            variable = error.variable,
            error = %error,
            "state variable read failed"
        );
    }
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {}

/// Collaborators and per-run state shared by every model of one tree.
///
/// Holds the time source, the error sink, the observer registry, id
/// allocation, and the routing counters. Nothing here is global: two trees
/// built on two contexts never see each other.
pub struct SimContext {
    clock: Arc<dyn TimeSource>,
    sink: Arc<dyn ErrorSink>,
    observers: RwLock<IndexMap<ObserverId, Arc<dyn StateObserver>>>,
    next_id: AtomicU64,
    routing: RoutingConfig,
    reporting: ReportingConfig,
    counters: Counters,
}

impl SimContext {
    /// Context with default settings and a [`TracingSink`].
    pub fn new(clock: Arc<dyn TimeSource>) -> Arc<Self> {
        Self::builder(clock).build()
    }

    pub fn builder(clock: Arc<dyn TimeSource>) -> SimContextBuilder {
        SimContextBuilder {
            clock,
            sink: None,
            config: KernelConfig::default(),
        }
    }

    pub fn current_time(&self) -> SimTime {
        self.clock.current_time()
    }

    /// Register an observer for state updates. Observers are notified in
    /// subscription order.
    pub fn subscribe(&self, observer: Arc<dyn StateObserver>) -> ObserverId {
        let id = ObserverId(self.next_id());
        self.observers.write().insert(id, observer);
        id
    }

    /// Remove an observer; returns whether it was registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.write().shift_remove(&id).is_some()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    pub fn metrics(&self) -> RoutingMetrics {
        self.counters.snapshot()
    }

    pub fn routing_config(&self) -> &RoutingConfig {
        &self.routing
    }

    pub fn reporting_config(&self) -> &ReportingConfig {
        &self.reporting
    }

    pub(crate) fn sink(&self) -> &dyn ErrorSink {
        self.sink.as_ref()
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn has_observers(&self) -> bool {
        !self.observers.read().is_empty()
    }

    pub(crate) fn publish(&self, update: &StateUpdate) {
        // Snapshot first so an observer may subscribe or unsubscribe from its callback.
        let observers: Vec<_> = self.observers.read().values().cloned().collect();
        for observer in observers {
            observer.on_state_update(update);
        }
    }
}

impl fmt::Debug for SimContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimContext")
            .field("now", &self.current_time())
            .field("observers", &self.observer_count())
            .field("routing", &self.routing)
            .field("reporting", &self.reporting)
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SimContext`].
pub struct SimContextBuilder {
    clock: Arc<dyn TimeSource>,
    sink: Option<Arc<dyn ErrorSink>>,
    config: KernelConfig,
}

impl SimContextBuilder {
    pub fn with_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Apply the routing and reporting sections of a loaded configuration.
    pub fn with_config(mut self, config: &KernelConfig) -> Self {
        self.config = config.clone();
        self
    }

    pub fn build(self) -> Arc<SimContext> {
        Arc::new(SimContext {
            clock: self.clock,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            observers: RwLock::new(IndexMap::new()),
            next_id: AtomicU64::new(0),
            routing: self.config.routing,
            reporting: self.config.reporting,
            counters: Counters::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateBuffer;
    use devs_common::{CyclePolicy, ManualClock};

    #[test]
    fn reads_time_from_clock() {
        let clock = Arc::new(ManualClock::new(SimTime::new(3.0)));
        let ctx = SimContext::new(clock.clone());
        assert_eq!(ctx.current_time(), SimTime::new(3.0));
        clock.set(SimTime::new(4.5));
        assert_eq!(ctx.current_time(), SimTime::new(4.5));
    }

    #[test]
    fn subscribe_and_unsubscribe() {
        let ctx = SimContext::new(Arc::new(ManualClock::default()));
        let first = ctx.subscribe(Arc::new(StateBuffer::new()));
        let second = ctx.subscribe(Arc::new(StateBuffer::new()));
        assert_ne!(first, second);
        assert_eq!(ctx.observer_count(), 2);
        assert!(ctx.unsubscribe(first));
        assert!(!ctx.unsubscribe(first));
        assert_eq!(ctx.observer_count(), 1);
    }

    #[test]
    fn builder_applies_config() {
        let mut config = KernelConfig::default();
        config.routing.cycle_policy = CyclePolicy::Reject;
        config.reporting.report_after_delivery = true;
        let ctx = SimContext::builder(Arc::new(ManualClock::default()))
            .with_config(&config)
            .build();
        assert_eq!(ctx.routing_config().cycle_policy, CyclePolicy::Reject);
        assert!(ctx.reporting_config().report_after_delivery);
    }
}
