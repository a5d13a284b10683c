//! ---
//! devs_section: "02-kernel"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Declared state variables and state-change observers."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
//! State-change reporting.
//!
//! A model type declares its observable variables once, as a static table of
//! readers. Reporting walks that table in order and hands one [`StateUpdate`]
//! per variable to every observer registered on the [`SimContext`].
//!
//! [`SimContext`]: crate::context::SimContext
use std::ops::{Add, AddAssign};

use devs_common::SimTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{BoxError, StateReadError};
use crate::model::ModelIdentity;

/// Handle returned by [`SimContext::subscribe`](crate::context::SimContext::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) u64);

/// One observed value of one state variable at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Full hierarchical name of the reporting model.
    pub model_name: String,
    pub variable_name: String,
    pub value: Value,
    pub time: SimTime,
}

/// Reads one variable out of model state `M`.
pub type StateReader<M> = fn(&M) -> Result<Value, BoxError>;

/// A named, observable field of a model type.
pub struct StateVariable<M> {
    name: &'static str,
    read: StateReader<M>,
}

impl<M> StateVariable<M> {
    pub const fn new(name: &'static str, read: StateReader<M>) -> Self {
        Self { name, read }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn read(&self, state: &M) -> Result<Value, BoxError> {
        (self.read)(state)
    }
}

impl<M> Clone for StateVariable<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for StateVariable<M> {}

/// Static declaration of a model type's observable state.
///
/// The default declares nothing, so a model with no observable state only
/// needs an empty `impl`.
///
/// ```
/// use devs_core::{DeclaredState, StateVariable};
///
/// struct Queue {
///     length: usize,
///     busy: bool,
/// }
///
/// impl DeclaredState for Queue {
///     fn state_variables() -> &'static [StateVariable<Self>] {
///         const VARIABLES: &[StateVariable<Queue>] = &[
///             StateVariable::new("length", |q| Ok(q.length.into())),
///             StateVariable::new("busy", |q| Ok(q.busy.into())),
///         ];
///         VARIABLES
///     }
/// }
///
/// assert_eq!(Queue::state_variables()[1].name(), "busy");
/// ```
pub trait DeclaredState: Sized + 'static {
    fn state_variables() -> &'static [StateVariable<Self>] {
        &[]
    }
}

/// Counts of one reporting pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateReport {
    /// Updates handed to observers.
    pub emitted: usize,
    /// Variables whose reader failed.
    pub failed: usize,
    /// Models left out because their state was borrowed by a running handler.
    pub skipped: usize,
}

impl Add for StateReport {
    type Output = StateReport;

    fn add(self, other: StateReport) -> StateReport {
        StateReport {
            emitted: self.emitted + other.emitted,
            failed: self.failed + other.failed,
            skipped: self.skipped + other.skipped,
        }
    }
}

impl AddAssign for StateReport {
    fn add_assign(&mut self, other: StateReport) {
        *self = *self + other;
    }
}

/// Receiver of state updates.
///
/// Called synchronously from the reporting model's thread; implementations
/// must not block.
pub trait StateObserver: Send + Sync {
    fn on_state_update(&self, update: &StateUpdate);
}

/// Observer that keeps every update in memory.
#[derive(Debug, Default)]
pub struct StateBuffer {
    updates: Mutex<Vec<StateUpdate>>,
}

impl StateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<StateUpdate> {
        self.updates.lock().clone()
    }

    /// Take every buffered update, leaving the buffer empty.
    pub fn drain(&self) -> Vec<StateUpdate> {
        std::mem::take(&mut *self.updates.lock())
    }

    pub fn len(&self) -> usize {
        self.updates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.lock().is_empty()
    }
}

impl StateObserver for StateBuffer {
    fn on_state_update(&self, update: &StateUpdate) {
        self.updates.lock().push(update.clone());
    }
}

/// Forwards updates to an async consumer. A closed channel drops the update.
impl StateObserver for UnboundedSender<StateUpdate> {
    fn on_state_update(&self, update: &StateUpdate) {
        if self.send(update.clone()).is_err() {
            tracing::trace!(model = %update.model_name, "state channel closed; update dropped");
        }
    }
}

/// Publish every declared variable of `state`, in declaration order.
///
/// A failing reader is reported to the error sink and skipped; the remaining
/// variables are still published. Readers are not run at all while nothing
/// is subscribed.
pub(crate) fn broadcast<M: DeclaredState>(identity: &ModelIdentity, state: &M) -> StateReport {
    let context = identity.context();
    let mut report = StateReport::default();
    if !context.has_observers() {
        return report;
    }
    let time = context.current_time();

    for variable in M::state_variables() {
        match variable.read(state) {
            Ok(value) => {
                context.publish(&StateUpdate {
                    model_name: identity.full_name().to_owned(),
                    variable_name: variable.name().to_owned(),
                    value,
                    time,
                });
                report.emitted += 1;
            }
            Err(source) => {
                let error = StateReadError {
                    model: identity.full_name().to_owned(),
                    variable: variable.name(),
                    source,
                };
                context.sink().state_read_failed(&error);
                report.failed += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::SimContext;
    use devs_common::ManualClock;
    use serde_json::json;

    struct Server {
        queue: Vec<u32>,
        busy: bool,
        label: Option<&'static str>,
    }

    impl DeclaredState for Server {
        fn state_variables() -> &'static [StateVariable<Self>] {
            const VARIABLES: &[StateVariable<Server>] = &[
                StateVariable::new("queue", |s| Ok(serde_json::to_value(&s.queue)?)),
                StateVariable::new("label", |s| match s.label {
                    Some(label) => Ok(label.into()),
                    None => Err("label not assigned".into()),
                }),
                StateVariable::new("busy", |s| Ok(s.busy.into())),
            ];
            VARIABLES
        }
    }

    fn identity(time: f64) -> (ModelIdentity, Arc<StateBuffer>) {
        let ctx = SimContext::new(Arc::new(ManualClock::new(SimTime::new(time))));
        let buffer = Arc::new(StateBuffer::new());
        ctx.subscribe(buffer.clone());
        (ModelIdentity::root("server", ctx).unwrap(), buffer)
    }

    #[test]
    fn publishes_each_variable_in_declaration_order() {
        let (identity, buffer) = identity(12.5);
        let state = Server {
            queue: vec![1, 2],
            busy: true,
            label: Some("cashier"),
        };
        let report = broadcast(&identity, &state);
        assert_eq!(report, StateReport {
            emitted: 3,
            failed: 0,
            skipped: 0,
        });

        let updates = buffer.snapshot();
        let names: Vec<_> = updates.iter().map(|u| u.variable_name.as_str()).collect();
        assert_eq!(names, vec!["queue", "label", "busy"]);
        assert_eq!(updates[0].value, json!([1, 2]));
        assert_eq!(updates[1].value, json!("cashier"));
        assert!(updates
            .iter()
            .all(|u| u.time == SimTime::new(12.5) && u.model_name == "server"));
    }

    #[test]
    fn failed_read_does_not_suppress_the_rest() {
        let (identity, buffer) = identity(1.0);
        let state = Server {
            queue: Vec::new(),
            busy: false,
            label: None,
        };
        let report = broadcast(&identity, &state);
        assert_eq!(report, StateReport {
            emitted: 2,
            failed: 1,
            skipped: 0,
        });
        let names: Vec<_> = buffer.drain().into_iter().map(|u| u.variable_name).collect();
        assert_eq!(names, vec!["queue", "busy"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn readers_are_not_run_without_observers() {
        let ctx = SimContext::new(Arc::new(ManualClock::default()));
        let identity = ModelIdentity::root("server", ctx).unwrap();
        let state = Server {
            queue: Vec::new(),
            busy: false,
            label: None,
        };
        assert_eq!(broadcast(&identity, &state), StateReport::default());
    }

    #[test]
    fn reports_add_up() {
        let mut total = StateReport {
            emitted: 1,
            failed: 0,
            skipped: 0,
        };
        total += StateReport {
            emitted: 2,
            failed: 1,
            skipped: 0,
        };
        assert_eq!(total, StateReport {
            emitted: 3,
            failed: 1,
            skipped: 0,
        });
    }

    #[test]
    fn channel_observer_forwards_updates() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let update = StateUpdate {
            model_name: "m".into(),
            variable_name: "v".into(),
            value: json!(1),
            time: SimTime::ZERO,
        };
        tx.on_state_update(&update);
        assert_eq!(rx.try_recv().ok(), Some(update.clone()));

        drop(rx);
        tx.on_state_update(&update);
    }
}
