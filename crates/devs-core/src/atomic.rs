//! ---
//! devs_section: "02-kernel"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Hosting of user-defined atomic model state."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
use std::fmt;
use std::sync::{Arc, Weak};

use devs_common::{devs_debug, LogContext, SimTime};
use parking_lot::Mutex;

use crate::context::SimContext;
use crate::error::{BoxError, DeliveryError, WiringError};
use crate::model::{Model, ModelIdentity, ModelKind};
use crate::port::{fail, settle, InputPort, LeafHandler, OutputPort, Payload, PortInfo};
use crate::state::{broadcast, DeclaredState, StateReport};

/// Leaf model wrapping user state `M`.
///
/// Input handlers run with exclusive access to the state. A delivery that
/// arrives while the state is already borrowed (a coupling cycle leading
/// back into a running handler) fails with [`DeliveryError::Reentrant`].
pub struct AtomicModel<M> {
    identity: ModelIdentity,
    state: Mutex<M>,
}

impl<M: DeclaredState + Send> AtomicModel<M> {
    /// Atomic model without a parent: its outputs end at the terminal sink.
    pub fn build<F>(
        name: impl Into<String>,
        context: Arc<SimContext>,
        build: F,
    ) -> Result<Arc<Self>, WiringError>
    where
        F: FnOnce(&PortFactory<M>) -> M,
    {
        let identity = ModelIdentity::root(name, context)?;
        Ok(Self::assemble(identity, build))
    }

    pub(crate) fn assemble<F>(identity: ModelIdentity, build: F) -> Arc<Self>
    where
        F: FnOnce(&PortFactory<M>) -> M,
    {
        Arc::new_cyclic(|model| {
            let factory = PortFactory {
                identity: identity.clone(),
                model: model.clone(),
            };
            let state = build(&factory);
            AtomicModel {
                identity,
                state: Mutex::new(state),
            }
        })
    }

    /// Run `f` with exclusive access to the model state.
    ///
    /// Schedulers use this to drive transitions and emit outputs. Must not be
    /// called from inside one of this model's own input handlers.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        f(&mut self.state.lock())
    }
}

impl<M: DeclaredState + Send> Model for AtomicModel<M> {
    fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Atomic
    }

    fn declared_state(&self) -> Vec<&'static str> {
        M::state_variables()
            .iter()
            .map(|variable| variable.name())
            .collect()
    }

    /// Broadcast the current state, or count the model as skipped when a
    /// handler holds the state (reporting from inside a delivery).
    fn report_state(&self) -> StateReport {
        match self.state.try_lock() {
            Some(state) => broadcast(&self.identity, &*state),
            None => {
                devs_debug!(
                    context = LogContext::new().with_model(self.identity.full_name()),
                    "state busy; report skipped"
                );
                StateReport {
                    skipped: 1,
                    ..StateReport::default()
                }
            }
        }
    }
}

impl<M> fmt::Debug for AtomicModel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicModel")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Creates the ports of an atomic model while its state is being built.
pub struct PortFactory<M> {
    identity: ModelIdentity,
    model: Weak<AtomicModel<M>>,
}

impl<M: DeclaredState + Send> PortFactory<M> {
    pub fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    /// Input port whose deliveries run `handler` against the model state.
    pub fn input<T, F>(&self, name: impl Into<String>, handler: F) -> InputPort<T>
    where
        T: Payload,
        F: Fn(&mut M, T, SimTime) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let info = PortInfo::new(&self.identity, name);
        let port = info.clone();
        let model = self.model.clone();
        let leaf: Arc<LeafHandler<T>> = Arc::new(move |value, time| {
            let Some(model) = model.upgrade() else {
                return Err(fail(
                    &port,
                    DeliveryError::Detached {
                        port: port_path(&port),
                    },
                ));
            };
            let Some(mut state) = model.state.try_lock() else {
                return Err(fail(
                    &port,
                    DeliveryError::Reentrant {
                        port: port_path(&port),
                        time,
                    },
                ));
            };
            let outcome = settle(&port, time, handler(&mut *state, value, time));
            if outcome.is_ok() && model.identity.context().reporting_config().report_after_delivery
            {
                broadcast(&model.identity, &*state);
            }
            outcome
        });
        InputPort::leaf(info, leaf)
    }

    pub fn output<T: Payload>(&self, name: impl Into<String>) -> OutputPort<T> {
        OutputPort::new(&self.identity, name)
    }
}

fn port_path(info: &PortInfo) -> String {
    info.path().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{StateBuffer, StateObserver, StateUpdate, StateVariable};
    use devs_common::{KernelConfig, ManualClock};
    use once_cell::sync::OnceCell;

    struct Accumulator {
        total: i64,
        out: OutputPort<i64>,
    }

    impl DeclaredState for Accumulator {
        fn state_variables() -> &'static [StateVariable<Self>] {
            const VARIABLES: &[StateVariable<Accumulator>] =
                &[StateVariable::new("total", |m| Ok(m.total.into()))];
            VARIABLES
        }
    }

    fn accumulator(
        context: Arc<SimContext>,
    ) -> (Arc<AtomicModel<Accumulator>>, InputPort<i64>) {
        let mut input = None;
        let model = AtomicModel::build("acc", context, |ports| {
            input = Some(ports.input("add", |state: &mut Accumulator, value: i64, _| {
                if value == 0 {
                    return Err("zero is not a valid increment".into());
                }
                state.total += value;
                Ok(())
            }));
            Accumulator {
                total: 0,
                out: ports.output("total"),
            }
        })
        .expect("valid name");
        (model, input.expect("input created"))
    }

    #[test]
    fn handler_mutates_state() {
        let ctx = SimContext::new(Arc::new(ManualClock::default()));
        let (model, input) = accumulator(ctx.clone());
        input.receive(3, SimTime::new(1.0)).unwrap();
        input.receive(4, SimTime::new(2.0)).unwrap();
        assert_eq!(model.with_state(|s| s.total), 7);
        assert_eq!(model.declared_state(), vec!["total"]);
        assert_eq!(model.kind(), ModelKind::Atomic);
        assert!(input.receive(0, SimTime::new(3.0)).is_err());
        assert_eq!(ctx.metrics().delivered, 2);
        assert_eq!(ctx.metrics().failed, 1);
    }

    #[test]
    fn delivery_while_state_is_borrowed_is_reentrant() {
        let ctx = SimContext::new(Arc::new(ManualClock::default()));
        let (model, input) = accumulator(ctx);
        let err = model.with_state(|_| input.receive(1, SimTime::new(1.0)).unwrap_err());
        assert!(matches!(err.failures()[0], DeliveryError::Reentrant { .. }));
    }

    #[test]
    fn dropped_model_detaches_its_ports() {
        let ctx = SimContext::new(Arc::new(ManualClock::default()));
        let (model, input) = accumulator(ctx);
        drop(model);
        let err = input.receive(1, SimTime::ZERO).unwrap_err();
        assert!(matches!(
            &err.failures()[0],
            DeliveryError::Detached { port } if port == "acc:add"
        ));
    }

    #[test]
    fn report_after_delivery_broadcasts_state() {
        let mut config = KernelConfig::default();
        config.reporting.report_after_delivery = true;
        let clock = Arc::new(ManualClock::new(SimTime::new(9.0)));
        let ctx = SimContext::builder(clock).with_config(&config).build();
        let buffer = Arc::new(StateBuffer::new());
        ctx.subscribe(buffer.clone());

        let (model, input) = accumulator(ctx);
        input.receive(5, SimTime::new(9.0)).unwrap();
        let updates = buffer.drain();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].model_name, "acc");
        assert_eq!(updates[0].variable_name, "total");
        assert_eq!(updates[0].value, serde_json::json!(5));
        assert_eq!(updates[0].time, SimTime::new(9.0));

        model.with_state(|s| s.out.send(s.total)).expect("terminal send");
    }

    /// Observer that asks the model for a fresh report from inside its own
    /// delivery.
    struct Rereport {
        model: OnceCell<Weak<AtomicModel<Accumulator>>>,
        reports: Mutex<Vec<StateReport>>,
    }

    impl StateObserver for Rereport {
        fn on_state_update(&self, _update: &StateUpdate) {
            if let Some(model) = self.model.get().and_then(Weak::upgrade) {
                self.reports.lock().push(model.report_state());
            }
        }
    }

    #[test]
    fn report_from_inside_a_delivery_is_skipped() {
        let mut config = KernelConfig::default();
        config.reporting.report_after_delivery = true;
        let ctx = SimContext::builder(Arc::new(ManualClock::default()))
            .with_config(&config)
            .build();
        let observer = Arc::new(Rereport {
            model: OnceCell::new(),
            reports: Mutex::new(Vec::new()),
        });
        ctx.subscribe(observer.clone());

        let (model, input) = accumulator(ctx);
        observer.model.set(Arc::downgrade(&model)).unwrap();
        input.receive(2, SimTime::new(1.0)).unwrap();
        assert_eq!(*observer.reports.lock(), vec![StateReport {
            emitted: 0,
            failed: 0,
            skipped: 1,
        }]);

        // The outer report holds the state while its observers run, so the
        // nested one is skipped again.
        let report = model.report_state();
        assert_eq!(report.skipped, 0);
        assert_eq!(report.emitted, 1);
        assert_eq!(observer.reports.lock().len(), 2);
        assert_eq!(observer.reports.lock()[1].skipped, 1);
    }
}
