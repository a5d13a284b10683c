//! ---
//! devs_section: "02-kernel"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Typed input and output ports."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
//! Typed communication endpoints.
//!
//! A port belongs to exactly one model and never buffers: `send` and
//! `receive` run the whole routing chain synchronously before returning.
//! Port handles are cheap to clone; clones share identity, so a coupling
//! built from a clone matches the original.
use std::fmt;
use std::sync::{Arc, Weak};

use devs_common::{devs_debug, devs_trace, LogContext, SimTime};
use once_cell::sync::OnceCell;

use crate::coupled::CoupledModel;
use crate::error::{BoxError, DeliveryError, TransferError, WiringError};
use crate::model::ModelIdentity;

/// Context-unique port identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(u64);

/// Values that can travel through ports. Fan-out clones the value once per destination.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Payload for T {}

#[derive(Debug)]
pub(crate) struct PortInfo {
    id: PortId,
    name: String,
    path: String,
    owner: ModelIdentity,
}

impl PortInfo {
    pub(crate) fn new(owner: &ModelIdentity, name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new(Self {
            id: PortId(owner.context().next_id()),
            path: format!("{}:{}", owner.full_name(), name),
            name,
            owner: owner.clone(),
        })
    }

    pub(crate) fn id(&self) -> PortId {
        self.id
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    fn log_context(&self) -> LogContext<'_> {
        LogContext::new()
            .with_model(self.owner.full_name())
            .with_port(&self.name)
    }
}

/// Record a failed leaf delivery: counted, reported to the sink once, wrapped
/// for aggregation.
pub(crate) fn fail(info: &PortInfo, failure: DeliveryError) -> TransferError {
    let context = info.owner.context();
    context.counters().record_failed();
    context.sink().delivery_failed(&failure);
    TransferError::single(failure)
}

/// Turn a leaf handler's outcome into a routing outcome.
///
/// A handler that fails because its own nested `send` failed hands back a
/// [`TransferError`]; those failures were reported where they happened and
/// are passed through unchanged.
pub(crate) fn settle(
    info: &PortInfo,
    time: SimTime,
    outcome: Result<(), BoxError>,
) -> Result<(), TransferError> {
    match outcome {
        Ok(()) => {
            let context = info.owner.context();
            context.counters().record_delivered();
            let log = info.log_context().with_time(time);
            if context.routing_config().trace_deliveries {
                devs_debug!(context = log, "value delivered");
            } else {
                devs_trace!(context = log, "value delivered");
            }
            Ok(())
        }
        Err(err) => match err.downcast::<TransferError>() {
            Ok(nested) => Err(*nested),
            Err(source) => Err(fail(
                info,
                DeliveryError::Rejected {
                    port: info.path.clone(),
                    time,
                    source,
                },
            )),
        },
    }
}

pub(crate) type LeafHandler<T> = dyn Fn(T, SimTime) -> Result<(), TransferError> + Send + Sync;

enum Target<T> {
    /// User behaviour of a leaf model.
    Leaf(Arc<LeafHandler<T>>),
    /// Boundary port of a coupled model; forwards along external input couplings.
    Boundary(Weak<CoupledModel>),
}

impl<T> Clone for Target<T> {
    fn clone(&self) -> Self {
        match self {
            Target::Leaf(handler) => Target::Leaf(handler.clone()),
            Target::Boundary(model) => Target::Boundary(model.clone()),
        }
    }
}

/// Endpoint that accepts values.
pub struct InputPort<T> {
    info: Arc<PortInfo>,
    target: Target<T>,
}

impl<T: Payload> InputPort<T> {
    /// Input port of a custom leaf model backed by a closure.
    ///
    /// While any `from_fn` handler of the owning model runs, further
    /// deliveries to that model fail with [`DeliveryError::Reentrant`].
    pub fn from_fn<F>(owner: &ModelIdentity, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(T, SimTime) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let info = PortInfo::new(owner, name);
        let handler_info = info.clone();
        let leaf: Arc<LeafHandler<T>> = Arc::new(move |value, time| {
            let Some(_busy) = handler_info.owner.try_enter() else {
                return Err(fail(
                    &handler_info,
                    DeliveryError::Reentrant {
                        port: handler_info.path.clone(),
                        time,
                    },
                ));
            };
            settle(&handler_info, time, handler(value, time))
        });
        Self::leaf(info, leaf)
    }

    pub(crate) fn leaf(info: Arc<PortInfo>, handler: Arc<LeafHandler<T>>) -> Self {
        Self {
            info,
            target: Target::Leaf(handler),
        }
    }

    pub(crate) fn boundary(info: Arc<PortInfo>, model: Weak<CoupledModel>) -> Self {
        Self {
            info,
            target: Target::Boundary(model),
        }
    }

    /// Deliver `value` stamped with `time`.
    ///
    /// On a leaf this runs the model's handler. On a coupled model's boundary
    /// port the value is forwarded to every child input coupled to it, in
    /// registration order; every destination is attempted even when some fail.
    pub fn receive(&self, value: T, time: SimTime) -> Result<(), TransferError> {
        match &self.target {
            Target::Leaf(handler) => handler(value, time),
            Target::Boundary(model) => match model.upgrade() {
                Some(model) => model.forward_input(&self.info, value, time),
                None => Err(fail(
                    &self.info,
                    DeliveryError::Detached {
                        port: self.info.path.clone(),
                    },
                )),
            },
        }
    }
}

impl<T> InputPort<T> {
    pub fn id(&self) -> PortId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// `owner_full_name:port_name`.
    pub fn path(&self) -> &str {
        &self.info.path
    }

    pub fn owner(&self) -> &ModelIdentity {
        &self.info.owner
    }
}

impl<T> Clone for InputPort<T> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            target: self.target.clone(),
        }
    }
}

impl<T> fmt::Debug for InputPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputPort")
            .field("id", &self.info.id)
            .field("path", &self.info.path)
            .finish()
    }
}

type Drain<T> = dyn Fn(T, SimTime) + Send + Sync;

struct OutputInner<T> {
    info: Arc<PortInfo>,
    drain: OnceCell<Box<Drain<T>>>,
}

/// Endpoint that emits values.
pub struct OutputPort<T> {
    inner: Arc<OutputInner<T>>,
}

impl<T: Payload> OutputPort<T> {
    pub fn new(owner: &ModelIdentity, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(OutputInner {
                info: PortInfo::new(owner, name),
                drain: OnceCell::new(),
            }),
        }
    }

    /// Emit `value` through the owner's parent.
    ///
    /// When the owner is the top-level model the value leaves the kernel: it
    /// is handed to the drain if one is attached and otherwise discarded.
    /// That is not an error.
    pub fn send(&self, value: T) -> Result<(), TransferError> {
        let info = &self.inner.info;
        let context = info.owner.context();
        context.counters().record_sent();

        match info.owner.parent_link() {
            Some(parent) => match parent.upgrade() {
                Some(parent) => parent.transfer(self, value),
                None => Err(fail(
                    info,
                    DeliveryError::Detached {
                        port: info.path.clone(),
                    },
                )),
            },
            None => {
                context.counters().record_terminal();
                let time = context.current_time();
                match self.inner.drain.get() {
                    Some(drain) => drain(value, time),
                    None => devs_trace!(
                        context = info.log_context().with_time(time),
                        "value reached terminal sink"
                    ),
                }
                Ok(())
            }
        }
    }

    /// Observe values leaving the top-level model through this port.
    pub fn attach_drain<F>(&self, drain: F) -> Result<(), WiringError>
    where
        F: Fn(T, SimTime) + Send + Sync + 'static,
    {
        let info = &self.inner.info;
        if !info.owner.is_top_level() {
            return Err(WiringError::NotTopLevel {
                port: info.path.clone(),
            });
        }
        self.inner
            .drain
            .set(Box::new(drain))
            .map_err(|_| WiringError::DrainAlreadyAttached {
                port: info.path.clone(),
            })
    }
}

impl<T> OutputPort<T> {
    pub(crate) fn info(&self) -> &PortInfo {
        &self.inner.info
    }

    pub fn id(&self) -> PortId {
        self.inner.info.id
    }

    pub fn name(&self) -> &str {
        &self.inner.info.name
    }

    /// `owner_full_name:port_name`.
    pub fn path(&self) -> &str {
        &self.inner.info.path
    }

    pub fn owner(&self) -> &ModelIdentity {
        &self.inner.info.owner
    }
}

impl<T> Clone for OutputPort<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for OutputPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPort")
            .field("id", &self.inner.info.id)
            .field("path", &self.inner.info.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use devs_common::ManualClock;
    use parking_lot::Mutex;

    fn root(name: &str) -> ModelIdentity {
        let clock = Arc::new(ManualClock::new(SimTime::new(2.0)));
        ModelIdentity::root(name, SimContext::new(clock)).unwrap()
    }

    #[test]
    fn paths_and_clones_share_identity() {
        let owner = root("sensor");
        let out = OutputPort::<u32>::new(&owner, "reading");
        let copy = out.clone();
        assert_eq!(out.id(), copy.id());
        assert_eq!(out.path(), "sensor:reading");
        assert_eq!(out.name(), "reading");
        assert!(out.owner().same_model(&owner));
    }

    #[test]
    fn from_fn_receive_runs_handler() {
        let owner = root("sink");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let input = InputPort::from_fn(&owner, "in", move |value: u32, time| {
            log.lock().push((value, time));
            Ok(())
        });
        input.receive(7, SimTime::new(1.0)).expect("delivery succeeds");
        assert_eq!(*seen.lock(), vec![(7, SimTime::new(1.0))]);
        assert_eq!(owner.context().metrics().delivered, 1);
    }

    #[test]
    fn handler_error_becomes_rejected() {
        let owner = root("picky");
        let input = InputPort::from_fn(&owner, "in", |value: i64, _| {
            if value < 0 {
                Err("negative".into())
            } else {
                Ok(())
            }
        });
        let err = input.receive(-1, SimTime::new(3.0)).unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(matches!(
            &err.failures()[0],
            DeliveryError::Rejected { port, time, .. }
                if port == "picky:in" && *time == SimTime::new(3.0)
        ));
        assert_eq!(owner.context().metrics().failed, 1);
    }

    #[test]
    fn top_level_send_goes_to_drain() {
        let owner = root("top");
        let out = OutputPort::<&'static str>::new(&owner, "out");
        out.send("unobserved").expect("terminal sink is not an error");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        out.attach_drain(move |value, time| log.lock().push((value, time)))
            .expect("drain attaches");
        out.send("observed").unwrap();

        assert_eq!(*seen.lock(), vec![("observed", SimTime::new(2.0))]);
        assert!(matches!(
            out.attach_drain(|_, _| {}),
            Err(WiringError::DrainAlreadyAttached { .. })
        ));
        let metrics = owner.context().metrics();
        assert_eq!(metrics.sent, 2);
        assert_eq!(metrics.terminal, 2);
    }
}
