//! ---
//! devs_section: "02-kernel"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Wiring, delivery, and state reporting errors."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
use devs_common::SimTime;

use crate::coupling::CouplingKind;

/// Boxed error returned by user-authored handlers and state accessors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Construction-time misconfiguration. Always aborts model assembly.
#[derive(Debug, thiserror::Error)]
pub enum WiringError {
    /// Both ends of a coupling belong to the same model.
    #[error("no self coupling allowed: {kind} coupling {from} -> {to}")]
    SelfCoupling {
        /// Kind of the rejected coupling.
        kind: CouplingKind,
        /// Source port path.
        from: String,
        /// Destination port path.
        to: String,
    },
    /// A local name is empty or contains the `.` separator.
    #[error("invalid model name {name:?}: names must be non-empty and must not contain '.'")]
    InvalidName {
        /// Rejected local name.
        name: String,
    },
    /// Two children of one coupled model share a local name.
    #[error("coupled model {parent} already has a child named {name}")]
    DuplicateChild {
        /// Full name of the coupled model.
        parent: String,
        /// Duplicated local name.
        name: String,
    },
    /// Internal couplings form a cycle and the cycle policy rejects it.
    #[error("internal couplings of {model} form a cycle through {member}")]
    CouplingCycle {
        /// Full name of the coupled model being sealed.
        model: String,
        /// Full name of one model on the cycle.
        member: String,
    },
    /// A drain was requested for a port whose owner has a parent.
    #[error("port {port} does not belong to a top-level model")]
    NotTopLevel {
        /// Port path.
        port: String,
    },
    /// A drain is already attached to the port.
    #[error("port {port} already has a drain attached")]
    DrainAlreadyAttached {
        /// Port path.
        port: String,
    },
}

/// A single destination failed to accept a value during a live transfer.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The destination's handler returned an error.
    #[error("port {port} rejected value at t={time}: {source}")]
    Rejected {
        /// Destination port path.
        port: String,
        /// Delivery time.
        time: SimTime,
        /// Handler error.
        #[source]
        source: BoxError,
    },
    /// The destination model is already handling a delivery further up the call chain.
    #[error("port {port} is busy at t={time}; reentrant delivery dropped (coupling cycle?)")]
    Reentrant {
        /// Destination port path.
        port: String,
        /// Delivery time.
        time: SimTime,
    },
    /// The routing coupled model is still inside its build closure, so it has
    /// no coupling tables yet.
    #[error("port {port} used before its coupled model finished assembly; value not routed")]
    Unsealed {
        /// Port path.
        port: String,
    },
    /// The model owning the destination (or the routing parent) has been dropped.
    #[error("port {port} is detached from its model")]
    Detached {
        /// Port path.
        port: String,
    },
}

impl DeliveryError {
    /// Path of the port the failure concerns.
    pub fn port(&self) -> &str {
        match self {
            DeliveryError::Rejected { port, .. }
            | DeliveryError::Reentrant { port, .. }
            | DeliveryError::Unsealed { port }
            | DeliveryError::Detached { port } => port,
        }
    }
}

/// Aggregate of every delivery failure seen during one `send` or `receive` call.
///
/// The fan-out is attempted in full before this error is returned.
#[derive(Debug, thiserror::Error)]
#[error("{} deliveries failed", .failures.len())]
pub struct TransferError {
    failures: Vec<DeliveryError>,
}

impl TransferError {
    pub(crate) fn single(failure: DeliveryError) -> Self {
        Self {
            failures: vec![failure],
        }
    }

    /// Individual failures, in the order the destinations were visited.
    pub fn failures(&self) -> &[DeliveryError] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<DeliveryError> {
        self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Accumulates delivery outcomes across a fan-out.
#[derive(Debug, Default)]
pub(crate) struct FailureCollector {
    failures: Vec<DeliveryError>,
}

impl FailureCollector {
    pub(crate) fn record(&mut self, outcome: Result<(), TransferError>) {
        if let Err(err) = outcome {
            self.failures.extend(err.failures);
        }
    }

    pub(crate) fn finish(self) -> Result<(), TransferError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(TransferError {
                failures: self.failures,
            })
        }
    }
}

/// Reading one declared state variable failed.
#[derive(Debug, thiserror::Error)]
#[error("failed to read state variable {variable} of {model}: {source}")]
pub struct StateReadError {
    /// Full name of the model.
    pub model: String,
    /// Declared variable name.
    pub variable: &'static str,
    /// Accessor error.
    #[source]
    pub source: BoxError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_flattens_nested_failures() {
        let mut collector = FailureCollector::default();
        collector.record(Ok(()));
        collector.record(Err(TransferError::single(DeliveryError::Detached {
            port: "root.a:in".into(),
        })));
        collector.record(Err(TransferError {
            failures: vec![
                DeliveryError::Reentrant {
                    port: "root.b:in".into(),
                    time: SimTime::new(1.0),
                },
                DeliveryError::Detached {
                    port: "root.c:in".into(),
                },
            ],
        }));

        let err = collector.finish().unwrap_err();
        let ports: Vec<_> = err.failures().iter().map(DeliveryError::port).collect();
        assert_eq!(ports, vec!["root.a:in", "root.b:in", "root.c:in"]);
        assert!(err.to_string().starts_with("3 deliveries failed"));
    }

    #[test]
    fn empty_collector_is_ok() {
        assert!(FailureCollector::default().finish().is_ok());
    }

    #[test]
    fn self_coupling_message_names_the_rule() {
        let err = WiringError::SelfCoupling {
            kind: CouplingKind::Internal,
            from: "root.a:out".into(),
            to: "root.a:in".into(),
        };
        assert!(err.to_string().starts_with("no self coupling allowed"));
    }
}
