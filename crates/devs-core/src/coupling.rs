//! ---
//! devs_section: "02-kernel"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Validated couplings between ports."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
use std::any::Any;
use std::fmt;

use serde::Serialize;

use crate::error::WiringError;
use crate::model::{ModelId, ModelIdentity};
use crate::port::{InputPort, OutputPort, Payload, PortId};

/// The three DEVS coupling kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CouplingKind {
    /// Coupled model boundary input to a child input.
    ExternalInput,
    /// Child output to the coupled model's boundary output.
    ExternalOutput,
    /// Child output to a sibling input.
    Internal,
}

impl CouplingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouplingKind::ExternalInput => "external-input",
            CouplingKind::ExternalOutput => "external-output",
            CouplingKind::Internal => "internal",
        }
    }
}

impl fmt::Display for CouplingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable directed wire between two ports carrying the same payload type.
///
/// The only way to obtain a coupling is through one of the constructors,
/// which reject a coupling whose ends belong to the same model. That is the
/// only check made here; cycles spanning several couplings are the coupled
/// model's concern when it is sealed.
///
/// ```compile_fail
/// use std::sync::Arc;
/// use devs_core::{Coupling, InputPort, ManualClock, ModelIdentity, OutputPort, SimContext};
///
/// let ctx = SimContext::new(Arc::new(ManualClock::default()));
/// let m = ModelIdentity::root("m", ctx).unwrap();
/// let from = OutputPort::<u8>::new(&m, "out");
/// let to = InputPort::<u8>::from_fn(&m, "in", |_, _| Ok(()));
/// let _ = Coupling::Internal { from, to };
/// ```
pub struct Coupling<T> {
    link: Link<T>,
}

enum Link<T> {
    ExternalInput { from: InputPort<T>, to: InputPort<T> },
    ExternalOutput { from: OutputPort<T>, to: OutputPort<T> },
    Internal { from: OutputPort<T>, to: InputPort<T> },
}

impl<T: Payload> Coupling<T> {
    pub fn external_input(from: &InputPort<T>, to: &InputPort<T>) -> Result<Self, WiringError> {
        ensure_distinct_owners(
            CouplingKind::ExternalInput,
            (from.owner(), from.path()),
            (to.owner(), to.path()),
        )?;
        Ok(Self {
            link: Link::ExternalInput {
                from: from.clone(),
                to: to.clone(),
            },
        })
    }

    pub fn external_output(
        from: &OutputPort<T>,
        to: &OutputPort<T>,
    ) -> Result<Self, WiringError> {
        ensure_distinct_owners(
            CouplingKind::ExternalOutput,
            (from.owner(), from.path()),
            (to.owner(), to.path()),
        )?;
        Ok(Self {
            link: Link::ExternalOutput {
                from: from.clone(),
                to: to.clone(),
            },
        })
    }

    pub fn internal(from: &OutputPort<T>, to: &InputPort<T>) -> Result<Self, WiringError> {
        ensure_distinct_owners(
            CouplingKind::Internal,
            (from.owner(), from.path()),
            (to.owner(), to.path()),
        )?;
        Ok(Self {
            link: Link::Internal {
                from: from.clone(),
                to: to.clone(),
            },
        })
    }
}

impl<T> Coupling<T> {
    pub fn kind(&self) -> CouplingKind {
        match self.link {
            Link::ExternalInput { .. } => CouplingKind::ExternalInput,
            Link::ExternalOutput { .. } => CouplingKind::ExternalOutput,
            Link::Internal { .. } => CouplingKind::Internal,
        }
    }

    pub fn source(&self) -> PortId {
        match &self.link {
            Link::ExternalInput { from, .. } => from.id(),
            Link::ExternalOutput { from, .. } | Link::Internal { from, .. } => from.id(),
        }
    }

    /// Destination input port of an external input or internal coupling.
    pub(crate) fn input_target(&self) -> Option<&InputPort<T>> {
        match &self.link {
            Link::ExternalInput { to, .. } | Link::Internal { to, .. } => Some(to),
            Link::ExternalOutput { .. } => None,
        }
    }

    /// Destination boundary output port of an external output coupling.
    pub(crate) fn output_target(&self) -> Option<&OutputPort<T>> {
        match &self.link {
            Link::ExternalOutput { to, .. } => Some(to),
            Link::ExternalInput { .. } | Link::Internal { .. } => None,
        }
    }

    fn endpoints(&self) -> (&ModelIdentity, &ModelIdentity) {
        match &self.link {
            Link::ExternalInput { from, to } => (from.owner(), to.owner()),
            Link::ExternalOutput { from, to } => (from.owner(), to.owner()),
            Link::Internal { from, to } => (from.owner(), to.owner()),
        }
    }

    fn paths(&self) -> (&str, &str) {
        match &self.link {
            Link::ExternalInput { from, to } => (from.path(), to.path()),
            Link::ExternalOutput { from, to } => (from.path(), to.path()),
            Link::Internal { from, to } => (from.path(), to.path()),
        }
    }

    pub fn summary(&self) -> CouplingSummary {
        let (from, to) = self.paths();
        CouplingSummary {
            kind: self.kind(),
            from: from.to_owned(),
            to: to.to_owned(),
        }
    }
}

impl<T> Clone for Coupling<T> {
    fn clone(&self) -> Self {
        let link = match &self.link {
            Link::ExternalInput { from, to } => Link::ExternalInput {
                from: from.clone(),
                to: to.clone(),
            },
            Link::ExternalOutput { from, to } => Link::ExternalOutput {
                from: from.clone(),
                to: to.clone(),
            },
            Link::Internal { from, to } => Link::Internal {
                from: from.clone(),
                to: to.clone(),
            },
        };
        Self { link }
    }
}

impl<T> fmt::Debug for Coupling<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (from, to) = self.paths();
        f.debug_struct("Coupling")
            .field("kind", &self.kind())
            .field("from", &from)
            .field("to", &to)
            .finish()
    }
}

fn ensure_distinct_owners(
    kind: CouplingKind,
    (from_owner, from_path): (&ModelIdentity, &str),
    (to_owner, to_path): (&ModelIdentity, &str),
) -> Result<(), WiringError> {
    if from_owner.same_model(to_owner) {
        return Err(WiringError::SelfCoupling {
            kind,
            from: from_path.to_owned(),
            to: to_path.to_owned(),
        });
    }
    Ok(())
}

/// Descriptive record of one coupling, for introspection and dumps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CouplingSummary {
    pub kind: CouplingKind,
    pub from: String,
    pub to: String,
}

/// Type-erased coupling as stored in a coupled model's tables.
pub(crate) trait Route: Send + Sync {
    fn kind(&self) -> CouplingKind;
    fn source(&self) -> PortId;
    /// Owning models of the source and destination ports.
    fn owners(&self) -> (ModelId, ModelId);
    fn summary(&self) -> CouplingSummary;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Payload> Route for Coupling<T> {
    fn kind(&self) -> CouplingKind {
        Coupling::kind(self)
    }

    fn source(&self) -> PortId {
        Coupling::source(self)
    }

    fn owners(&self) -> (ModelId, ModelId) {
        let (from, to) = self.endpoints();
        (from.id(), to.id())
    }

    fn summary(&self) -> CouplingSummary {
        Coupling::summary(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<'r> dyn Route + 'r {
    /// A port id belongs to exactly one typed port, so a route found under the
    /// firing port's id always carries that port's payload type.
    pub(crate) fn downcast<T: Payload>(&self) -> Option<&Coupling<T>> {
        self.as_any().downcast_ref::<Coupling<T>>()
    }
}
