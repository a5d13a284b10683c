//! ---
//! devs_section: "02-kernel"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Coupled models, construction, and transfer routing."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
//! Coupled models and the transfer routing algorithm.
//!
//! A coupled model is assembled once through [`CoupledBuilder`]: children
//! first, then the couplings that reference their ports. When the build
//! closure returns, the children and coupling tables are sealed into
//! `OnceCell`s and are read-only for the rest of the run, so routing takes
//! no locks.
use std::fmt;
use std::sync::Arc;

use devs_common::{devs_debug, devs_warn, CyclePolicy, LogContext, SimTime};
use indexmap::{IndexMap, IndexSet};
use once_cell::sync::OnceCell;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::atomic::{AtomicModel, PortFactory};
use crate::context::SimContext;
use crate::coupling::{Coupling, CouplingKind, CouplingSummary, Route};
use crate::error::{DeliveryError, FailureCollector, TransferError, WiringError};
use crate::model::{Model, ModelId, ModelIdentity, ModelKind};
use crate::port::{fail, InputPort, OutputPort, Payload, PortId, PortInfo};
use crate::state::{DeclaredState, StateReport};

/// Routes of one coupling kind, in declaration order, indexed by source port.
#[derive(Default)]
struct RoutingTable {
    routes: Vec<Box<dyn Route>>,
    by_source: IndexMap<PortId, Vec<usize>>,
}

impl RoutingTable {
    fn insert(&mut self, route: Box<dyn Route>) {
        let index = self.routes.len();
        self.by_source.entry(route.source()).or_default().push(index);
        self.routes.push(route);
    }

    /// Routes whose source is `port`, in registration order.
    fn from_port(&self, port: PortId) -> impl Iterator<Item = &dyn Route> + '_ {
        self.by_source
            .get(&port)
            .into_iter()
            .flatten()
            .map(move |&index| self.routes[index].as_ref())
    }

    fn iter(&self) -> impl Iterator<Item = &dyn Route> + '_ {
        self.routes.iter().map(Box::as_ref)
    }
}

#[derive(Default)]
struct CouplingTables {
    internal: RoutingTable,
    external_input: RoutingTable,
    external_output: RoutingTable,
    /// Every coupling across the three tables, in declaration order.
    declared: Vec<CouplingSummary>,
}

impl CouplingTables {
    fn insert(&mut self, route: Box<dyn Route>) {
        self.declared.push(route.summary());
        match route.kind() {
            CouplingKind::Internal => self.internal.insert(route),
            CouplingKind::ExternalInput => self.external_input.insert(route),
            CouplingKind::ExternalOutput => self.external_output.insert(route),
        }
    }
}

/// Composite model: owns its children and the couplings wiring them.
pub struct CoupledModel {
    identity: ModelIdentity,
    children: OnceCell<Vec<Arc<dyn Model>>>,
    tables: OnceCell<CouplingTables>,
}

impl CoupledModel {
    /// Assemble a top-level coupled model.
    ///
    /// `build` declares boundary ports, children and couplings, and may
    /// return handles (typically ports) to the caller. Any wiring error
    /// aborts the whole assembly.
    pub fn build<R, F>(
        name: impl Into<String>,
        context: Arc<SimContext>,
        build: F,
    ) -> Result<(Arc<Self>, R), WiringError>
    where
        F: FnOnce(&mut CoupledBuilder) -> Result<R, WiringError>,
    {
        let identity = ModelIdentity::root(name, context)?;
        Self::assemble(identity, build)
    }

    fn assemble<R, F>(identity: ModelIdentity, build: F) -> Result<(Arc<Self>, R), WiringError>
    where
        F: FnOnce(&mut CoupledBuilder) -> Result<R, WiringError>,
    {
        let model = Arc::new(CoupledModel {
            identity,
            children: OnceCell::new(),
            tables: OnceCell::new(),
        });
        let mut builder = CoupledBuilder {
            model: model.clone(),
            names: IndexSet::new(),
            children: Vec::new(),
            tables: CouplingTables::default(),
        };
        let handles = build(&mut builder)?;
        builder.seal()?;
        Ok((model, handles))
    }

    /// Route a value emitted by a child's output port.
    ///
    /// Internal couplings from `from` are delivered first, then external
    /// output couplings, each group in registration order. Every destination
    /// is attempted; failures are returned together once the fan-out is done.
    pub fn transfer<T: Payload>(&self, from: &OutputPort<T>, value: T) -> Result<(), TransferError> {
        let Some(tables) = self.tables.get() else {
            return Err(fail(
                from.info(),
                DeliveryError::Unsealed {
                    port: from.path().to_owned(),
                },
            ));
        };

        let time = self.identity.context().current_time();
        let mut failures = FailureCollector::default();

        for route in tables.internal.from_port(from.id()) {
            if let Some(to) = route.downcast::<T>().and_then(Coupling::input_target) {
                failures.record(to.receive(value.clone(), time));
            }
        }
        for route in tables.external_output.from_port(from.id()) {
            if let Some(to) = route.downcast::<T>().and_then(Coupling::output_target) {
                failures.record(to.send(value.clone()));
            }
        }

        failures.finish()
    }

    /// Forward a value that arrived on one of this model's boundary input ports.
    pub(crate) fn forward_input<T: Payload>(
        &self,
        from: &PortInfo,
        value: T,
        time: SimTime,
    ) -> Result<(), TransferError> {
        let Some(tables) = self.tables.get() else {
            return Err(fail(
                from,
                DeliveryError::Unsealed {
                    port: from.path().to_owned(),
                },
            ));
        };

        let mut failures = FailureCollector::default();
        for route in tables.external_input.from_port(from.id()) {
            if let Some(to) = route.downcast::<T>().and_then(Coupling::input_target) {
                failures.record(to.receive(value.clone(), time));
            }
        }
        failures.finish()
    }

    /// Children in declaration order. Empty until assembly finishes.
    pub fn children(&self) -> &[Arc<dyn Model>] {
        self.children.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn child(&self, local_name: &str) -> Option<&Arc<dyn Model>> {
        self.children()
            .iter()
            .find(|child| child.local_name() == local_name)
    }

    /// Every coupling in declaration order.
    pub fn couplings(&self) -> &[CouplingSummary] {
        self.tables
            .get()
            .map(|tables| tables.declared.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_sealed(&self) -> bool {
        self.tables.get().is_some()
    }
}

impl Model for CoupledModel {
    fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Coupled
    }

    /// Reports every descendant, depth first, in declaration order.
    fn report_state(&self) -> StateReport {
        self.children()
            .iter()
            .fold(StateReport::default(), |report, child| {
                report + child.report_state()
            })
    }
}

impl fmt::Debug for CoupledModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoupledModel")
            .field("identity", &self.identity)
            .field(
                "children",
                &self
                    .children()
                    .iter()
                    .map(|child| child.local_name())
                    .collect::<Vec<_>>(),
            )
            .field("couplings", &self.couplings().len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

/// Construction-phase handle for one coupled model.
pub struct CoupledBuilder {
    model: Arc<CoupledModel>,
    names: IndexSet<String>,
    children: Vec<Arc<dyn Model>>,
    tables: CouplingTables,
}

impl CoupledBuilder {
    pub fn identity(&self) -> &ModelIdentity {
        &self.model.identity
    }

    pub fn context(&self) -> &Arc<SimContext> {
        self.model.identity.context()
    }

    /// Boundary input port of the model under construction.
    pub fn input_port<T: Payload>(&self, name: impl Into<String>) -> InputPort<T> {
        InputPort::boundary(
            PortInfo::new(&self.model.identity, name),
            Arc::downgrade(&self.model),
        )
    }

    /// Boundary output port of the model under construction.
    pub fn output_port<T: Payload>(&self, name: impl Into<String>) -> OutputPort<T> {
        OutputPort::new(&self.model.identity, name)
    }

    /// Assemble a nested coupled model as a child.
    pub fn coupled<R, F>(
        &mut self,
        name: impl Into<String>,
        build: F,
    ) -> Result<(Arc<CoupledModel>, R), WiringError>
    where
        F: FnOnce(&mut CoupledBuilder) -> Result<R, WiringError>,
    {
        let identity = self.reserve(name)?;
        let (child, handles) = CoupledModel::assemble(identity, build)?;
        self.children.push(child.clone());
        Ok((child, handles))
    }

    /// Create an atomic child. `build` receives a port factory and returns the model state.
    pub fn atomic<M, F>(
        &mut self,
        name: impl Into<String>,
        build: F,
    ) -> Result<Arc<AtomicModel<M>>, WiringError>
    where
        M: DeclaredState + Send,
        F: FnOnce(&PortFactory<M>) -> M,
    {
        let identity = self.reserve(name)?;
        let child = AtomicModel::assemble(identity, build);
        self.children.push(child.clone());
        Ok(child)
    }

    /// Create a child from a custom [`Model`] implementation.
    pub fn leaf<M, F>(&mut self, name: impl Into<String>, build: F) -> Result<Arc<M>, WiringError>
    where
        M: Model,
        F: FnOnce(ModelIdentity) -> Result<M, WiringError>,
    {
        let identity = self.reserve(name)?;
        let child = Arc::new(build(identity)?);
        self.children.push(child.clone());
        Ok(child)
    }

    /// Register a coupling built by one of the [`Coupling`] constructors.
    pub fn couple<T: Payload>(&mut self, coupling: Coupling<T>) {
        self.tables.insert(Box::new(coupling));
    }

    pub fn external_input<T: Payload>(
        &mut self,
        from: &InputPort<T>,
        to: &InputPort<T>,
    ) -> Result<(), WiringError> {
        self.couple(Coupling::external_input(from, to)?);
        Ok(())
    }

    pub fn external_output<T: Payload>(
        &mut self,
        from: &OutputPort<T>,
        to: &OutputPort<T>,
    ) -> Result<(), WiringError> {
        self.couple(Coupling::external_output(from, to)?);
        Ok(())
    }

    pub fn internal<T: Payload>(
        &mut self,
        from: &OutputPort<T>,
        to: &InputPort<T>,
    ) -> Result<(), WiringError> {
        self.couple(Coupling::internal(from, to)?);
        Ok(())
    }

    fn reserve(&mut self, name: impl Into<String>) -> Result<ModelIdentity, WiringError> {
        let name = name.into();
        if self.names.contains(&name) {
            return Err(WiringError::DuplicateChild {
                parent: self.model.identity.full_name().to_owned(),
                name,
            });
        }
        let identity = ModelIdentity::child(name.as_str(), &self.model)?;
        self.names.insert(name);
        Ok(identity)
    }

    fn seal(self) -> Result<(), WiringError> {
        let policy = self.context().routing_config().cycle_policy;
        if policy != CyclePolicy::Allow {
            if let Some(member) = self.find_internal_cycle() {
                let member = self
                    .children
                    .iter()
                    .find(|child| child.identity().id() == member)
                    .map(|child| child.full_name().to_owned())
                    .unwrap_or_else(|| member.to_string());
                let model = self.model.identity.full_name().to_owned();
                if policy == CyclePolicy::Reject {
                    return Err(WiringError::CouplingCycle { model, member });
                }
                devs_warn!(
                    context = LogContext::new().with_model(&model),
                    "internal couplings form a cycle through {}; deliveries around it will be rejected as reentrant",
                    member
                );
            }
        }

        devs_debug!(
            context = LogContext::new().with_model(self.model.identity.full_name()),
            "coupled model sealed with {} children and {} couplings",
            self.children.len(),
            self.tables.declared.len()
        );
        let _ = self.model.children.set(self.children);
        let _ = self.model.tables.set(self.tables);
        Ok(())
    }

    /// A model on a cycle of internal couplings, if any.
    fn find_internal_cycle(&self) -> Option<ModelId> {
        let mut graph = DiGraph::<ModelId, ()>::new();
        let mut nodes: IndexMap<ModelId, NodeIndex> = IndexMap::new();
        for route in self.tables.internal.iter() {
            let (from, to) = route.owners();
            let from = *nodes.entry(from).or_insert_with(|| graph.add_node(from));
            let to = *nodes.entry(to).or_insert_with(|| graph.add_node(to));
            graph.add_edge(from, to, ());
        }
        toposort(&graph, None)
            .err()
            .map(|cycle| graph[cycle.node_id()])
    }
}
