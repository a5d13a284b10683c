//! ---
//! devs_section: "02-kernel"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Model identity and the composition tree."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde::Serialize;

use crate::context::SimContext;
use crate::coupled::CoupledModel;
use crate::error::WiringError;
use crate::state::{DeclaredState, StateReport};

/// Context-unique model identifier. Ownership checks compare these, never names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModelId(u64);

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

/// Leaf or composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Atomic,
    Coupled,
}

/// Fixed hierarchical identity of a model.
///
/// Cloning is shallow. The parent link is weak: a coupled model owns its
/// children, never the other way round.
#[derive(Clone)]
pub struct ModelIdentity {
    inner: Arc<IdentityInner>,
}

struct IdentityInner {
    id: ModelId,
    local_name: String,
    full_name: String,
    parent: Option<Weak<CoupledModel>>,
    context: Arc<SimContext>,
    /// Set while one of the model's `from_fn` input handlers is running.
    busy: AtomicBool,
}

impl ModelIdentity {
    /// Identity of a top-level model.
    pub fn root(
        local_name: impl Into<String>,
        context: Arc<SimContext>,
    ) -> Result<Self, WiringError> {
        let local_name = validate_name(local_name.into())?;
        Ok(Self::from_parts(local_name.clone(), local_name, None, context))
    }

    pub(crate) fn child(
        local_name: impl Into<String>,
        parent: &Arc<CoupledModel>,
    ) -> Result<Self, WiringError> {
        let local_name = validate_name(local_name.into())?;
        let parent_identity = parent.identity();
        let full_name = format!("{}.{}", parent_identity.full_name(), local_name);
        Ok(Self::from_parts(
            local_name,
            full_name,
            Some(Arc::downgrade(parent)),
            parent_identity.context().clone(),
        ))
    }

    fn from_parts(
        local_name: String,
        full_name: String,
        parent: Option<Weak<CoupledModel>>,
        context: Arc<SimContext>,
    ) -> Self {
        let id = ModelId(context.next_id());
        Self {
            inner: Arc::new(IdentityInner {
                id,
                local_name,
                full_name,
                parent,
                context,
                busy: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ModelId {
        self.inner.id
    }

    pub fn local_name(&self) -> &str {
        &self.inner.local_name
    }

    /// `parent.full_name + "." + local_name`, or `local_name` for a top-level model.
    pub fn full_name(&self) -> &str {
        &self.inner.full_name
    }

    pub fn context(&self) -> &Arc<SimContext> {
        &self.inner.context
    }

    /// True when the model was built without a parent.
    pub fn is_top_level(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// The owning coupled model; `None` for the root or once the parent is dropped.
    pub fn parent_model(&self) -> Option<Arc<CoupledModel>> {
        self.inner.parent.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn parent_link(&self) -> Option<&Weak<CoupledModel>> {
        self.inner.parent.as_ref()
    }

    pub fn same_model(&self, other: &ModelIdentity) -> bool {
        self.id() == other.id()
    }

    /// Publish every declared variable of `state` under this model's name.
    ///
    /// Custom [`Model`] implementations call this from `report_state`.
    pub fn broadcast<M: DeclaredState>(&self, state: &M) -> StateReport {
        crate::state::broadcast(self, state)
    }

    /// Mark the model as handling a delivery; `None` when it already is.
    pub(crate) fn try_enter(&self) -> Option<BusyGuard<'_>> {
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| BusyGuard {
                busy: &self.inner.busy,
            })
    }
}

pub(crate) struct BusyGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelIdentity")
            .field("id", &self.inner.id)
            .field("full_name", &self.inner.full_name)
            .finish()
    }
}

fn validate_name(name: String) -> Result<String, WiringError> {
    if name.is_empty() || name.contains('.') {
        return Err(WiringError::InvalidName { name });
    }
    Ok(name)
}

/// Behaviour shared by every node of the composition tree.
pub trait Model: Send + Sync + 'static {
    fn identity(&self) -> &ModelIdentity;

    fn kind(&self) -> ModelKind;

    /// Names of the declared state variables, in declaration order.
    fn declared_state(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Broadcast declared state to the context's observers.
    fn report_state(&self) -> StateReport {
        StateReport::default()
    }

    fn local_name(&self) -> &str {
        self.identity().local_name()
    }

    fn full_name(&self) -> &str {
        self.identity().full_name()
    }

    fn parent_model(&self) -> Option<Arc<CoupledModel>> {
        self.identity().parent_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devs_common::ManualClock;

    fn context() -> Arc<SimContext> {
        SimContext::new(Arc::new(ManualClock::default()))
    }

    #[test]
    fn root_full_name_is_local_name() {
        let identity = ModelIdentity::root("plant", context()).expect("valid name");
        assert_eq!(identity.local_name(), "plant");
        assert_eq!(identity.full_name(), "plant");
        assert!(identity.is_top_level());
        assert!(identity.parent_model().is_none());
    }

    #[test]
    fn rejects_empty_and_dotted_names() {
        assert!(matches!(
            ModelIdentity::root("", context()),
            Err(WiringError::InvalidName { .. })
        ));
        assert!(matches!(
            ModelIdentity::root("a.b", context()),
            Err(WiringError::InvalidName { name }) if name == "a.b"
        ));
    }

    #[test]
    fn busy_guard_is_exclusive_and_released_on_drop() {
        let identity = ModelIdentity::root("leaf", context()).unwrap();
        let alias = identity.clone();
        let guard = identity.try_enter().expect("idle model");
        assert!(alias.try_enter().is_none());
        drop(guard);
        assert!(alias.try_enter().is_some());
    }

    #[test]
    fn identities_are_unique_per_context() {
        let ctx = context();
        let a = ModelIdentity::root("same", ctx.clone()).unwrap();
        let b = ModelIdentity::root("same", ctx).unwrap();
        assert!(!a.same_model(&b));
        assert!(a.same_model(&a.clone()));
    }
}
