//! Restart units of recomposition.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync;

use crate::anchor::Anchor;
use crate::collections::map::HashMap;
use crate::local::LocalContext;
use crate::runtime::InvalidationSink;
use crate::{CompositionId, ScopeId, StateId};

/// Restart closure shared between the scope and a running restart.
pub(crate) type RestartFn = Rc<RefCell<dyn FnMut()>>;

/// Something a scope subscribed to while its body ran.
pub(crate) trait ObservedState {
    fn remove_observer(&self, scope: ScopeId);
}

pub(crate) struct ScopeInner {
    id: ScopeId,
    owner: CompositionId,
    anchor: RefCell<Option<Anchor>>,
    invalid: Cell<bool>,
    restart: RefCell<Option<RestartFn>>,
    observed: RefCell<HashMap<StateId, sync::Weak<dyn ObservedState>>>,
    locals: RefCell<LocalContext>,
    sink: InvalidationSink,
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        for (_, state) in self.observed.get_mut().drain() {
            if let Some(state) = state.upgrade() {
                state.remove_observer(self.id);
            }
        }
    }
}

/// Binds a restart group's anchor, its restart closure and the state it read.
#[derive(Clone)]
pub struct RecomposeScope {
    inner: Rc<ScopeInner>, // FUTURE(no_std): replace Rc with arena-managed scope handles.
}

impl RecomposeScope {
    pub(crate) fn new(id: ScopeId, owner: CompositionId, sink: InvalidationSink) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                id,
                owner,
                anchor: RefCell::new(None),
                invalid: Cell::new(false),
                restart: RefCell::new(None),
                observed: RefCell::new(HashMap::default()),
                locals: RefCell::new(LocalContext::default()),
                sink,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<ScopeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ScopeInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub(crate) fn owner(&self) -> CompositionId {
        self.inner.owner
    }

    pub fn is_invalid(&self) -> bool {
        self.inner.invalid.get()
    }

    pub fn anchor(&self) -> Option<Anchor> {
        self.inner.anchor.borrow().clone()
    }

    /// Location of the scope's group, `None` once the group was removed.
    pub fn location(&self) -> Option<usize> {
        self.inner
            .anchor
            .borrow()
            .as_ref()
            .and_then(Anchor::location)
    }

    pub(crate) fn set_anchor(&self, anchor: Anchor) {
        *self.inner.anchor.borrow_mut() = Some(anchor);
    }

    /// Provided values visible where the scope last started.
    pub(crate) fn locals(&self) -> LocalContext {
        self.inner.locals.borrow().clone()
    }

    pub(crate) fn set_locals(&self, locals: LocalContext) {
        *self.inner.locals.borrow_mut() = locals;
    }

    pub(crate) fn mark_invalid(&self) {
        self.inner.invalid.set(true);
    }

    pub(crate) fn mark_valid(&self) {
        self.inner.invalid.set(false);
    }

    /// Schedules this scope for the next frame.
    pub fn invalidate(&self) {
        self.inner.sink.invalidate(self.inner.id);
    }

    /// Thread-safe handle that invalidates this scope.
    pub fn invalidator(&self) -> Invalidator {
        Invalidator {
            scope: self.inner.id,
            sink: self.inner.sink.clone(),
        }
    }

    pub(crate) fn set_restart(&self, restart: RestartFn) {
        *self.inner.restart.borrow_mut() = Some(restart);
    }

    pub fn has_restart(&self) -> bool {
        self.inner.restart.borrow().is_some()
    }

    /// Re-runs the scope's body. Returns `false` when no restart closure was recorded.
    ///
    /// Must be called without the composer borrowed.
    pub(crate) fn run_restart(&self) -> bool {
        let restart = self.inner.restart.borrow().clone();
        match restart {
            Some(restart) => {
                (restart.borrow_mut())();
                true
            }
            None => false,
        }
    }

    pub(crate) fn observe(&self, state: StateId, handle: sync::Weak<dyn ObservedState>) {
        self.inner.observed.borrow_mut().insert(state, handle);
    }

    /// Forgets every subscription; the next run records them afresh.
    pub(crate) fn reset_observations(&self) {
        let observed: Vec<sync::Weak<dyn ObservedState>> = self
            .inner
            .observed
            .borrow_mut()
            .drain()
            .map(|(_, state)| state)
            .collect();
        for state in observed {
            if let Some(state) = state.upgrade() {
                state.remove_observer(self.inner.id);
            }
        }
    }

    pub fn observed_count(&self) -> usize {
        self.inner.observed.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RecomposeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecomposeScope")
            .field("id", &self.inner.id)
            .field("location", &self.location())
            .field("invalid", &self.is_invalid())
            .finish()
    }
}

/// `Send + Sync` handle requesting a restart of one scope.
#[derive(Clone)]
pub struct Invalidator {
    scope: ScopeId,
    sink: InvalidationSink,
}

impl Invalidator {
    pub fn invalidate(&self) {
        self.sink.invalidate(self.scope);
    }

    pub fn scope_id(&self) -> ScopeId {
        self.scope
    }
}
