//! Observable state shared between the composition thread and producers.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use crate::collections::map::HashSet;
use crate::runtime::{InvalidationSink, RuntimeHandle};
use crate::scope::ObservedState;
use crate::{try_with_current_composer, ScopeId, StateId};

struct StateInner<T> {
    value: RwLock<T>,
    observers: Mutex<HashSet<ScopeId>>,
    sink: Option<InvalidationSink>,
}

impl<T> ObservedState for StateInner<T> {
    fn remove_observer(&self, scope: ScopeId) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&scope);
    }
}

/// A value whose reads subscribe the composing scope and whose writes
/// invalidate every subscriber.
///
/// Clones share the value. Writes may come from any thread; they only queue
/// invalidations and never wait for the composer.
pub struct MutableState<T> {
    inner: Arc<StateInner<T>>,
}

impl<T: 'static> MutableState<T> {
    pub fn new(initial: T, runtime: &RuntimeHandle) -> Self {
        Self::from_parts(initial, runtime.invalidation_sink())
    }

    pub fn with_sink(initial: T, sink: InvalidationSink) -> Self {
        Self::from_parts(initial, Some(sink))
    }

    fn from_parts(initial: T, sink: Option<InvalidationSink>) -> Self {
        Self {
            inner: Arc::new(StateInner {
                value: RwLock::new(initial),
                observers: Mutex::new(HashSet::default()),
                sink,
            }),
        }
    }

    fn id(&self) -> StateId {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    fn record_read(&self) {
        let scope = try_with_current_composer(|composer| composer.current_recompose_scope())
            .flatten();
        let Some(scope) = scope else {
            return;
        };
        let inserted = self
            .inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scope.id());
        if inserted {
            let weak: Weak<StateInner<T>> = Arc::downgrade(&self.inner);
            let weak: Weak<dyn ObservedState> = weak;
            scope.observe(self.id(), weak);
        }
    }

    fn notify(&self) {
        let observers: Vec<ScopeId> = self
            .inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let Some(sink) = &self.inner.sink else {
            return;
        };
        for scope in observers {
            sink.invalidate(scope);
        }
    }

    /// Reads the value, subscribing the composing scope.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.record_read();
        let guard = self
            .inner
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn set(&self, value: T) {
        self.replace(value);
    }

    pub fn replace(&self, value: T) -> T {
        let previous = {
            let mut guard = self
                .inner
                .value
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, value)
        };
        self.notify();
        previous
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut guard = self
                .inner
                .value
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        };
        self.notify();
        result
    }

    pub fn observer_count(&self) -> usize {
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T: Clone + 'static> MutableState<T> {
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    pub fn value(&self) -> T {
        self.get()
    }

    /// Reads without subscribing.
    pub fn peek(&self) -> T {
        self.inner
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T> Clone for MutableState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for MutableState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.value.try_read() {
            Ok(value) => f.debug_tuple("MutableState").field(&*value).finish(),
            Err(_) => f.write_str("MutableState(<locked>)"),
        }
    }
}

impl<T> PartialEq for MutableState<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
