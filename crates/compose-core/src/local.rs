//! Values provided to a subtree without passing them through every call.
//!
//! A [`CompositionLocalProvider`](crate::CompositionLocalProvider) binds
//! values for the content it wraps. Readers below it see the innermost
//! binding, or the local's default when nothing provides it. Every restart
//! scope remembers the bindings visible where it started, so a scope restarted
//! on its own reads the same values it saw when its parent last ran. When a
//! provided value changes, every restart group inside the provider runs again
//! in the same pass.

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::collections::map::HashMap;
use crate::composer::Composer;

pub(crate) type LocalKey = usize;

static NEXT_LOCAL_KEY: AtomicUsize = AtomicUsize::new(1);

/// The bindings visible at one position of the tree.
#[derive(Clone, Default)]
pub(crate) struct LocalContext {
    values: Rc<HashMap<LocalKey, Rc<dyn Any>>>, // FUTURE(no_std): replace with a persistent map.
}

impl LocalContext {
    pub(crate) fn get(&self, key: LocalKey) -> Option<Rc<dyn Any>> {
        self.values.get(&key).cloned()
    }

    /// A context holding these bindings plus `entries`, which win on conflict.
    pub(crate) fn extended(&self, entries: Vec<(LocalKey, Rc<dyn Any>)>) -> Self {
        if entries.is_empty() {
            return self.clone();
        }
        let mut values = (*self.values).clone();
        values.extend(entries);
        Self {
            values: Rc::new(values),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }
}

impl fmt::Debug for LocalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalContext")
            .field("bindings", &self.len())
            .finish()
    }
}

/// A key for a value provided to a subtree. Create one with
/// [`composition_local_of`] and keep it in a `static` or `thread_local!`.
pub struct CompositionLocal<T> {
    key: LocalKey,
    default: Rc<dyn Fn() -> T>,
}

impl<T> Clone for CompositionLocal<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            default: Rc::clone(&self.default),
        }
    }
}

impl<T> PartialEq for CompositionLocal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for CompositionLocal<T> {}

impl<T> fmt::Debug for CompositionLocal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompositionLocal({})", self.key)
    }
}

impl<T: Clone + PartialEq + 'static> CompositionLocal<T> {
    /// Binds `value` to this local for a provider's content.
    pub fn provides(&self, value: T) -> ProvidedValue {
        let stored: Rc<dyn Any> = Rc::new(value.clone());
        ProvidedValue {
            key: self.key,
            value: stored,
            record: Box::new(move |composer: &mut Composer<'_>| composer.changed(&value)),
        }
    }

    /// The innermost provided value, or the default.
    ///
    /// Panics outside a composition.
    pub fn current(&self) -> T {
        crate::with_current_composer(|composer| composer.local_value(self.key))
            .and_then(|value| value.downcast_ref::<T>().cloned())
            .unwrap_or_else(|| self.default_value())
    }

    pub fn default_value(&self) -> T {
        (self.default)()
    }
}

/// Creates a local whose value is `default()` wherever no provider binds it.
pub fn composition_local_of<T: Clone + PartialEq + 'static>(
    default: impl Fn() -> T + 'static,
) -> CompositionLocal<T> {
    CompositionLocal {
        key: NEXT_LOCAL_KEY.fetch_add(1, Ordering::Relaxed),
        default: Rc::new(default),
    }
}

/// One binding handed to a provider.
pub struct ProvidedValue {
    key: LocalKey,
    value: Rc<dyn Any>,
    record: Box<dyn FnOnce(&mut Composer<'_>) -> bool>,
}

impl ProvidedValue {
    /// Stores the value in the provider's group; `true` when it differs from
    /// the previous pass.
    pub(crate) fn record(self, composer: &mut Composer<'_>) -> (LocalKey, Rc<dyn Any>, bool) {
        let ProvidedValue { key, value, record } = self;
        let changed = record(composer);
        (key, value, changed)
    }
}

impl fmt::Debug for ProvidedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProvidedValue({})", self.key)
    }
}
