#![doc = r"Slot table, keyed reconciliation and recomposition runtime for Compose-RS."]

extern crate self as compose_core;

pub mod anchor;
pub mod applier;
pub mod changes;
pub mod collections;
pub mod composer;
pub mod composition;
pub mod effects;
pub mod frame_clock;
pub mod hash;
pub mod lifecycle;
pub mod local;
pub mod owned;
pub mod platform;
pub mod reader;
pub mod recomposer;
pub mod runtime;
pub mod scope;
pub mod slot_table;
pub mod state;
pub mod writer;

pub use anchor::Anchor;
pub use applier::{Applier, MemoryApplier, MemoryNode, NodeError, NodeRef};
pub use changes::{Change, ChangeList};
pub use composer::Composer;
pub use composition::{Composition, PassStats};
pub use effects::{
    DisposableEffect, DisposableEffectResult, DisposableEffectScope, LaunchedEffect, SideEffect,
};
pub use frame_clock::{FrameCallbackRegistration, FrameClock, NextFrame};
pub use hash::{hash_key, location_key};
pub use lifecycle::LifecycleObserver;
pub use local::{composition_local_of, CompositionLocal, ProvidedValue};
pub use owned::Owned;
pub use platform::{Clock, RuntimeScheduler};
pub use reader::SlotReader;
pub use recomposer::{Recompose, Recomposer};
pub use runtime::{DefaultScheduler, InvalidationSink, Runtime, RuntimeHandle, UiTask};
pub use scope::{Invalidator, RecomposeScope};
pub use slot_table::{KeyInfo, Removed, SlotRef, SlotTable};
pub use state::MutableState;
pub use writer::SlotWriter;

#[cfg(test)]
pub use runtime::TestScheduler;

use std::cell::{Cell, RefCell};
use std::hash::Hash;
use std::mem;
use std::panic::Location;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread_local;

pub type Key = u64;

pub type ScopeId = usize;
pub type CompositionId = usize;
pub(crate) type StateId = usize;
pub(crate) type FrameCallbackId = u64;

/// Key of the restart group wrapping a composition's root content.
pub const ROOT_KEY: Key = 100;

static NEXT_SCOPE_ID: AtomicUsize = AtomicUsize::new(1);
static NEXT_COMPOSITION_ID: AtomicUsize = AtomicUsize::new(1);

pub(crate) fn next_scope_id() -> ScopeId {
    NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn next_composition_id() -> CompositionId {
    NEXT_COMPOSITION_ID.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    static CURRENT_COMPOSER: RefCell<Vec<*mut ()>> = RefCell::new(Vec::new()); // FUTURE(no_std): replace Vec with fixed-capacity stack storage.
    static COMPOSER_BORROWED: Cell<bool> = const { Cell::new(false) };
}

pub(crate) fn push_composer(composer: &mut Composer<'_>) {
    let ptr = composer as *mut Composer<'_> as *mut ();
    CURRENT_COMPOSER.with(|stack| stack.borrow_mut().push(ptr));
}

pub(crate) fn pop_composer() {
    CURRENT_COMPOSER.with(|stack| {
        stack.borrow_mut().pop();
    });
}

fn current_composer_ptr() -> Option<*mut ()> {
    CURRENT_COMPOSER.with(|stack| stack.borrow().last().copied())
}

struct BorrowRelease;

impl Drop for BorrowRelease {
    fn drop(&mut self) {
        COMPOSER_BORROWED.with(|flag| flag.set(false));
    }
}

fn borrow_composer<R>(ptr: *mut (), f: impl FnOnce(&mut Composer<'_>) -> R) -> R {
    let _release = BorrowRelease;
    // SAFETY: `ptr` was pushed by `Composer::install`, which keeps the composer
    // alive and otherwise untouched until it pops the pointer again. The
    // borrow flag guarantees this is the only live reference.
    let composer = unsafe { &mut *(ptr as *mut Composer<'static>) };
    let composer: &mut Composer<'_> =
        unsafe { mem::transmute::<&mut Composer<'static>, &mut Composer<'_>>(composer) };
    f(composer)
}

/// Runs `f` against the innermost installed composer.
///
/// Panics when no composition is running on this thread, or when called
/// from inside another `with_current_composer`.
pub fn with_current_composer<R>(f: impl FnOnce(&mut Composer<'_>) -> R) -> R {
    let Some(ptr) = current_composer_ptr() else {
        panic!("no composer installed");
    };
    if COMPOSER_BORROWED.with(|flag| flag.replace(true)) {
        panic!("composer is already borrowed");
    }
    borrow_composer(ptr, f)
}

/// Like [`with_current_composer`], but `None` outside a composition or while
/// the composer is already borrowed.
pub fn try_with_current_composer<R>(f: impl FnOnce(&mut Composer<'_>) -> R) -> Option<R> {
    let ptr = current_composer_ptr()?;
    if COMPOSER_BORROWED.with(|flag| flag.replace(true)) {
        return None;
    }
    Some(borrow_composer(ptr, f))
}

pub fn start_group(key: Key) {
    with_current_composer(|composer| composer.start_group(key));
}

pub fn end_group() {
    with_current_composer(|composer| composer.end_group());
}

/// Starts the group of a restartable call; `true` when its body must run.
pub fn start_restart_group(key: Key) -> bool {
    with_current_composer(|composer| composer.start_restart_group(key))
}

/// Ends a restart group, recording how to re-run it.
pub fn end_restart_group(restart: impl FnMut() + 'static) {
    let restart: scope::RestartFn = Rc::new(RefCell::new(restart));
    with_current_composer(|composer| composer.end_restart_group(restart));
}

/// Skips the rest of the current group, restarting any invalidated scope
/// nested inside it.
pub fn skip_to_group_end() {
    let floor = with_current_composer(|composer| composer.begin_navigation());
    while let Some(scope) = with_current_composer(|composer| composer.navigate_to_next(floor)) {
        if !scope.run_restart() {
            with_current_composer(|composer| composer.skip_current_group());
        }
    }
    with_current_composer(|composer| composer.finish_navigation(floor));
}

pub(crate) fn compose_root(content: Rc<RefCell<dyn FnMut()>>) {
    start_restart_group(ROOT_KEY);
    (content.borrow_mut())();
    end_restart_group(move || compose_root(content.clone()));
}

/// Stores `value` and reports whether it differs from the previous pass.
pub fn changed<T: PartialEq + Clone + 'static>(value: &T) -> bool {
    with_current_composer(|composer| composer.changed(value))
}

/// Returns the value remembered at this position, computing it on first use.
pub fn remember<T: 'static>(init: impl FnOnce() -> T) -> Owned<T> {
    if let Some(owned) = with_current_composer(|composer| composer.remembered::<Owned<T>>()) {
        return owned;
    }
    let value = init();
    with_current_composer(|composer| composer.store_remembered(value))
}

/// Like [`remember`], recomputing whenever `keys` differ from the previous pass.
pub fn remember_with_keys<K, T>(keys: K, init: impl FnOnce() -> T) -> Owned<T>
where
    K: PartialEq + Clone + 'static,
    T: 'static,
{
    if with_current_composer(|composer| composer.changed(&keys)) {
        let value = init();
        return with_current_composer(|composer| composer.store_remembered(value));
    }
    remember(init)
}

/// Remembers a value that is told when it enters and leaves the composition.
pub fn remember_observer<T: LifecycleObserver + 'static>(init: impl FnOnce() -> T) -> Rc<T> {
    if let Some(value) = with_current_composer(|composer| composer.remembered::<Rc<T>>()) {
        return value;
    }
    let value = Rc::new(init());
    with_current_composer(|composer| composer.store_observer(value.clone()));
    value
}

/// Remembers a [`MutableState`] bound to the running composition's runtime.
pub fn mutable_state_of<T: 'static>(initial: T) -> MutableState<T> {
    let runtime = with_current_composer(|composer| composer.runtime_handle());
    remember(move || MutableState::new(initial, &runtime)).with(MutableState::clone)
}

/// Runs `content` in a group identified by `key` as well as by position.
#[track_caller]
pub fn with_key<K: Hash + ?Sized>(key: &K, content: impl FnOnce()) {
    let location = Location::caller();
    let group = location_key(location.file(), location.line(), location.column());
    let data_key = hash_key(key);
    with_current_composer(|composer| composer.start_keyed_group(group, data_key));
    content();
    end_group();
}

/// Makes `values` visible to `content` through [`CompositionLocal::current`].
#[allow(non_snake_case)]
#[track_caller]
pub fn CompositionLocalProvider(
    values: impl IntoIterator<Item = ProvidedValue>,
    content: impl FnOnce(),
) {
    let location = Location::caller();
    let key = location_key(location.file(), location.line(), location.column());
    let values: Vec<ProvidedValue> = values.into_iter().collect();
    with_current_composer(|composer| composer.start_providers(key, values));
    content();
    with_current_composer(|composer| composer.end_providers());
}

/// Emits a node. `factory` runs only when the node group is first inserted.
#[track_caller]
pub fn emit_node<N: 'static>(factory: impl FnOnce() -> N, content: impl FnOnce()) {
    let location = Location::caller();
    let key = location_key(location.file(), location.line(), location.column());
    let inserting = with_current_composer(|composer| {
        composer.start_node(key, None);
        composer.inserting()
    });
    if inserting {
        let node: NodeRef = Rc::new(factory());
        with_current_composer(|composer| composer.create_node(node));
    } else {
        with_current_composer(|composer| {
            composer.use_node();
        });
    }
    content();
    with_current_composer(|composer| composer.end_node());
}

/// Schedules `apply` on the current node when `value` changed since the last pass.
pub fn update_node<N: 'static, V: PartialEq + Clone + 'static>(
    value: V,
    apply: impl FnOnce(&N, &V) + 'static,
) {
    with_current_composer(|composer| {
        composer.update_node(value, move |node, value| {
            let node = crate::composer::downcast_node::<N>(node)?;
            apply(node, value);
            Ok(())
        })
    });
}

pub fn current_compound_key_hash() -> Key {
    with_current_composer(|composer| composer.current_compound_key_hash())
}

pub fn current_recompose_scope() -> Option<RecomposeScope> {
    with_current_composer(|composer| composer.current_recompose_scope())
}

/// Handle that restarts the enclosing restart group from any thread.
pub fn invalidator() -> Option<Invalidator> {
    current_recompose_scope().map(|scope| scope.invalidator())
}

#[cfg(test)]
#[path = "tests/composer_tests.rs"]
mod composer_tests;

#[cfg(test)]
#[path = "tests/recomposer_tests.rs"]
mod recomposer_tests;

#[cfg(test)]
#[path = "tests/effects_tests.rs"]
mod effects_tests;
