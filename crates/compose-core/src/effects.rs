//! Effects: work that runs once the pass that produced it has been applied.
//!
//! All three are built on remembered [`LifecycleObserver`]s, so they follow
//! the group that holds them. Moving the group keeps an effect running;
//! removing it, or changing its keys, tears it down.

use std::cell::RefCell;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;

use crate::lifecycle::LifecycleObserver;
use crate::runtime::{RuntimeHandle, UiTask};
use crate::{remember_observer, with_current_composer, with_key};

type EffectBody = Box<dyn FnOnce(DisposableEffectScope) -> DisposableEffectResult>;
type Cleanup = Box<dyn FnOnce()>;
type LaunchBody = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()>>>>;

/// Runs `effect` after every pass in which the calling composable ran.
#[allow(non_snake_case)]
pub fn SideEffect(effect: impl FnOnce() + 'static) {
    with_current_composer(|composer| composer.record_side_effect(effect));
}

/// Receiver of a [`DisposableEffect`] body.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisposableEffectScope;

impl DisposableEffectScope {
    pub fn on_dispose(&self, cleanup: impl FnOnce() + 'static) -> DisposableEffectResult {
        DisposableEffectResult {
            cleanup: Some(Box::new(cleanup)),
        }
    }
}

/// Cleanup returned from a [`DisposableEffect`] body.
#[derive(Default)]
pub struct DisposableEffectResult {
    cleanup: Option<Cleanup>,
}

struct DisposableEffectState {
    effect: RefCell<Option<EffectBody>>,
    cleanup: RefCell<Option<Cleanup>>,
}

impl LifecycleObserver for DisposableEffectState {
    fn on_enter(&self) {
        let effect = self.effect.borrow_mut().take();
        if let Some(effect) = effect {
            let result = effect(DisposableEffectScope);
            *self.cleanup.borrow_mut() = result.cleanup;
        }
    }

    fn on_leave(&self) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

/// Runs `effect` once its group is applied and again whenever `keys` change,
/// calling the previous cleanup first. The last cleanup runs when the
/// calling group leaves the composition.
#[allow(non_snake_case)]
#[track_caller]
pub fn DisposableEffect<K: Hash + ?Sized>(
    keys: &K,
    effect: impl FnOnce(DisposableEffectScope) -> DisposableEffectResult + 'static,
) {
    with_key(keys, || {
        remember_observer(|| DisposableEffectState {
            effect: RefCell::new(Some(Box::new(effect))),
            cleanup: RefCell::new(None),
        });
    });
}

struct LaunchedEffectState {
    runtime: RuntimeHandle,
    launch: RefCell<Option<LaunchBody>>,
    task: RefCell<Option<UiTask>>,
}

impl LifecycleObserver for LaunchedEffectState {
    fn on_enter(&self) {
        let launch = self.launch.borrow_mut().take();
        if let Some(launch) = launch {
            *self.task.borrow_mut() = self.runtime.spawn_ui(launch());
        }
    }

    fn on_leave(&self) {
        let task = self.task.borrow_mut().take();
        if let Some(task) = task {
            task.cancel();
        }
    }
}

/// Spawns the future built by `block` on the runtime's UI executor once its
/// group is applied. Changing `keys` cancels the running future and starts a
/// new one; leaving the composition cancels it.
#[allow(non_snake_case)]
#[track_caller]
pub fn LaunchedEffect<K, F>(keys: &K, block: impl FnOnce() -> F + 'static)
where
    K: Hash + ?Sized,
    F: Future<Output = ()> + 'static,
{
    let runtime = with_current_composer(|composer| composer.runtime_handle());
    with_key(keys, || {
        remember_observer(|| LaunchedEffectState {
            runtime,
            launch: RefCell::new(Some(Box::new(move || {
                Box::pin(block()) as Pin<Box<dyn Future<Output = ()>>>
            }))),
            task: RefCell::new(None),
        });
    });
}
