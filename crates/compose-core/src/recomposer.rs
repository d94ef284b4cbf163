//! Frame-driven recomposition of registered compositions.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::applier::NodeError;
use crate::runtime::{Runtime, RuntimeHandle, UiTask};
use crate::scope::RecomposeScope;
use crate::CompositionId;

/// A composition the [`Recomposer`] can restart scopes in.
pub trait Recompose {
    fn composition_id(&self) -> CompositionId;
    fn recompose_scopes(&mut self, scopes: Vec<RecomposeScope>) -> Result<(), NodeError>;
}

struct RecomposerInner {
    runtime: RuntimeHandle,
    compositions: RefCell<Vec<Weak<RefCell<dyn Recompose>>>>,
    frames: Cell<u64>,
}

/// Coalesces invalidations and restarts them once per frame.
///
/// Every invalidation that arrives before a frame is handled by that frame's
/// single pass; frames with nothing pending do no work.
#[derive(Clone)]
pub struct Recomposer {
    inner: Rc<RecomposerInner>,
}

impl Recomposer {
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            inner: Rc::new(RecomposerInner {
                runtime: runtime.handle(),
                compositions: RefCell::new(Vec::new()),
                frames: Cell::new(0),
            }),
        }
    }

    /// Tracks `composition` until it is dropped.
    pub fn register<C: Recompose + 'static>(&self, composition: &Rc<RefCell<C>>) {
        let composition: Rc<RefCell<dyn Recompose>> = composition.clone();
        self.inner
            .compositions
            .borrow_mut()
            .push(Rc::downgrade(&composition));
    }

    /// Frames that found pending work.
    pub fn frames_with_work(&self) -> u64 {
        self.inner.frames.get()
    }

    /// Drains the pending invalidations and recomposes every affected
    /// composition once. Returns the number of scopes handed out.
    pub fn recompose_now(&self) -> Result<usize, NodeError> {
        let mut scopes = self.inner.runtime.take_invalid_scopes();
        if scopes.is_empty() {
            return Ok(0);
        }
        self.inner.frames.set(self.inner.frames.get() + 1);
        let total = scopes.len();

        let compositions: Vec<Rc<RefCell<dyn Recompose>>> = {
            let mut registered = self.inner.compositions.borrow_mut();
            registered.retain(|weak| weak.strong_count() > 0);
            registered.iter().filter_map(Weak::upgrade).collect()
        };

        let mut result = Ok(());
        for composition in compositions {
            let id = composition.borrow().composition_id();
            let (own, rest): (Vec<_>, Vec<_>) =
                scopes.into_iter().partition(|scope| scope.owner() == id);
            scopes = rest;
            if own.is_empty() {
                continue;
            }
            if let Err(err) = composition.borrow_mut().recompose_scopes(own) {
                log::error!("failed to apply recomposition of composition {id}: {err}");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        if !scopes.is_empty() {
            log::warn!(
                "dropping {} invalidated scopes with no registered composition",
                scopes.len()
            );
        }
        result.map(|()| total)
    }

    /// Recomposes on every frame that follows an invalidation. Never returns
    /// while the runtime is alive.
    pub async fn run(self) {
        let clock = self.inner.runtime.frame_clock();
        loop {
            self.inner.runtime.invalidations().await;
            let frame_time = clock.next_frame().await;
            log::trace!("recomposer frame at {frame_time}ns");
            if let Err(err) = self.recompose_now() {
                log::error!("recomposition failed: {err}");
            }
        }
    }

    /// Spawns [`run`](Self::run) on the runtime's UI executor.
    pub fn launch(&self) -> Option<UiTask> {
        self.inner.runtime.spawn_ui(self.clone().run())
    }
}
