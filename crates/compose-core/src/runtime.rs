use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

use futures_task::ArcWake;

use crate::collections::map::HashMap;
use crate::collections::OrderedSet;
use crate::frame_clock::FrameClock;
use crate::platform::RuntimeScheduler;
use crate::scope::{RecomposeScope, ScopeInner};
use crate::{FrameCallbackId, ScopeId};

const MIN_SCOPE_SWEEP: usize = 64;

/// Thread-safe entry point for invalidations.
///
/// Producers never block: ids go into an unbounded channel that the
/// composition thread drains at the next frame.
#[derive(Clone)]
pub struct InvalidationSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    sender: Sender<ScopeId>,
    scheduler: Arc<dyn RuntimeScheduler>,
    work_waker: Mutex<Option<Waker>>,
}

impl InvalidationSink {
    fn new(sender: Sender<ScopeId>, scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                sender,
                scheduler,
                work_waker: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn invalidate(&self, scope: ScopeId) {
        if self.inner.sender.send(scope).is_err() {
            log::trace!("runtime gone; dropping invalidation of scope {scope}");
            return;
        }
        let waker = self
            .inner
            .work_waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(waker) = waker {
            waker.wake();
        }
        self.inner.scheduler.schedule_frame();
    }

    fn register_waker(&self, waker: &Waker) {
        *self
            .inner
            .work_waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(waker.clone());
    }
}

type UiFuture = Pin<Box<dyn Future<Output = ()> + 'static>>;
type UiTaskId = u64;

struct UiTaskWaker {
    id: UiTaskId,
    ready: Arc<Mutex<VecDeque<UiTaskId>>>,
    scheduler: Arc<dyn RuntimeScheduler>,
}

impl ArcWake for UiTaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self
            .ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(arc_self.id);
        arc_self.scheduler.schedule_frame();
    }
}

pub(crate) struct FrameCallbackEntry {
    id: FrameCallbackId,
    callback: Option<Box<dyn FnOnce(u64) + 'static>>,
}

pub(crate) struct RuntimeInner {
    scheduler: Arc<dyn RuntimeScheduler>,
    sink: InvalidationSink,
    receiver: Receiver<ScopeId>,
    pending: RefCell<OrderedSet<ScopeId>>,
    scopes: RefCell<HashMap<ScopeId, Weak<ScopeInner>>>, // FUTURE(no_std): replace HashMap with slab.
    scope_sweep_at: Cell<usize>,
    needs_frame: Cell<bool>,
    frame_callbacks: RefCell<VecDeque<FrameCallbackEntry>>, // FUTURE(no_std): migrate to ring buffer.
    next_frame_callback_id: Cell<u64>,
    ui_tasks: RefCell<HashMap<UiTaskId, UiFuture>>,
    ui_ready: Arc<Mutex<VecDeque<UiTaskId>>>,
    next_ui_task_id: Cell<u64>,
}

impl RuntimeInner {
    fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sink: InvalidationSink::new(sender, scheduler.clone()),
            scheduler,
            receiver,
            pending: RefCell::new(OrderedSet::default()),
            scopes: RefCell::new(HashMap::default()),
            scope_sweep_at: Cell::new(MIN_SCOPE_SWEEP),
            needs_frame: Cell::new(false),
            frame_callbacks: RefCell::new(VecDeque::new()),
            next_frame_callback_id: Cell::new(1),
            ui_tasks: RefCell::new(HashMap::default()),
            ui_ready: Arc::new(Mutex::new(VecDeque::new())),
            next_ui_task_id: Cell::new(1),
        }
    }

    fn schedule(&self) {
        self.needs_frame.set(true);
        self.scheduler.schedule_frame();
    }

    fn collect_invalidations(&self) {
        let mut pending = self.pending.borrow_mut();
        for id in self.receiver.try_iter() {
            pending.insert(id);
        }
    }

    fn has_invalidations(&self) -> bool {
        self.collect_invalidations();
        !self.pending.borrow().is_empty()
    }

    fn take_invalid_scopes(&self) -> Vec<RecomposeScope> {
        self.collect_invalidations();
        let ids: Vec<ScopeId> = self.pending.borrow_mut().drain(..).collect();
        let mut scopes = self.scopes.borrow_mut();
        let mut live = Vec::with_capacity(ids.len());
        for id in ids {
            match scopes.get(&id).and_then(Weak::upgrade) {
                Some(inner) => {
                    let scope = RecomposeScope::from_inner(inner);
                    scope.mark_invalid();
                    live.push(scope);
                }
                None => {
                    scopes.remove(&id);
                    log::trace!("dropping invalidation of disposed scope {id}");
                }
            }
        }
        live
    }

    fn requeue(&self, scopes: &[RecomposeScope]) {
        let mut pending = self.pending.borrow_mut();
        for scope in scopes {
            pending.insert(scope.id());
        }
    }

    fn register_scope(&self, scope: &RecomposeScope) {
        let mut scopes = self.scopes.borrow_mut();
        if scopes.len() >= self.scope_sweep_at.get() {
            scopes.retain(|_, weak| weak.strong_count() > 0);
            self.scope_sweep_at
                .set((scopes.len() * 2).max(MIN_SCOPE_SWEEP));
        }
        scopes.insert(scope.id(), scope.downgrade());
    }

    fn register_frame_callback(&self, callback: Box<dyn FnOnce(u64) + 'static>) -> FrameCallbackId {
        let id = self.next_frame_callback_id.get();
        self.next_frame_callback_id.set(id + 1);
        self.frame_callbacks
            .borrow_mut()
            .push_back(FrameCallbackEntry {
                id,
                callback: Some(callback),
            });
        self.schedule();
        id
    }

    fn cancel_frame_callback(&self, id: FrameCallbackId) {
        let mut callbacks = self.frame_callbacks.borrow_mut();
        if let Some(index) = callbacks.iter().position(|entry| entry.id == id) {
            callbacks.remove(index);
        }
        if callbacks.is_empty() {
            self.needs_frame.set(false);
        }
    }

    fn drain_frame_callbacks(&self, frame_time_nanos: u64) {
        let pending: Vec<Box<dyn FnOnce(u64) + 'static>> = self
            .frame_callbacks
            .borrow_mut()
            .drain(..)
            .filter_map(|mut entry| entry.callback.take())
            .collect();
        for callback in pending {
            callback(frame_time_nanos);
        }
        if self.frame_callbacks.borrow().is_empty() {
            self.needs_frame.set(false);
        }
    }

    fn has_frame_callbacks(&self) -> bool {
        !self.frame_callbacks.borrow().is_empty()
    }

    fn spawn_ui(&self, future: UiFuture) -> UiTaskId {
        let id = self.next_ui_task_id.get();
        self.next_ui_task_id.set(id + 1);
        self.ui_tasks.borrow_mut().insert(id, future);
        self.ui_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(id);
        self.scheduler.schedule_frame();
        id
    }

    fn cancel_ui(&self, id: UiTaskId) {
        let removed = self.ui_tasks.borrow_mut().remove(&id);
        drop(removed);
    }

    fn next_ready_task(&self) -> Option<UiTaskId> {
        self.ui_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn drain_ui(&self) {
        while let Some(id) = self.next_ready_task() {
            let task = self.ui_tasks.borrow_mut().remove(&id);
            let Some(mut task) = task else {
                continue;
            };
            let waker = futures_task::waker(Arc::new(UiTaskWaker {
                id,
                ready: self.ui_ready.clone(),
                scheduler: self.scheduler.clone(),
            }));
            let mut cx = Context::from_waker(&waker);
            if task.as_mut().poll(&mut cx).is_pending() {
                self.ui_tasks.borrow_mut().insert(id, task);
            }
        }
    }

    fn has_ui_tasks(&self) -> bool {
        !self.ui_tasks.borrow().is_empty()
    }
}

/// Composition-thread half of the runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>, // FUTURE(no_std): replace Rc with arena-managed runtime storage.
}

impl Runtime {
    pub fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(scheduler)),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Rc::downgrade(&self.inner))
    }

    pub fn needs_frame(&self) -> bool {
        self.inner.needs_frame.get()
    }

    pub fn frame_clock(&self) -> FrameClock {
        FrameClock::new(self.handle())
    }

    pub fn invalidation_sink(&self) -> InvalidationSink {
        self.inner.sink.clone()
    }

    pub fn has_invalidations(&self) -> bool {
        self.inner.has_invalidations()
    }

    pub fn drain_ui(&self) {
        self.inner.drain_ui();
    }

    pub fn drain_frame_callbacks(&self, frame_time_nanos: u64) {
        self.inner.drain_frame_callbacks(frame_time_nanos);
    }
}

#[derive(Default)]
pub struct DefaultScheduler;

impl RuntimeScheduler for DefaultScheduler {
    fn schedule_frame(&self) {}
}

#[cfg(test)]
#[derive(Default)]
pub struct TestScheduler {
    requests: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl TestScheduler {
    pub fn requests(&self) -> usize {
        self.requests.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl RuntimeScheduler for TestScheduler {
    fn schedule_frame(&self) {
        self.requests
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Weak handle to a [`Runtime`]; operations are no-ops once it is dropped.
#[derive(Clone)]
pub struct RuntimeHandle(pub(crate) Weak<RuntimeInner>);

impl RuntimeHandle {
    pub fn schedule(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.schedule();
        }
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn invalidation_sink(&self) -> Option<InvalidationSink> {
        self.0.upgrade().map(|inner| inner.sink.clone())
    }

    pub fn register_frame_callback(
        &self,
        callback: impl FnOnce(u64) + 'static,
    ) -> Option<FrameCallbackId> {
        self.0
            .upgrade()
            .map(|inner| inner.register_frame_callback(Box::new(callback)))
    }

    pub fn cancel_frame_callback(&self, id: FrameCallbackId) {
        if let Some(inner) = self.0.upgrade() {
            inner.cancel_frame_callback(id);
        }
    }

    pub fn drain_frame_callbacks(&self, frame_time_nanos: u64) {
        if let Some(inner) = self.0.upgrade() {
            inner.drain_frame_callbacks(frame_time_nanos);
        }
    }

    pub fn has_frame_callbacks(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.has_frame_callbacks())
            .unwrap_or(false)
    }

    pub fn frame_clock(&self) -> FrameClock {
        FrameClock::new(self.clone())
    }

    /// Runs `future` on the composition thread's executor, polled by [`drain_ui`](Self::drain_ui).
    pub fn spawn_ui(&self, future: impl Future<Output = ()> + 'static) -> Option<UiTask> {
        let inner = self.0.upgrade()?;
        let id = inner.spawn_ui(Box::pin(future));
        Some(UiTask {
            id,
            runtime: self.clone(),
        })
    }

    /// Polls every UI task that has been woken since the last drain.
    pub fn drain_ui(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.drain_ui();
        }
    }

    pub fn has_ui_tasks(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.has_ui_tasks())
            .unwrap_or(false)
    }

    pub fn has_invalidations(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.has_invalidations())
            .unwrap_or(false)
    }

    /// Drains the pending set, returning live scopes marked invalid.
    pub(crate) fn take_invalid_scopes(&self) -> Vec<RecomposeScope> {
        self.0
            .upgrade()
            .map(|inner| inner.take_invalid_scopes())
            .unwrap_or_default()
    }

    pub(crate) fn requeue(&self, scopes: &[RecomposeScope]) {
        if let Some(inner) = self.0.upgrade() {
            inner.requeue(scopes);
        }
    }

    pub(crate) fn register_scope(&self, scope: &RecomposeScope) {
        if let Some(inner) = self.0.upgrade() {
            inner.register_scope(scope);
        }
    }

    /// Resolves once at least one invalidation is pending.
    pub fn invalidations(&self) -> PendingInvalidations {
        PendingInvalidations {
            runtime: self.clone(),
        }
    }
}

/// Future returned by [`RuntimeHandle::invalidations`].
pub struct PendingInvalidations {
    runtime: RuntimeHandle,
}

impl Future for PendingInvalidations {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(inner) = self.runtime.0.upgrade() else {
            return Poll::Pending;
        };
        if inner.has_invalidations() {
            return Poll::Ready(());
        }
        inner.sink.register_waker(cx.waker());
        if inner.has_invalidations() {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

/// Handle to a future spawned with [`RuntimeHandle::spawn_ui`].
///
/// Dropping the handle detaches the task; [`cancel`](Self::cancel) drops the future.
pub struct UiTask {
    id: UiTaskId,
    runtime: RuntimeHandle,
}

impl UiTask {
    pub fn cancel(self) {
        if let Some(inner) = self.runtime.0.upgrade() {
            inner.cancel_ui(self.id);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.runtime
            .0
            .upgrade()
            .map(|inner| !inner.ui_tasks.borrow().contains_key(&self.id))
            .unwrap_or(true)
    }
}
