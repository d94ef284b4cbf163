//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides concrete implementations of the platform
//! abstraction traits defined in `compose-core`, plus a small frame pump
//! for hosts that drive frames from their own loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use compose_core::{Clock, FrameClock, Runtime, RuntimeHandle, RuntimeScheduler};

type FrameWaker = Arc<dyn Fn() + Send + Sync + 'static>;

/// Scheduler that records frame requests and optionally wakes the host.
pub struct StdScheduler {
    frame_requested: AtomicBool,
    frame_waker: RwLock<Option<FrameWaker>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self {
            frame_requested: AtomicBool::new(false),
            frame_waker: RwLock::new(None),
        }
    }

    /// Returns whether a frame has been requested since the last call.
    pub fn take_frame_request(&self) -> bool {
        self.frame_requested.swap(false, Ordering::SeqCst)
    }

    /// Registers a waker that will be invoked whenever a new frame is scheduled.
    ///
    /// The waker may run on any thread that invalidates state.
    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self
            .frame_waker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(waker));
    }

    /// Clears any registered frame waker.
    pub fn clear_frame_waker(&self) {
        *self
            .frame_waker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn wake(&self) {
        let waker = self
            .frame_waker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field(
                "frame_requested",
                &self.frame_requested.load(Ordering::SeqCst),
            )
            .finish()
    }
}

impl RuntimeScheduler for StdScheduler {
    fn schedule_frame(&self) {
        self.frame_requested.store(true, Ordering::SeqCst);
        self.wake();
    }
}

/// Clock implementation backed by [`std::time`].
#[derive(Debug, Default, Clone)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn elapsed_nanos(&self, since: Self::Instant) -> u64 {
        u64::try_from(since.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

impl StdClock {
    /// Returns the elapsed time as a [`Duration`] for convenience.
    pub fn elapsed(&self, since: Instant) -> Duration {
        since.elapsed()
    }
}

/// Convenience container bundling the standard scheduler, clock and runtime.
#[derive(Clone)]
pub struct StdRuntime {
    scheduler: Arc<StdScheduler>,
    clock: Arc<StdClock>,
    runtime: Runtime,
    started: Instant,
}

impl StdRuntime {
    /// Creates a new standard runtime instance.
    pub fn new() -> Self {
        let scheduler = Arc::new(StdScheduler::default());
        let clock = Arc::new(StdClock);
        let runtime = Runtime::new(scheduler.clone());
        Self {
            started: clock.now(),
            scheduler,
            clock,
            runtime,
        }
    }

    /// Returns a [`compose_core::Runtime`] configured with the standard scheduler.
    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn frame_clock(&self) -> FrameClock {
        self.runtime.frame_clock()
    }

    pub fn scheduler(&self) -> Arc<StdScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn clock(&self) -> Arc<StdClock> {
        Arc::clone(&self.clock)
    }

    /// Returns whether a frame was requested since the last poll.
    pub fn take_frame_request(&self) -> bool {
        self.scheduler.take_frame_request()
    }

    /// Registers a waker to be called when the runtime schedules a new frame.
    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.scheduler.set_frame_waker(waker);
    }

    /// Clears any previously registered frame waker.
    pub fn clear_frame_waker(&self) {
        self.scheduler.clear_frame_waker();
    }

    /// Drains pending frame callbacks using the provided frame timestamp in nanoseconds.
    pub fn drain_frame_callbacks(&self, frame_time_nanos: u64) {
        self.runtime.drain_frame_callbacks(frame_time_nanos);
    }

    /// Runs one frame at `frame_time_nanos`: polls woken UI tasks, fires
    /// frame callbacks, then polls the tasks those callbacks woke.
    pub fn pump_at(&self, frame_time_nanos: u64) {
        self.runtime.drain_ui();
        self.runtime.drain_frame_callbacks(frame_time_nanos);
        self.runtime.drain_ui();
    }

    /// Runs one frame stamped with the time since this runtime was created.
    /// Returns the frame time used.
    pub fn pump(&self) -> u64 {
        let frame_time_nanos = self.clock.elapsed_nanos(self.started);
        log::trace!("pumping frame at {frame_time_nanos}ns");
        self.pump_at(frame_time_nanos);
        frame_time_nanos
    }

    /// Pumps frames until nothing is pending or `max_frames` ran. Returns the
    /// number of frames pumped.
    pub fn pump_until_idle(&self, max_frames: usize) -> usize {
        let mut frames = 0;
        while frames < max_frames && self.is_busy() {
            self.take_frame_request();
            self.pump();
            frames += 1;
        }
        frames
    }

    fn is_busy(&self) -> bool {
        self.runtime.needs_frame() || self.runtime.has_invalidations()
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::atomic::AtomicUsize;

    use compose_core::{
        emit_node, Composition, MemoryApplier, MemoryNode, MutableState, Recomposer,
    };

    use super::*;

    #[test]
    fn state_write_requests_a_frame_and_wakes_the_host() {
        let runtime = StdRuntime::new();
        let wakes = Arc::new(AtomicUsize::new(0));
        {
            let wakes = wakes.clone();
            runtime.set_frame_waker(move || {
                wakes.fetch_add(1, Ordering::SeqCst);
            });
        }
        let state = MutableState::new(0, &runtime.runtime_handle());
        let mut composition = Composition::new(MemoryApplier::new(), &runtime.runtime());
        {
            let state = state.clone();
            composition
                .set_content(move || {
                    let _ = state.get();
                })
                .expect("initial composition");
        }
        runtime.take_frame_request();

        std::thread::spawn(move || state.set(1))
            .join()
            .expect("writer thread");

        assert!(runtime.take_frame_request());
        assert!(!runtime.take_frame_request());
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        runtime.clear_frame_waker();
    }

    #[test]
    fn pump_drives_the_launched_recomposer() {
        let runtime = StdRuntime::new();
        let recomposer = Recomposer::new(&runtime.runtime());
        let composition = Rc::new(RefCell::new(Composition::new(
            MemoryApplier::new(),
            &runtime.runtime(),
        )));
        recomposer.register(&composition);
        let _task = recomposer.launch().expect("runtime alive");

        let state = MutableState::new(0, &runtime.runtime_handle());
        let runs = Rc::new(Cell::new(0));
        {
            let state = state.clone();
            let runs = runs.clone();
            composition
                .borrow_mut()
                .set_content(move || {
                    runs.set(runs.get() + 1);
                    let value = state.get();
                    emit_node(|| MemoryNode::new(value.to_string()), || {});
                })
                .expect("initial composition");
        }
        runtime.pump_until_idle(4);
        assert_eq!(runs.get(), 1);

        state.set(2);
        let frames = runtime.pump_until_idle(4);

        assert!(frames >= 1);
        assert_eq!(runs.get(), 2);
        assert!(!runtime.runtime().has_invalidations());
    }

    #[test]
    fn clock_measures_elapsed_nanos() {
        let clock = StdClock;
        let start = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.elapsed_nanos(start) >= 2_000_000);
        assert!(clock.elapsed(start) >= Duration::from_millis(2));
    }
}
