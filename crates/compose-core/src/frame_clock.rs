use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::runtime::RuntimeHandle;
use crate::FrameCallbackId;

/// Frame-time source backed by the runtime's frame callbacks.
///
/// The host drives it by calling
/// [`drain_frame_callbacks`](crate::Runtime::drain_frame_callbacks) once per frame.
#[derive(Clone)]
pub struct FrameClock {
    runtime: RuntimeHandle,
}

impl FrameClock {
    pub fn new(runtime: RuntimeHandle) -> Self {
        Self { runtime }
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.clone()
    }

    pub fn with_frame_nanos(
        &self,
        callback: impl FnOnce(u64) + 'static,
    ) -> FrameCallbackRegistration {
        let mut callback_opt = Some(callback);
        let runtime = self.runtime.clone();
        match runtime.register_frame_callback(move |time| {
            if let Some(callback) = callback_opt.take() {
                callback(time);
            }
        }) {
            Some(id) => FrameCallbackRegistration::new(runtime, id),
            None => FrameCallbackRegistration::inactive(runtime),
        }
    }

    pub fn with_frame_millis(
        &self,
        callback: impl FnOnce(u64) + 'static,
    ) -> FrameCallbackRegistration {
        self.with_frame_nanos(move |nanos| {
            let millis = nanos / 1_000_000;
            callback(millis);
        })
    }

    /// Suspends until the next frame, resolving to its timestamp in nanoseconds.
    pub fn next_frame(&self) -> NextFrame {
        NextFrame {
            clock: self.clone(),
            shared: Rc::new(NextFrameState::default()),
            registration: None,
        }
    }
}

#[derive(Default)]
struct NextFrameState {
    time: Cell<Option<u64>>,
    waker: RefCell<Option<Waker>>,
}

/// Future returned by [`FrameClock::next_frame`].
///
/// Stays pending forever once the runtime is gone.
pub struct NextFrame {
    clock: FrameClock,
    shared: Rc<NextFrameState>,
    registration: Option<FrameCallbackRegistration>,
}

impl Future for NextFrame {
    type Output = u64;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<u64> {
        if let Some(time) = self.shared.time.take() {
            self.registration = None;
            return Poll::Ready(time);
        }
        *self.shared.waker.borrow_mut() = Some(cx.waker().clone());
        if self.registration.is_none() {
            let shared = Rc::clone(&self.shared);
            let registration = self.clock.with_frame_nanos(move |time| {
                shared.time.set(Some(time));
                if let Some(waker) = shared.waker.borrow_mut().take() {
                    waker.wake();
                }
            });
            self.registration = Some(registration);
        }
        Poll::Pending
    }
}

pub struct FrameCallbackRegistration {
    runtime: RuntimeHandle,
    id: Option<FrameCallbackId>,
}

impl FrameCallbackRegistration {
    fn new(runtime: RuntimeHandle, id: FrameCallbackId) -> Self {
        Self {
            runtime,
            id: Some(id),
        }
    }

    fn inactive(runtime: RuntimeHandle) -> Self {
        Self { runtime, id: None }
    }

    pub fn cancel(mut self) {
        if let Some(id) = self.id.take() {
            self.runtime.cancel_frame_callback(id);
        }
    }
}

impl Drop for FrameCallbackRegistration {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.runtime.cancel_frame_callback(id);
        }
    }
}
