//! Platform abstraction traits for Compose runtime services.
//!
//! The host owns the frame loop. These traits let the runtime ask for a
//! frame and read time without depending on a particular event loop.

/// Requests frames from the host.
///
/// Invalidations may be raised from any thread, so implementations must be
/// safe to call concurrently and must not block.
pub trait RuntimeScheduler: Send + Sync {
    /// Request that the host schedule a new frame.
    fn schedule_frame(&self);
}

/// Provides timing information for the runtime.
pub trait Clock: Send + Sync {
    /// Instant type produced by this clock implementation.
    type Instant: Copy + Send + Sync;

    /// Returns the current instant.
    fn now(&self) -> Self::Instant;

    /// Returns the number of nanoseconds elapsed since `since`.
    fn elapsed_nanos(&self, since: Self::Instant) -> u64;
}
