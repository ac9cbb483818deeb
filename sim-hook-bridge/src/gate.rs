//! Invocation gate
//!
//! The single execution lock around every call that crosses into the
//! interpreter. One gate exists per [`Interpreter`](crate::Interpreter) and is
//! shared by every bridge bound to it.

use parking_lot::ReentrantMutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Scoped, re-entrant mutual exclusion for interpreter boundary calls
///
/// A callback that calls back into native code which in turn dispatches
/// another callback on the same thread re-acquires the gate instead of
/// deadlocking. Other threads block until the outermost holder returns.
#[derive(Debug, Default)]
pub struct InvocationGate {
    lock: ReentrantMutex<()>,
    acquisitions: AtomicU64,
}

impl InvocationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `body` while holding the gate
    ///
    /// The guard is released on every exit path, including `Err` returns from
    /// `body` and unwinding panics.
    pub fn with_lock<T>(&self, body: impl FnOnce() -> T) -> T {
        let _guard = self.lock.lock();
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        body()
    }

    /// True while any thread is inside [`with_lock`](Self::with_lock)
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// True when the calling thread is the current holder
    pub fn is_held_by_current_thread(&self) -> bool {
        self.lock.is_owned_by_current_thread()
    }

    /// Total number of acquisitions, nested ones included
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}
