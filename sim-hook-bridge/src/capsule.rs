//! Engine handles and capsules
//!
//! Scripts never see engine memory. The engine registers its state once and
//! gets back an [`EngineHandle`], an index into the [`HandleRegistry`]. At
//! each invocation the handle is wrapped in a [`Capsule`] that scripts can
//! only pass back into native functions, and only for the duration of that
//! invocation: once the call returns the capsule is expired and opening it
//! fails.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque index of engine state in a [`HandleRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(u64);

impl EngineHandle {
    pub(crate) fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine#{}", self.0)
    }
}

/// Interpreter-side wrapper of an [`EngineHandle`]
///
/// Clones share the same validity flag, so a copy stashed in a script global
/// expires together with the original.
#[derive(Debug, Clone)]
pub struct Capsule {
    handle: EngineHandle,
    live: Arc<AtomicBool>,
}

impl Capsule {
    pub(crate) fn new(handle: EngineHandle) -> Self {
        Self {
            handle,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// False once the invocation that created this capsule has returned
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn expire(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl fmt::Display for Capsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<capsule>")
    }
}

/// Reasons a native function could not open a capsule
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapsuleError {
    #[error("capsule used outside the callback invocation that received it")]
    Expired,

    #[error("{0} is no longer registered")]
    Released(EngineHandle),

    #[error("{0} does not hold the requested state type")]
    WrongType(EngineHandle),
}

/// Process-wide table of engine state reachable through capsules
#[derive(Default)]
pub struct HandleRegistry {
    next_id: AtomicU64,
    entries: RwLock<HashMap<u64, Arc<dyn Any + Send + Sync>>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register engine state and get the handle bridges will pass along
    pub fn register<T: Any + Send + Sync>(&self, state: Arc<T>) -> EngineHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(id, state);
        log::debug!("Registered engine handle engine#{}", id);
        EngineHandle(id)
    }

    /// Drop the registry's reference; returns false if it was already gone
    pub fn release(&self, handle: EngineHandle) -> bool {
        let removed = self.entries.write().remove(&handle.id()).is_some();
        if removed {
            log::debug!("Released engine handle {}", handle);
        }
        removed
    }

    pub fn contains(&self, handle: EngineHandle) -> bool {
        self.entries.read().contains_key(&handle.id())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a capsule to the typed engine state behind it
    pub fn open<T: Any + Send + Sync>(
        &self,
        capsule: &Capsule,
    ) -> std::result::Result<Arc<T>, CapsuleError> {
        if !capsule.is_live() {
            return Err(CapsuleError::Expired);
        }
        let entry = self
            .entries
            .read()
            .get(&capsule.handle.id())
            .cloned()
            .ok_or(CapsuleError::Released(capsule.handle))?;
        entry
            .downcast::<T>()
            .map_err(|_| CapsuleError::WrongType(capsule.handle))
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("live_handles", &self.len())
            .finish()
    }
}
