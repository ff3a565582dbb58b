//! Cancellation token for cooperative run shutdown
//!
//! The supervisor flips a stop flag; workers poll it between trials.
//! Because workers are separate processes, the flag usually lives in a
//! shared mapping and the token only borrows it.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Token checked by `WorkerContext::keep_running`
#[derive(Clone)]
pub struct CancellationToken {
    inner: CancellationInner,
}

#[derive(Clone)]
enum CancellationInner {
    /// Heap-allocated flag, process-local
    Owned(Arc<AtomicBool>),
    /// Flag inside a process-shared mapping (survives fork)
    Shared(*const AtomicBool),
}

// Safety: CancellationInner::Shared points at an AtomicBool in a mapping
// that outlives every token created from it.
unsafe impl Send for CancellationToken {}
unsafe impl Sync for CancellationToken {}

impl CancellationToken {
    /// Process-local token
    pub fn new() -> Self {
        Self {
            inner: CancellationInner::Owned(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Token backed by a flag in shared memory.
    ///
    /// # Safety
    ///
    /// `flag` must stay mapped for as long as any clone of the token is used.
    pub unsafe fn from_shared(flag: &AtomicBool) -> Self {
        Self {
            inner: CancellationInner::Shared(flag as *const AtomicBool),
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        match &self.inner {
            CancellationInner::Owned(flag) => flag.load(Ordering::Acquire),
            CancellationInner::Shared(ptr) => unsafe { (**ptr).load(Ordering::Acquire) },
        }
    }

    pub fn cancel(&self) {
        match &self.inner {
            CancellationInner::Owned(flag) => flag.store(true, Ordering::Release),
            CancellationInner::Shared(ptr) => unsafe { (**ptr).store(true, Ordering::Release) },
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
