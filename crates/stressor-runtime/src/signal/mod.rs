//! Signal handler installation
//!
//! Handlers run in async-signal context: they may only touch atomics and
//! call async-signal-safe functions. [`AsyncSignalHandler`] carries that
//! obligation in its constructor so installation itself can be safe.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    } else {
        compile_error!("signal handlers are only supported on unix");
    }
}

/// A handler function that is known to be async-signal-safe
#[derive(Clone, Copy)]
pub struct AsyncSignalHandler {
    func: extern "C" fn(libc::c_int),
}

impl AsyncSignalHandler {
    /// # Safety
    ///
    /// `func` must not allocate, lock, print or unwind; only atomics,
    /// plain stores and async-signal-safe libc calls are allowed.
    pub const unsafe fn new(func: extern "C" fn(libc::c_int)) -> Self {
        Self { func }
    }

    #[inline]
    pub(crate) fn func(&self) -> extern "C" fn(libc::c_int) {
        self.func
    }
}

impl core::fmt::Debug for AsyncSignalHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncSignalHandler")
            .field("func", &(self.func as usize as *const ()))
            .finish()
    }
}
