//! Process-shared memory regions
//!
//! Anything a worker writes that its parent (or a signal handler in a
//! forked child) must see lives in an anonymous shared mapping created
//! before the fork. Platform-specific code handles map/unmap.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
    } else {
        compile_error!("shared regions need mmap(MAP_SHARED|MAP_ANONYMOUS)");
    }
}

use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;

use stressor_core::StressResult;

/// Types that may live in a process-shared region.
///
/// # Safety
///
/// The all-zero bit pattern must be a valid value and every field must be
/// safe to access concurrently from several processes (atomics or plain
/// data that is never written after the fork).
pub unsafe trait SharedPod: Sized + Sync {}

/// `len` values of `T` in an anonymous `MAP_SHARED` mapping.
///
/// The mapping is zero-filled on creation and unmapped exactly once:
/// either by [`SharedRegion::release`] or on drop. Forked children
/// inherit the mapping and normally leave through `_exit`, so only the
/// creating process unmaps it.
pub struct SharedRegion<T: SharedPod> {
    ptr: NonNull<T>,
    len: usize,
    _marker: PhantomData<T>,
}

// Safety: T: SharedPod is Sync and the region only hands out shared refs.
unsafe impl<T: SharedPod> Send for SharedRegion<T> {}
unsafe impl<T: SharedPod> Sync for SharedRegion<T> {}

impl<T: SharedPod> SharedRegion<T> {
    /// Region holding a single zeroed `T`
    pub fn new() -> StressResult<Self> {
        Self::with_len(1)
    }

    /// Region holding `len` zeroed values
    pub fn with_len(len: usize) -> StressResult<Self> {
        let ptr = unix::map_shared::<T>(len)?;
        Ok(Self {
            ptr,
            len,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First (often only) element
    #[inline]
    pub fn get(&self) -> &T {
        // Safety: with_len rejects len == 0 and the mapping lives as long as self
        unsafe { self.ptr.as_ref() }
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Mapping size in bytes
    #[inline]
    pub fn byte_len(&self) -> usize {
        core::mem::size_of::<T>() * self.len
    }

    /// Unmap now and report failure instead of swallowing it on drop
    pub fn release(self) -> StressResult<()> {
        let this = ManuallyDrop::new(self);
        unsafe { unix::unmap_shared(this.ptr, this.len) }
    }
}

impl<T: SharedPod> Drop for SharedRegion<T> {
    fn drop(&mut self) {
        let _ = unsafe { unix::unmap_shared(self.ptr, self.len) };
    }
}

impl<T: SharedPod> core::ops::Deref for SharedRegion<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU64, Ordering};

    #[repr(C)]
    struct Counter {
        value: AtomicU64,
    }

    unsafe impl SharedPod for Counter {}

    #[test]
    fn test_region_is_zeroed() {
        let region = SharedRegion::<Counter>::with_len(16).unwrap();
        assert_eq!(region.len(), 16);
        assert!(region.iter().all(|c| c.value.load(Ordering::Relaxed) == 0));
        assert_eq!(region.byte_len(), 16 * 8);
    }

    #[test]
    fn test_zero_len_rejected() {
        assert!(SharedRegion::<Counter>::with_len(0).is_err());
    }

    #[test]
    fn test_release_once() {
        let region = SharedRegion::<Counter>::new().unwrap();
        region.get().value.store(5, Ordering::Relaxed);
        assert!(region.release().is_ok());
    }

    #[test]
    fn test_visible_across_fork() {
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::{fork, ForkResult};

        let region = SharedRegion::<Counter>::new().unwrap();
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                region.get().value.store(42, Ordering::Release);
                unsafe { libc::_exit(0) };
            }
            ForkResult::Parent { child } => {
                assert!(matches!(waitpid(child, None), Ok(WaitStatus::Exited(_, 0))));
                assert_eq!(region.get().value.load(Ordering::Acquire), 42);
            }
        }
    }
}
