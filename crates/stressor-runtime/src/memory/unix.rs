//! Unix shared mapping using mmap

use core::ptr::NonNull;

use nix::errno::Errno;
use stressor_core::{StressError, StressResult};

use super::SharedPod;

fn map_error(errno: Errno) -> StressError {
    StressError::Resource {
        what: "mmap shared region",
        errno,
    }
}

/// Map `len` zero-filled values of `T`, readable and writable, shared
/// with every process forked afterwards.
pub(super) fn map_shared<T: SharedPod>(len: usize) -> StressResult<NonNull<T>> {
    if len == 0 {
        return Err(map_error(Errno::EINVAL));
    }
    let size = core::mem::size_of::<T>()
        .checked_mul(len)
        .ok_or_else(|| map_error(Errno::ENOMEM))?;

    let base = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            size.max(1),
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if base == libc::MAP_FAILED {
        return Err(map_error(Errno::last()));
    }

    // Anonymous mappings are zero-filled; SharedPod guarantees zero is valid.
    NonNull::new(base as *mut T).ok_or_else(|| map_error(Errno::ENOMEM))
}

/// # Safety
///
/// `ptr`/`len` must come from `map_shared` and must not be used afterwards.
pub(super) unsafe fn unmap_shared<T: SharedPod>(ptr: NonNull<T>, len: usize) -> StressResult<()> {
    let size = (core::mem::size_of::<T>() * len).max(1);
    let ret = libc::munmap(ptr.as_ptr() as *mut libc::c_void, size);
    if ret != 0 {
        return Err(StressError::Resource {
            what: "munmap shared region",
            errno: Errno::last(),
        });
    }
    Ok(())
}
