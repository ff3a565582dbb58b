//! Monotonic clock readings usable from signal handlers

/// Nanoseconds per second
pub const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Seconds on CLOCK_MONOTONIC as `f64`.
///
/// `clock_gettime` is async-signal-safe, so this may be called from a
/// handler. Returns 0.0 if the clock cannot be read.
#[inline]
pub fn now_secs() -> f64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if ret != 0 {
        return 0.0;
    }
    ts.tv_sec as f64 + ts.tv_nsec as f64 / NANOS_PER_SEC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let a = now_secs();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = now_secs();
        assert!(a > 0.0);
        assert!(b - a >= 0.001, "{a} -> {b}");
    }
}
