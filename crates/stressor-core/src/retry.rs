//! Retry combinator for interruptible syscalls
//!
//! ```ignore
//! let status = retry_eintr(|| waitpid(pid, None))?;
//!
//! let pid = Retry::bounded(8).run(|| unsafe { fork() }, |e| *e == Errno::EAGAIN)?;
//! ```

use nix::errno::Errno;

/// How many times an operation may be attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    max_attempts: Option<u32>,
}

impl Retry {
    /// Retry for as long as the predicate says so
    pub const fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    /// At most `attempts` calls in total (0 is treated as 1)
    pub const fn bounded(attempts: u32) -> Self {
        Self {
            max_attempts: Some(if attempts == 0 { 1 } else { attempts }),
        }
    }

    /// Run `op` until it succeeds, `retryable` rejects the error, or the
    /// attempt budget is spent. The last error is returned.
    pub fn run<T, E, F, P>(&self, mut op: F, mut retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: FnMut(&E) -> bool,
    {
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            match op() {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let budget_left = self.max_attempts.map_or(true, |max| attempts < max);
                    if !budget_left || !retryable(&e) {
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Repeat `op` while it fails with EINTR
#[inline]
pub fn retry_eintr<T, F>(op: F) -> Result<T, Errno>
where
    F: FnMut() -> Result<T, Errno>,
{
    Retry::unbounded().run(op, |e| *e == Errno::EINTR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_eintr_is_retried() {
        let calls = Cell::new(0);
        let r = retry_eintr(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 4 { Err(Errno::EINTR) } else { Ok(calls.get()) }
        });
        assert_eq!(r, Ok(4));
    }

    #[test]
    fn test_other_errno_is_returned() {
        let calls = Cell::new(0);
        let r: Result<(), Errno> = retry_eintr(|| {
            calls.set(calls.get() + 1);
            Err(Errno::ECHILD)
        });
        assert_eq!(r, Err(Errno::ECHILD));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_bounded_stops_after_budget() {
        let calls = Cell::new(0);
        let r: Result<(), Errno> = Retry::bounded(3).run(
            || {
                calls.set(calls.get() + 1);
                Err(Errno::EAGAIN)
            },
            |_| true,
        );
        assert_eq!(r, Err(Errno::EAGAIN));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_bounded_zero_still_runs_once() {
        let calls = Cell::new(0);
        let _: Result<(), Errno> = Retry::bounded(0).run(
            || {
                calls.set(calls.get() + 1);
                Err(Errno::EAGAIN)
            },
            |_| true,
        );
        assert_eq!(calls.get(), 1);
    }
}
