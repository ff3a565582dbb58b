//! Child process management
//!
//! Every child forked here leaves through `_exit` with the code its
//! closure returns, and every [`ChildProcess`] is reaped exactly once:
//! by `wait`, `try_wait`, `terminate`, or on drop (SIGKILL then waitpid).

use std::panic::{catch_unwind, AssertUnwindSafe};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use stressor_core::{retry_eintr, ExitStatus, Retry, StressError, StressResult, WorkerContext};

/// Leave the process immediately, skipping atexit handlers and destructors.
#[inline]
pub fn exit_now(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}

/// A forked child that has not been reaped yet
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    reaped: bool,
}

impl ChildProcess {
    fn new(pid: Pid) -> Self {
        Self { pid, reaped: false }
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Block until the child terminates
    pub fn wait(&mut self) -> Result<WaitStatus, Errno> {
        let status = retry_eintr(|| waitpid(self.pid, None))?;
        self.mark(&status);
        Ok(status)
    }

    /// Reap the child if it has already terminated
    pub fn try_wait(&mut self) -> Result<Option<WaitStatus>, Errno> {
        match retry_eintr(|| waitpid(self.pid, Some(WaitPidFlag::WNOHANG)))? {
            WaitStatus::StillAlive => Ok(None),
            status => {
                self.mark(&status);
                Ok(Some(status))
            }
        }
    }

    /// SIGKILL and reap
    pub fn terminate(mut self) -> Result<Option<WaitStatus>, Errno> {
        self.reaped = true;
        terminate_and_reap(self.pid)
    }

    fn mark(&mut self, status: &WaitStatus) {
        if matches!(status, WaitStatus::Exited(..) | WaitStatus::Signaled(..)) {
            self.reaped = true;
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = terminate_and_reap(self.pid);
        }
    }
}

/// Kill `pid` with SIGKILL and collect it.
///
/// A process that is already gone (ESRCH) or was reaped elsewhere
/// (ECHILD) is not an error; `Ok(None)` is returned then.
pub fn terminate_and_reap(pid: Pid) -> Result<Option<WaitStatus>, Errno> {
    match kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => return Err(errno),
    }
    match retry_eintr(|| waitpid(pid, None)) {
        Ok(status) => Ok(Some(status)),
        Err(Errno::ECHILD) => Ok(None),
        Err(errno) => Err(errno),
    }
}

/// The fork primitive; replaced in tests to inject failures
pub type ForkFn = unsafe fn() -> nix::Result<ForkResult>;

/// `fork(2)`
pub const SYS_FORK: ForkFn = fork;

/// Fork, retrying failed attempts as `retry`/`retryable` allow.
///
/// The child runs `child` and exits with its return value; a panic in
/// `child` exits with the failure code instead of unwinding into the
/// caller's frames.
pub fn fork_with<F, P>(retry: Retry, retryable: P, child: F) -> Result<ChildProcess, Errno>
where
    F: FnOnce() -> i32,
    P: FnMut(&Errno) -> bool,
{
    fork_using(SYS_FORK, retry, retryable, child)
}

/// [`fork_with`] over an explicit fork primitive
pub fn fork_using<F, P>(fork_fn: ForkFn, retry: Retry, retryable: P, child: F) -> Result<ChildProcess, Errno>
where
    F: FnOnce() -> i32,
    P: FnMut(&Errno) -> bool,
{
    // Safety: the child only runs `child` and leaves through `_exit`.
    match retry.run(|| unsafe { fork_fn() }, retryable)? {
        ForkResult::Child => {
            let code = catch_unwind(AssertUnwindSafe(child)).unwrap_or(ExitStatus::Failure.code());
            exit_now(code)
        }
        ForkResult::Parent { child } => Ok(ChildProcess::new(child)),
    }
}

/// Single fork attempt
pub fn fork_child<F>(child: F) -> Result<ChildProcess, Errno>
where
    F: FnOnce() -> i32,
{
    fork_with(Retry::bounded(1), |_| false, child)
}

/// Fork on behalf of a running stressor.
///
/// Failed attempts are retried while `ctx.request_fork_retry` agrees;
/// the attempt count starts over with every call. `Ok(None)` means the
/// fork was abandoned because the run is stopping.
pub fn spawn_child<F>(ctx: &dyn WorkerContext, child: F) -> StressResult<Option<ChildProcess>>
where
    F: FnOnce() -> i32,
{
    spawn_child_using(SYS_FORK, ctx, child)
}

/// [`spawn_child`] over an explicit fork primitive
pub fn spawn_child_using<F>(fork_fn: ForkFn, ctx: &dyn WorkerContext, child: F) -> StressResult<Option<ChildProcess>>
where
    F: FnOnce() -> i32,
{
    let mut attempt = 0u32;
    let retryable = |errno: &Errno| {
        attempt += 1;
        ctx.request_fork_retry(*errno, attempt)
    };
    match fork_using(fork_fn, Retry::unbounded(), retryable, child) {
        Ok(child) => Ok(Some(child)),
        Err(_) if !ctx.keep_running() => Ok(None),
        Err(errno) => Err(StressError::Resource { what: "fork child", errno }),
    }
}

/// Scheduler state letter of `pid` from `/proc/<pid>/stat`
pub fn process_state(pid: Pid) -> Option<char> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm may contain spaces and parentheses; the state follows the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.trim_start().chars().next()
}

/// Whether `pid` is stopped by job control (or traced)
pub fn is_stopped(pid: Pid) -> bool {
    matches!(process_state(pid), Some('T') | Some('t'))
}
