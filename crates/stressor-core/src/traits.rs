//! Stressor contract and platform traits
//!
//! These traits define the interface between the platform-agnostic
//! stressors and whoever drives them: the supervisor that owns the
//! worker process, and the kernel syscalls the stressor exercises.

use core::time::Duration;

use nix::errno::Errno;

use crate::error::ExitStatus;
use crate::metrics::Aggregation;
use crate::sched::{Policy, SchedAttr};

/// Collaborators a stressor sees while it runs inside one worker process.
///
/// Implemented by the supervisor's worker (`stressor_runtime::Worker`) and
/// by `testing::FakeContext`.
pub trait WorkerContext {
    /// Stressor name, used as the prefix of every reported line
    fn name(&self) -> &str;

    /// Process id of the worker
    fn pid(&self) -> i32;

    /// Index of this worker among the parallel instances (0-based)
    fn instance(&self) -> u32;

    /// Whether the stressor should start another iteration
    fn keep_running(&self) -> bool;

    /// Count one completed bogo-op
    fn bogo_inc(&self);

    fn report_failure(&self, msg: &str);

    fn report_info(&self, msg: &str);

    /// Publish a derived numeric result in `slot` (small integer index)
    fn report_metric(&self, slot: usize, label: &'static str, value: f64, kind: Aggregation);

    /// Whether a fork that failed with `errno` should be attempted again.
    ///
    /// `attempt` counts the retries of the current fork call, starting at
    /// 1, so the retry budget applies per call. May block briefly as
    /// backoff.
    fn request_fork_retry(&self, errno: Errno, attempt: u32) -> bool;

    fn random_bit(&self) -> bool;

    fn random_u32(&self) -> u32;
}

/// Stressor classes, used for grouping and listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StressClass {
    Interrupt,
    Scheduler,
    Os,
    Signal,
}

/// When a stressor's results are checked for correctness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Only when verification is requested
    Optional,
    /// The stressor always verifies what it does
    Always,
}

/// One line of a stressor's usage table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelpEntry {
    pub option: &'static str,
    pub description: &'static str,
}

/// A pluggable stressor.
///
/// `run` is the entry point: called once per worker process, it loops
/// until `ctx.keep_running()` turns false and returns the worker's
/// exit status.
pub trait Stressor: Send + Sync {
    fn name(&self) -> &'static str;

    fn classes(&self) -> &'static [StressClass];

    fn help(&self) -> &'static [HelpEntry];

    fn verify(&self) -> VerifyMode {
        VerifyMode::Optional
    }

    fn run(&self, ctx: &dyn WorkerContext) -> ExitStatus;
}

/// Scheduler syscalls the policy stressor exercises.
///
/// Every method maps to one syscall and returns the raw `errno` on
/// failure; classification happens in the caller.
pub trait SchedOps {
    fn priority_min(&self, policy: Policy) -> Result<i32, Errno>;

    fn priority_max(&self, policy: Policy) -> Result<i32, Errno>;

    /// `sched_setscheduler(pid, policy, {priority})`
    fn set_scheduler(&self, pid: i32, policy: Policy, priority: i32) -> Result<(), Errno>;

    /// `sched_getscheduler(pid)`, the raw policy number
    fn get_scheduler(&self, pid: i32) -> Result<i32, Errno>;

    fn rr_interval(&self, pid: i32) -> Result<Duration, Errno>;

    /// `sched_getparam(pid)`, the current static priority
    fn get_param(&self, pid: i32) -> Result<i32, Errno>;

    fn set_param(&self, pid: i32, priority: i32) -> Result<(), Errno>;

    fn get_attr(&self, pid: i32) -> Result<SchedAttr, Errno>;

    fn set_attr(&self, pid: i32, attr: &SchedAttr) -> Result<(), Errno>;

    fn yield_now(&self);
}
