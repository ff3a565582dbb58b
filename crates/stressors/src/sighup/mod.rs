//! SIGHUP latency stressor
//!
//! Each iteration runs one of two trials, picked at random:
//!
//! - raise: a child arms the timer and raises SIGHUP at itself.
//! - process group: child A forks child B, moves it into its own process
//!   group, waits until B has stopped itself, arms the timer and kills
//!   itself. B's group is now orphaned with a stopped member, so the
//!   kernel sends it SIGHUP followed by SIGCONT.
//!
//! Latency is the time from arming the timer to the handler running.

pub mod measurement;

use std::os::fd::{AsRawFd, OwnedFd};
use std::time::{Duration, Instant};

use nix::sys::signal::{raise, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{pipe, read, setpgid, write, Pid};
use stressor_core::{
    retry_eintr, Aggregation, ExitStatus, HelpEntry, StressClass, StressError, StressResult,
    Stressor, VerifyMode, WorkerContext,
};
use stressor_runtime::process::{fork_child, is_stopped, spawn_child_using, terminate_and_reap, ForkFn, SYS_FORK};
use stressor_runtime::signal::{install_handler, restore_default};
use stressor_runtime::time::{now_secs, NANOS_PER_SEC};

pub use measurement::{Measurement, MeasurementBlock, SIGHUP_HANDLER};

pub const NAME: &str = "sighup";

/// Label of the latency metric
pub const METRIC_LABEL: &str = "nanosec SIGHUP latency";

/// Exit codes of a raise child that never got to the signal
const HANDLER_FAILED: i32 = 64;
const RAISE_FAILED: i32 = 65;

/// How long the orphaned descendant gets to run its handler before cleanup
const RESUME_GRACE: Duration = Duration::from_secs(1);
const RESUME_POLL: Duration = Duration::from_millis(1);

const HELP: &[HelpEntry] = &[
    HelpEntry {
        option: "sighup N",
        description: "start N workers generating SIGHUP signals",
    },
    HelpEntry {
        option: "sighup-ops N",
        description: "stop after N bogo SIGHUP operations",
    },
];

/// Which trial an iteration runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    RaiseSignal,
    ProcessGroup,
}

impl Variant {
    pub fn name(self) -> &'static str {
        match self {
            Variant::RaiseSignal => "raise",
            Variant::ProcessGroup => "process group",
        }
    }
}

/// How a trial ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    Completed,
    /// Fork gave up because the run is stopping; not counted as an op
    Abandoned,
}

#[derive(Debug, Clone, Copy)]
pub struct SighupStressor {
    fork: ForkFn,
}

impl SighupStressor {
    pub fn new() -> Self {
        Self { fork: SYS_FORK }
    }

    /// Stressor whose trials fork through `fork`
    pub fn with_fork(fork: ForkFn) -> Self {
        Self { fork }
    }
}

impl Default for SighupStressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Stressor for SighupStressor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn classes(&self) -> &'static [StressClass] {
        &[StressClass::Signal, StressClass::Os]
    }

    fn help(&self) -> &'static [HelpEntry] {
        HELP
    }

    fn verify(&self) -> VerifyMode {
        VerifyMode::Always
    }

    fn run(&self, ctx: &dyn WorkerContext) -> ExitStatus {
        if let Err(e) = install_handler(Signal::SIGHUP, SIGHUP_HANDLER) {
            ctx.report_failure(&e.to_string());
            return ExitStatus::NoResource;
        }
        let measurement = match Measurement::acquire() {
            Ok(m) => m,
            Err(e) => {
                ctx.report_info(&format!("failed to map sighup information, {}, skipping stressor", e));
                return ExitStatus::NoResource;
            }
        };

        let status = run_trials(ctx, measurement.block(), self.fork);

        let rate = measurement.block().mean_latency() * NANOS_PER_SEC;
        ctx.report_metric(0, METRIC_LABEL, rate, Aggregation::HarmonicMean);

        drop(measurement);
        if let Err(e) = restore_default(Signal::SIGHUP) {
            ctx.report_info(&format!("cannot restore SIGHUP disposition: {}", e));
        }
        status
    }
}

fn run_trials(ctx: &dyn WorkerContext, block: &MeasurementBlock, fork: ForkFn) -> ExitStatus {
    let mut failed = false;
    loop {
        block.begin_trial();
        let variant = if ctx.random_bit() {
            Variant::RaiseSignal
        } else {
            Variant::ProcessGroup
        };
        let outcome = match variant {
            Variant::RaiseSignal => raise_signal_trial(ctx, block, fork),
            Variant::ProcessGroup => process_group_trial(ctx, block, fork),
        };
        match outcome {
            Ok(TrialOutcome::Completed) => ctx.bogo_inc(),
            Ok(TrialOutcome::Abandoned) => {}
            Err(e) => {
                ctx.report_failure(&format!("{} trial: {}", variant.name(), e));
                failed = true;
                if e.is_run_terminating() {
                    break;
                }
            }
        }
        if !ctx.keep_running() {
            break;
        }
    }
    if failed {
        ExitStatus::Failure
    } else {
        ExitStatus::Success
    }
}

fn waitpid_failed(errno: nix::errno::Errno) -> StressError {
    StressError::Protocol(format!(
        "waitpid failed: errno={} ({})",
        errno as i32,
        errno.desc()
    ))
}

/// Child raises SIGHUP at itself; the handler must have run by the time
/// the child is reaped.
pub fn raise_signal_trial(ctx: &dyn WorkerContext, block: &MeasurementBlock, fork: ForkFn) -> StressResult<TrialOutcome> {
    let Some(mut child) = spawn_child_using(fork, ctx, || raise_child(block))? else {
        return Ok(TrialOutcome::Abandoned);
    };
    let status = child.wait().map_err(waitpid_failed)?;
    raise_child_outcome(status, block.signalled())
}

/// Judge a reaped raise child by its exit status and the handler flag
fn raise_child_outcome(status: WaitStatus, signalled: bool) -> StressResult<TrialOutcome> {
    match status {
        WaitStatus::Exited(_, RAISE_FAILED) => {
            Err(StressError::Protocol("raise(SIGHUP) failed in child".into()))
        }
        WaitStatus::Exited(_, HANDLER_FAILED) => {
            Err(StressError::Protocol("child could not install SIGHUP handler".into()))
        }
        _ if !signalled => Err(StressError::Protocol("SIGHUP signal handler did not get called".into())),
        _ => Ok(TrialOutcome::Completed),
    }
}

fn raise_child(block: &MeasurementBlock) -> i32 {
    // Raising SIGHUP without a handler would terminate the child
    if install_handler(Signal::SIGHUP, SIGHUP_HANDLER).is_err() {
        return HANDLER_FAILED;
    }
    block.start_timer(now_secs());
    if raise(Signal::SIGHUP).is_err() {
        block.clear_timer();
        return RAISE_FAILED;
    }
    0
}

/// Orphan a stopped process group and let the kernel deliver SIGHUP.
///
/// The suspended descendant gets a short grace period to run its SIGHUP
/// handler, then is always terminated and reaped. If it is still stopped
/// at that point, the kernel never resumed the orphaned group and the
/// trial is a protocol violation.
pub fn process_group_trial(ctx: &dyn WorkerContext, block: &MeasurementBlock, fork: ForkFn) -> StressResult<TrialOutcome> {
    block.set_target(0);
    let Some(mut leader) = spawn_child_using(fork, ctx, || group_leader_child(block))? else {
        return Ok(TrialOutcome::Abandoned);
    };
    let waited = leader.wait();

    let target = block.target();
    let mut still_stopped = false;
    if target != 0 {
        let pid = Pid::from_raw(target);
        still_stopped = !await_handler(block, RESUME_GRACE) && is_stopped(pid);
        let _ = terminate_and_reap(pid);
        // a timer the handler never consumed must not leak into the next trial
        block.clear_timer();
    }

    waited.map_err(waitpid_failed)?;
    if still_stopped {
        return Err(StressError::Protocol(format!(
            "orphaned process group {} was not resumed with SIGHUP/SIGCONT",
            target
        )));
    }
    Ok(TrialOutcome::Completed)
}

/// Poll until the SIGHUP handler has run or `grace` runs out
fn await_handler(block: &MeasurementBlock, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while !block.signalled() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(RESUME_POLL);
    }
    true
}

/// Child A: fork B into its own group, wait for it to stop, then die.
fn group_leader_child(block: &MeasurementBlock) -> i32 {
    block.clear_timer();
    let Ok((ready_rx, ready_tx)) = pipe() else {
        return 0;
    };

    let Ok(descendant) = fork_child(|| suspended_descendant(&ready_tx)) else {
        return 0;
    };
    let pid = descendant.pid();
    block.set_target(pid.as_raw());
    let _ = setpgid(pid, Pid::from_raw(0));

    if wait_until_stopped(&ready_rx, pid) {
        block.start_timer(now_secs());
        let _ = raise(Signal::SIGKILL);
    }
    // Not reached after SIGKILL; otherwise `descendant` is killed on drop.
    0
}

/// Readiness byte from B, then confirmation that B is really stopped
fn wait_until_stopped(ready: &OwnedFd, pid: Pid) -> bool {
    let mut byte = [0u8; 1];
    if retry_eintr(|| read(ready.as_raw_fd(), &mut byte)) != Ok(1) {
        return false;
    }
    matches!(
        retry_eintr(|| waitpid(pid, Some(WaitPidFlag::WUNTRACED))),
        Ok(WaitStatus::Stopped(..))
    )
}

/// Child B: announce readiness and stop until resumed
fn suspended_descendant(ready: &OwnedFd) -> i32 {
    if write(ready, b"x") != Ok(1) {
        return 0;
    }
    let _ = raise(Signal::SIGSTOP);
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use stressor_core::testing::FakeContext;
    use stressor_core::Errno;
    use nix::unistd::ForkResult;

    unsafe fn eagain_fork() -> nix::Result<ForkResult> {
        Err(Errno::EAGAIN)
    }

    #[test]
    #[serial]
    fn test_raise_trial_records_one_sample() {
        install_handler(Signal::SIGHUP, SIGHUP_HANDLER).unwrap();
        let m = Measurement::acquire().unwrap();
        let ctx = FakeContext::new(NAME).iterations(2);

        m.block().begin_trial();
        assert_eq!(raise_signal_trial(&ctx, m.block(), SYS_FORK), Ok(TrialOutcome::Completed));
        assert!(m.block().signalled());
        assert_eq!(m.block().samples(), 1);

        drop(m);
        restore_default(Signal::SIGHUP).unwrap();
    }

    #[test]
    #[serial]
    fn test_process_group_trial_in_own_session() {
        // A fresh session guarantees B's group is orphaned when A dies.
        let mut helper = fork_child(|| {
            if nix::unistd::setsid().is_err() {
                return 10;
            }
            if install_handler(Signal::SIGHUP, SIGHUP_HANDLER).is_err() {
                return 11;
            }
            let Ok(m) = Measurement::acquire() else {
                return 12;
            };
            let ctx = FakeContext::new(NAME).iterations(2);
            match process_group_trial(&ctx, m.block(), SYS_FORK) {
                Ok(TrialOutcome::Completed) => {}
                _ => return 13,
            }
            let target = Pid::from_raw(m.block().target());
            if target.as_raw() == 0 || is_stopped(target) {
                return 14;
            }
            // the descendant's handler ran before cleanup and left a sample
            if !m.block().signalled() || m.block().samples() != 1 {
                return 15;
            }
            if m.block().trial_start() != 0.0 {
                return 16;
            }
            0
        })
        .unwrap();
        let pid = helper.pid();
        assert_eq!(helper.wait(), Ok(WaitStatus::Exited(pid, 0)));
    }

    #[test]
    #[serial]
    fn test_process_group_without_propagation_is_protocol_violation() {
        // As a subreaper in the same session the helper adopts B, so B's
        // group is never orphaned and never resumed.
        let mut helper = fork_child(|| {
            if unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) } != 0 {
                return 10;
            }
            let Ok(m) = Measurement::acquire() else {
                return 12;
            };
            let ctx = FakeContext::new(NAME).iterations(2);
            match process_group_trial(&ctx, m.block(), SYS_FORK) {
                Err(StressError::Protocol(_)) => {}
                _ => return 13,
            }
            let target = Pid::from_raw(m.block().target());
            if target.as_raw() == 0 {
                return 14;
            }
            // armed timer was cleared along with the descendant
            if m.block().trial_start() != 0.0 || m.block().samples() != 0 {
                return 16;
            }
            // B was terminated and reaped, not leaked
            if nix::sys::signal::kill(target, None) != Err(nix::errno::Errno::ESRCH) {
                return 15;
            }
            0
        })
        .unwrap();
        let pid = helper.pid();
        assert_eq!(helper.wait(), Ok(WaitStatus::Exited(pid, 0)));
    }

    #[test]
    #[serial]
    fn test_run_with_raise_trials() {
        let ctx = FakeContext::new(NAME).iterations(4).bits(&[true, true, true, true]);
        assert_eq!(SighupStressor::new().run(&ctx), ExitStatus::Success);
        assert_eq!(ctx.bogo_ops(), 4);
        assert!(ctx.failures().is_empty(), "{:?}", ctx.failures());

        let metrics = ctx.metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].slot, 0);
        assert_eq!(metrics[0].label, METRIC_LABEL);
        assert_eq!(metrics[0].kind, Aggregation::HarmonicMean);
        assert!(metrics[0].value >= 0.0);
    }

    #[test]
    #[serial]
    fn test_failed_fork_while_stopping_counts_nothing() {
        let ctx = FakeContext::new(NAME).iterations(1);
        let status = SighupStressor::with_fork(eagain_fork).run(&ctx);
        assert_eq!(status, ExitStatus::Success);
        assert_eq!(ctx.bogo_ops(), 0);
        assert!(ctx.failures().is_empty(), "{:?}", ctx.failures());
        assert_eq!(ctx.fork_errnos(), vec![(Errno::EAGAIN, 1)]);
    }

    #[test]
    #[serial]
    fn test_failed_fork_while_running_ends_loop() {
        let ctx = FakeContext::new(NAME).iterations(5).retry_forks(false);
        let status = SighupStressor::with_fork(eagain_fork).run(&ctx);
        assert_eq!(status, ExitStatus::Failure);
        assert_eq!(ctx.bogo_ops(), 0);
        let failures = ctx.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("failed to fork child: errno=11"), "{}", failures[0]);
        // no second trial after the failure
        assert_eq!(ctx.fork_errnos().len(), 1);
    }

    #[test]
    fn test_raise_child_outcome() {
        let pid = Pid::from_raw(1234);
        assert_eq!(
            raise_child_outcome(WaitStatus::Exited(pid, 0), true),
            Ok(TrialOutcome::Completed)
        );
        assert_eq!(
            raise_child_outcome(WaitStatus::Exited(pid, 0), false),
            Err(StressError::Protocol("SIGHUP signal handler did not get called".into()))
        );
        assert_eq!(
            raise_child_outcome(WaitStatus::Exited(pid, RAISE_FAILED), false),
            Err(StressError::Protocol("raise(SIGHUP) failed in child".into()))
        );
        assert_eq!(
            raise_child_outcome(WaitStatus::Exited(pid, HANDLER_FAILED), false),
            Err(StressError::Protocol("child could not install SIGHUP handler".into()))
        );
    }

    #[test]
    fn test_stressor_metadata() {
        let s = SighupStressor::new();
        assert_eq!(s.name(), "sighup");
        assert_eq!(s.verify(), VerifyMode::Always);
        assert_eq!(s.help()[1].option, "sighup-ops N");
        assert!(s.classes().contains(&StressClass::Signal));
    }
}
