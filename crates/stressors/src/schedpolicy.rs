//! Scheduling-policy stressor
//!
//! Cycles the worker through every scheduling policy the kernel accepts,
//! applying each with a random priority from its valid range and checking
//! that the kernel reports back the policy it was given. Where the kernel
//! has utilization clamps, the applied `sched_util_max` is ratcheted down
//! towards the lowest value observed.

use stressor_core::sched::{SCHED_ATTR_SIZE, SCHED_FLAG_KEEP_ALL, SCHED_FLAG_UTIL_CLAMP_MAX};
use stressor_core::{
    Errno, ExitStatus, HelpEntry, Policy, PolicyTrial, SchedOps, StressClass, StressError, StressResult,
    Stressor, WorkerContext,
};
use stressor_runtime::{Capabilities, CurrentSched, PolicyCaps};

pub const NAME: &str = "schedpolicy";

const HELP: &[HelpEntry] = &[
    HelpEntry {
        option: "schedpolicy N",
        description: "start N workers that exercise scheduling policy",
    },
    HelpEntry {
        option: "schedpolicy-ops N",
        description: "stop after N scheduling policy bogo operations",
    },
];

/// Iterations between two downward steps of the clamp ratchet
pub const RATCHET_PERIOD: u32 = 257;

/// Rejections a policy change is allowed to get (no privilege, unsupported)
const IGNORABLE: &[Errno] = &[Errno::EPERM, Errno::EINVAL];

/// Utilization clamp state kept across iterations of one invocation.
///
/// Tracks the lowest `util_min` and highest `util_max` observed and the
/// `util_max` currently being applied, which starts at the highest value
/// seen and steps down by one every [`RATCHET_PERIOD`] iterations, never
/// below the lowest observed minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtilClampRatchet {
    min_seen: u32,
    max_seen: u32,
    current: u32,
    counter: u32,
}

impl UtilClampRatchet {
    pub fn new() -> Self {
        Self {
            min_seen: u32::MAX,
            max_seen: 0,
            current: 0,
            counter: 0,
        }
    }

    /// Fold in one clamp reading; returns the `util_max` to write back
    pub fn observe(&mut self, util_min: u32, util_max: u32) -> u32 {
        self.min_seen = self.min_seen.min(util_min);
        self.max_seen = self.max_seen.max(util_max);
        if self.min_seen > self.max_seen {
            self.min_seen = self.max_seen;
        }
        if self.current == 0 {
            self.current = self.max_seen;
        }
        self.current
    }

    /// Count one iteration; returns true when the applied max stepped down
    pub fn tick(&mut self) -> bool {
        self.counter += 1;
        if self.counter < RATCHET_PERIOD {
            return false;
        }
        self.counter = 0;
        if self.current > 0 && self.current > self.min_seen {
            self.current -= 1;
            return true;
        }
        false
    }

    #[inline]
    pub fn current(&self) -> u32 {
        self.current
    }

    #[inline]
    pub fn min_seen(&self) -> u32 {
        self.min_seen
    }

    #[inline]
    pub fn max_seen(&self) -> u32 {
        self.max_seen
    }
}

impl Default for UtilClampRatchet {
    fn default() -> Self {
        Self::new()
    }
}

/// The scheduling-policy stressor over a scheduler backend
pub struct SchedPolicyStressor<S = CurrentSched> {
    sched: S,
    caps: Capabilities,
}

impl SchedPolicyStressor<CurrentSched> {
    /// Stressor over the real kernel, capabilities probed now
    pub fn new() -> Self {
        Self::with_sched(CurrentSched::new())
    }
}

impl Default for SchedPolicyStressor<CurrentSched> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SchedOps> SchedPolicyStressor<S> {
    pub fn with_sched(sched: S) -> Self {
        let caps = Capabilities::discover(&sched);
        Self { sched, caps }
    }

    pub fn with_capabilities(sched: S, caps: Capabilities) -> Self {
        Self { sched, caps }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }
}

impl<S: SchedOps + Send + Sync> Stressor for SchedPolicyStressor<S> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn classes(&self) -> &'static [StressClass] {
        &[StressClass::Interrupt, StressClass::Scheduler, StressClass::Os]
    }

    fn help(&self) -> &'static [HelpEntry] {
        HELP
    }

    fn run(&self, ctx: &dyn WorkerContext) -> ExitStatus {
        churn(ctx, &self.sched, &self.caps)
    }
}

/// Run the policy loop until `ctx` says stop.
///
/// Unexpected syscall failures are reported and the loop carries on;
/// a kernel consistency violation ends it. Either makes the result
/// `Failure`.
pub fn churn<S: SchedOps + ?Sized>(
    ctx: &dyn WorkerContext,
    sched: &S,
    caps: &Capabilities,
) -> ExitStatus {
    if caps.is_empty() {
        if ctx.instance() == 0 {
            ctx.report_info("no scheduling policies available, skipping stressor");
        }
        return ExitStatus::NotImplemented;
    }

    let mut churn = PolicyChurn {
        ctx,
        sched,
        policies: caps.policies(),
        util_clamp: caps.util_clamp(),
        ratchet: UtilClampRatchet::new(),
        next: 0,
        failed: false,
    };

    loop {
        match churn.iteration() {
            Ok(true) => ctx.bogo_inc(),
            Ok(false) => {}
            Err(e) => {
                churn.fail(&e);
                if e.is_run_terminating() {
                    break;
                }
            }
        }
        if !ctx.keep_running() {
            break;
        }
    }

    if churn.failed {
        ExitStatus::Failure
    } else {
        ExitStatus::Success
    }
}

struct PolicyChurn<'a, S: ?Sized> {
    ctx: &'a dyn WorkerContext,
    sched: &'a S,
    policies: &'a [PolicyCaps],
    util_clamp: bool,
    ratchet: UtilClampRatchet,
    next: usize,
    failed: bool,
}

impl<S: SchedOps + ?Sized> PolicyChurn<'_, S> {
    /// One policy trial. `Ok(false)` when the policy had to be skipped;
    /// `Err` only for run-terminating errors.
    fn iteration(&mut self) -> StressResult<bool> {
        let caps = self.policies[self.next];
        self.next = (self.next + 1) % self.policies.len();

        let pid = if self.ctx.random_bit() { 0 } else { self.ctx.pid() };
        let Some(trial) = self.plan(caps, pid)? else {
            return Ok(false);
        };

        self.apply(&trial)?;
        self.param_roundtrip(pid);
        if self.util_clamp {
            self.exercise_util_clamp(pid);
        }
        self.sched.yield_now();
        Ok(true)
    }

    /// Pick the priority for `caps.policy`; `None` if its range is unsupported
    fn plan(&self, caps: PolicyCaps, pid: i32) -> StressResult<Option<PolicyTrial>> {
        let policy = caps.policy;
        if !caps.realtime {
            return Ok(Some(PolicyTrial { policy, priority: 0, pid }));
        }

        if policy == Policy::RoundRobin {
            let _ = self.sched.rr_interval(pid);
        }

        let (min, max) = match (self.sched.priority_min(policy), self.sched.priority_max(policy)) {
            (Ok(min), Ok(max)) => (min, max),
            _ => return Ok(None),
        };
        if max <= min {
            return Err(StressError::Consistency(format!(
                "invalid min/max priority range for scheduling policy {} (min={}, max={})",
                policy, min, max
            )));
        }

        let width = (max - min) as u32 + 1;
        let priority = min + (self.ctx.random_u32() % width) as i32;
        Ok(Some(PolicyTrial { policy, priority, pid }))
    }

    fn apply(&mut self, trial: &PolicyTrial) -> StressResult<()> {
        let PolicyTrial { policy, priority, pid } = *trial;
        if let Err(errno) = self.sched.set_scheduler(pid, policy, priority) {
            let e = StressError::classify("sched_setscheduler", errno, IGNORABLE)
                .with_context(format!("scheduler policy {}", policy));
            if e.is_reportable() {
                self.fail(&e);
            }
            return Ok(());
        }

        match self.sched.get_scheduler(pid) {
            Err(errno) => self.fail(&StressError::syscall("sched_getscheduler", errno)),
            Ok(raw) if raw != policy.raw() => {
                return Err(StressError::Consistency(format!(
                    "sched_getscheduler failed: pid {} has policy {} ({}) but function returned {} instead",
                    pid,
                    policy.raw(),
                    policy,
                    raw
                )));
            }
            Ok(_) => {}
        }
        Ok(())
    }

    fn param_roundtrip(&mut self, pid: i32) {
        match self.sched.get_param(pid) {
            Ok(priority) => {
                if let Err(errno) = self.sched.set_param(pid, priority) {
                    self.check("sched_setparam", errno);
                }
            }
            Err(errno) => self.check("sched_getparam", errno),
        }
    }

    fn exercise_util_clamp(&mut self, pid: i32) {
        match self.sched.get_attr(pid) {
            Ok(mut attr) => {
                if attr.sched_util_max != 0 {
                    attr.sched_util_max = self.ratchet.observe(attr.sched_util_min, attr.sched_util_max);
                    attr.sched_flags |= SCHED_FLAG_KEEP_ALL | SCHED_FLAG_UTIL_CLAMP_MAX;
                }
                attr.size = SCHED_ATTR_SIZE;
                match self.sched.set_attr(pid, &attr) {
                    Ok(()) | Err(Errno::ENOSYS) => {}
                    Err(errno) => self.fail(&StressError::syscall("sched_setattr", errno)),
                }
            }
            Err(Errno::ENOSYS) => {}
            Err(errno) => self.fail(&StressError::syscall("sched_getattr", errno)),
        }
        self.ratchet.tick();
    }

    /// Report `errno` from `syscall` unless it is an allowed rejection
    fn check(&mut self, syscall: &'static str, errno: Errno) {
        let e = StressError::classify(syscall, errno, IGNORABLE);
        if e.is_reportable() {
            self.fail(&e);
        }
    }

    fn fail(&mut self, e: &StressError) {
        self.ctx.report_failure(&e.to_string());
        self.failed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stressor_core::testing::{FakeContext, FakeSched};

    fn all_policies() -> Capabilities {
        Capabilities::from_policies(
            &[Policy::Idle, Policy::Fifo, Policy::RoundRobin, Policy::Other, Policy::Batch],
            false,
        )
    }

    #[test]
    fn test_realtime_trials_are_consistent() {
        let ctx = FakeContext::new(NAME).iterations(150).seed(99);
        let sched = FakeSched::new().range(Policy::Fifo, 1, 99).range(Policy::RoundRobin, 1, 99);

        assert_eq!(churn(&ctx, &sched, &all_policies()), ExitStatus::Success);
        assert!(ctx.failures().is_empty(), "{:?}", ctx.failures());
        assert_eq!(ctx.bogo_ops(), 150);

        let realtime: Vec<_> = sched.set_calls().into_iter().filter(|c| c.1.is_realtime()).collect();
        assert!(realtime.len() >= 60);
        for (_, _, prio) in realtime {
            assert!((1..=99).contains(&prio), "priority {prio}");
        }
    }

    #[test]
    fn test_non_realtime_priority_is_zero() {
        let ctx = FakeContext::new(NAME).iterations(50);
        let sched = FakeSched::new();
        churn(&ctx, &sched, &all_policies());

        for (_, policy, prio) in sched.set_calls() {
            if !policy.is_realtime() {
                assert_eq!(prio, 0, "{policy}");
            }
        }
    }

    #[test]
    fn test_policies_cycle_in_order() {
        let ctx = FakeContext::new(NAME).iterations(10);
        let sched = FakeSched::new();
        churn(&ctx, &sched, &all_policies());

        let order: Vec<Policy> = sched.set_calls().iter().map(|c| c.1).collect();
        assert_eq!(&order[..5], &order[5..]);
        assert_eq!(order[0], Policy::Idle);
        assert_eq!(order[4], Policy::Batch);
    }

    #[test]
    fn test_priority_range_is_inclusive() {
        let ctx = FakeContext::new(NAME).iterations(400).seed(7);
        let sched = FakeSched::new().range(Policy::Fifo, 1, 2);
        let caps = Capabilities::from_policies(&[Policy::Fifo], false);
        churn(&ctx, &sched, &caps);

        let prios: Vec<i32> = sched.set_calls().iter().map(|c| c.2).collect();
        assert!(prios.contains(&1));
        assert!(prios.contains(&2));
    }

    #[test]
    fn test_target_pid_follows_random_bit() {
        let ctx = FakeContext::new(NAME).iterations(2).pid(4242).bits(&[true, false]);
        let sched = FakeSched::new();
        churn(&ctx, &sched, &Capabilities::from_policies(&[Policy::Other], false));

        let pids: Vec<i32> = sched.set_calls().iter().map(|c| c.0).collect();
        assert_eq!(pids, vec![0, 4242]);
    }

    #[test]
    fn test_rr_queries_interval() {
        let ctx = FakeContext::new(NAME).iterations(3);
        let sched = FakeSched::new();
        churn(&ctx, &sched, &Capabilities::from_policies(&[Policy::RoundRobin], false));
        assert_eq!(sched.rr_queries(), 3);
    }

    #[test]
    fn test_unsupported_range_is_skipped() {
        let ctx = FakeContext::new(NAME).iterations(4);
        let sched = FakeSched::new().unsupported(Policy::Fifo);
        let caps = Capabilities::from_policies(&[Policy::Fifo, Policy::Other], false);

        assert_eq!(churn(&ctx, &sched, &caps), ExitStatus::Success);
        // every other iteration lands on the unsupported policy
        assert_eq!(ctx.bogo_ops(), 2);
        assert!(sched.set_calls().iter().all(|c| c.1 == Policy::Other));
    }

    #[test]
    fn test_zero_width_range_ends_run() {
        let ctx = FakeContext::new(NAME).iterations(10);
        let sched = FakeSched::new().range(Policy::Fifo, 5, 5);
        let caps = Capabilities::from_policies(&[Policy::Other, Policy::Fifo], false);

        assert_eq!(churn(&ctx, &sched, &caps), ExitStatus::Failure);
        assert_eq!(ctx.bogo_ops(), 1);
        let failures = ctx.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("policy fifo (min=5, max=5)"), "{}", failures[0]);
    }

    #[test]
    fn test_misreported_policy_is_consistency_error() {
        let ctx = FakeContext::new(NAME).iterations(10).bits(&[true]);
        let sched = FakeSched::new().misreport(Policy::Batch.raw());
        let caps = Capabilities::from_policies(&[Policy::Other], false);

        assert_eq!(churn(&ctx, &sched, &caps), ExitStatus::Failure);
        assert_eq!(ctx.bogo_ops(), 0);
        let failures = ctx.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("but function returned"), "{}", failures[0]);
    }

    #[test]
    fn test_ignorable_rejections_are_silent() {
        for errno in [Errno::EPERM, Errno::EINVAL] {
            let ctx = FakeContext::new(NAME).iterations(10);
            let sched = FakeSched::new().reject_set(errno);
            assert_eq!(churn(&ctx, &sched, &all_policies()), ExitStatus::Success);
            assert!(ctx.failures().is_empty());
            assert_eq!(ctx.bogo_ops(), 10);
        }
    }

    #[test]
    fn test_unexpected_rejection_is_reported_and_loop_continues() {
        let ctx = FakeContext::new(NAME).iterations(5);
        let sched = FakeSched::new().reject_set(Errno::ESRCH);
        let caps = Capabilities::from_policies(&[Policy::Fifo], false);

        assert_eq!(churn(&ctx, &sched, &caps), ExitStatus::Failure);
        assert_eq!(ctx.bogo_ops(), 5);
        let failures = ctx.failures();
        assert_eq!(failures.len(), 5);
        assert!(failures[0].starts_with("sched_setscheduler failed: errno=3"), "{}", failures[0]);
        assert!(failures[0].ends_with("for scheduler policy fifo"), "{}", failures[0]);
    }

    #[test]
    fn test_empty_policy_list_is_not_implemented() {
        let ctx = FakeContext::new(NAME).iterations(10);
        let sched = FakeSched::new();

        assert_eq!(churn(&ctx, &sched, &Capabilities::empty()), ExitStatus::NotImplemented);
        assert_eq!(ctx.infos().len(), 1);
        assert_eq!(ctx.bogo_ops(), 0);
        assert!(sched.set_calls().is_empty());
    }

    #[test]
    fn test_empty_policy_list_quiet_on_other_instances() {
        let ctx = FakeContext::new(NAME).instance(3);
        assert_eq!(churn(&ctx, &FakeSched::new(), &Capabilities::empty()), ExitStatus::NotImplemented);
        assert!(ctx.infos().is_empty());
    }

    #[test]
    fn test_attr_enosys_is_ignored() {
        let ctx = FakeContext::new(NAME).iterations(5);
        let sched = FakeSched::new().attr_errno(Errno::ENOSYS);
        let caps = Capabilities::from_policies(&[Policy::Other], true);
        assert_eq!(churn(&ctx, &sched, &caps), ExitStatus::Success);
        assert!(sched.set_attrs().is_empty());
    }

    #[test]
    fn test_attr_failure_is_reported() {
        let ctx = FakeContext::new(NAME).iterations(2);
        let sched = FakeSched::new().attr_errno(Errno::EFAULT);
        let caps = Capabilities::from_policies(&[Policy::Other], true);
        assert_eq!(churn(&ctx, &sched, &caps), ExitStatus::Failure);
        assert_eq!(ctx.failures().len(), 2);
        assert!(ctx.failures()[0].starts_with("sched_getattr failed"));
    }

    #[test]
    fn test_ratchet_steps_once_per_period() {
        let sched = FakeSched::new().util_clamp(0, 1024);
        let caps = Capabilities::from_policies(&[Policy::Other], true);

        let ctx = FakeContext::new(NAME).iterations(RATCHET_PERIOD as u64 + 1);
        churn(&ctx, &sched, &caps);

        let written: Vec<u32> = sched.set_attrs().iter().map(|a| a.sched_util_max).collect();
        assert_eq!(written.len(), RATCHET_PERIOD as usize + 1);
        assert!(written[..RATCHET_PERIOD as usize].iter().all(|&v| v == 1024));
        assert_eq!(written[RATCHET_PERIOD as usize], 1023);

        let flags = sched.set_attrs()[0].sched_flags;
        assert_eq!(flags & SCHED_FLAG_KEEP_ALL, SCHED_FLAG_KEEP_ALL);
        assert_eq!(flags & SCHED_FLAG_UTIL_CLAMP_MAX, SCHED_FLAG_UTIL_CLAMP_MAX);
    }

    #[test]
    fn test_ratchet_never_below_min_seen() {
        let sched = FakeSched::new().util_clamp(1000, 1024);
        let caps = Capabilities::from_policies(&[Policy::Other, Policy::Batch], true);

        let ctx = FakeContext::new(NAME).iterations(10_000);
        assert_eq!(churn(&ctx, &sched, &caps), ExitStatus::Success);

        let attrs = sched.set_attrs();
        assert!(attrs.iter().all(|a| a.sched_util_max >= 1000));
        assert_eq!(attrs.last().map(|a| a.sched_util_max), Some(1000));
    }

    #[test]
    fn test_ratchet_unit() {
        let mut r = UtilClampRatchet::new();
        assert_eq!(r.observe(10, 12), 12);
        for _ in 0..RATCHET_PERIOD - 1 {
            assert!(!r.tick());
        }
        assert!(r.tick());
        assert_eq!(r.current(), 11);
        for _ in 0..RATCHET_PERIOD * 5 {
            r.tick();
        }
        assert_eq!(r.current(), 10);
        assert_eq!(r.min_seen(), 10);
        assert_eq!(r.max_seen(), 12);
    }

    #[test]
    fn test_ratchet_min_never_exceeds_max() {
        let mut r = UtilClampRatchet::new();
        r.observe(900, 800);
        assert_eq!(r.min_seen(), 800);
        assert_eq!(r.current(), 800);
    }

    #[test]
    fn test_yield_every_completed_trial() {
        let ctx = FakeContext::new(NAME).iterations(7);
        let sched = FakeSched::new();
        churn(&ctx, &sched, &all_policies());
        assert_eq!(sched.yields(), 7);
    }

    #[test]
    fn test_stressor_metadata() {
        let s = SchedPolicyStressor::with_capabilities(CurrentSched::new(), Capabilities::empty());
        assert_eq!(s.name(), "schedpolicy");
        assert_eq!(s.help().len(), 2);
        assert!(s.classes().contains(&StressClass::Scheduler));
        assert_eq!(s.verify(), stressor_core::VerifyMode::Optional);
    }
}
