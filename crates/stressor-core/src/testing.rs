//! In-memory fakes for driving stressors without a supervisor or kernel.
//!
//! Enabled for dependent crates through the `testing` feature.

use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::collections::{HashMap, VecDeque};

use nix::errno::Errno;

use crate::metrics::Aggregation;
use crate::sched::{Policy, SchedAttr};
use crate::traits::{SchedOps, WorkerContext};

/// Metric captured by [`FakeContext::report_metric`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMetric {
    pub slot: usize,
    pub label: &'static str,
    pub value: f64,
    pub kind: Aggregation,
}

/// Worker context that records everything a stressor reports.
///
/// `keep_running` allows exactly `iterations` passes through a
/// run-then-check loop.
pub struct FakeContext {
    name: String,
    pid: i32,
    instance: u32,
    iterations: u64,
    checks: Cell<u64>,
    bogo: Cell<u64>,
    failures: RefCell<Vec<String>>,
    infos: RefCell<Vec<String>>,
    metrics: RefCell<Vec<RecordedMetric>>,
    bits: RefCell<VecDeque<bool>>,
    rng: Cell<u32>,
    fork_retry: Cell<bool>,
    fork_errnos: RefCell<Vec<(Errno, u32)>>,
}

impl FakeContext {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pid: std::process::id() as i32,
            instance: 0,
            iterations: 1,
            checks: Cell::new(0),
            bogo: Cell::new(0),
            failures: RefCell::new(Vec::new()),
            infos: RefCell::new(Vec::new()),
            metrics: RefCell::new(Vec::new()),
            bits: RefCell::new(VecDeque::new()),
            rng: Cell::new(0x2545_f491),
            fork_retry: Cell::new(false),
            fork_errnos: RefCell::new(Vec::new()),
        }
    }

    pub fn iterations(mut self, n: u64) -> Self {
        self.iterations = n.max(1);
        self
    }

    pub fn instance(mut self, instance: u32) -> Self {
        self.instance = instance;
        self
    }

    pub fn pid(mut self, pid: i32) -> Self {
        self.pid = pid;
        self
    }

    /// Queue values returned by `random_bit` before the generator takes over
    pub fn bits(self, bits: &[bool]) -> Self {
        self.bits.borrow_mut().extend(bits.iter().copied());
        self
    }

    pub fn seed(self, seed: u32) -> Self {
        self.rng.set(seed.max(1));
        self
    }

    /// Answer given to `request_fork_retry`
    pub fn retry_forks(self, retry: bool) -> Self {
        self.fork_retry.set(retry);
        self
    }

    pub fn bogo_ops(&self) -> u64 {
        self.bogo.get()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.borrow().clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.infos.borrow().clone()
    }

    pub fn metrics(&self) -> Vec<RecordedMetric> {
        self.metrics.borrow().clone()
    }

    /// Every `request_fork_retry` call as `(errno, attempt)`
    pub fn fork_errnos(&self) -> Vec<(Errno, u32)> {
        self.fork_errnos.borrow().clone()
    }

    // xorshift32
    fn next(&self) -> u32 {
        let mut x = self.rng.get();
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng.set(x);
        x
    }
}

impl WorkerContext for FakeContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> i32 {
        self.pid
    }

    fn instance(&self) -> u32 {
        self.instance
    }

    fn keep_running(&self) -> bool {
        let n = self.checks.get() + 1;
        self.checks.set(n);
        n < self.iterations
    }

    fn bogo_inc(&self) {
        self.bogo.set(self.bogo.get() + 1);
    }

    fn report_failure(&self, msg: &str) {
        self.failures.borrow_mut().push(msg.to_string());
    }

    fn report_info(&self, msg: &str) {
        self.infos.borrow_mut().push(msg.to_string());
    }

    fn report_metric(&self, slot: usize, label: &'static str, value: f64, kind: Aggregation) {
        self.metrics.borrow_mut().push(RecordedMetric { slot, label, value, kind });
    }

    fn request_fork_retry(&self, errno: Errno, attempt: u32) -> bool {
        self.fork_errnos.borrow_mut().push((errno, attempt));
        self.fork_retry.get()
    }

    fn random_bit(&self) -> bool {
        if let Some(bit) = self.bits.borrow_mut().pop_front() {
            return bit;
        }
        self.next() & 1 == 1
    }

    fn random_u32(&self) -> u32 {
        self.next()
    }
}

/// Fake kernel scheduler that always stores what it is given.
///
/// Defaults: every candidate policy exists, realtime range 1..=99,
/// no utilization clamp support (`sched_getattr` fails with ENOSYS).
pub struct FakeSched {
    ranges: HashMap<Policy, (i32, i32)>,
    unsupported: Vec<Policy>,
    set_errno: Option<Errno>,
    misreport: Option<i32>,
    attr_errno: Option<Errno>,
    current: Cell<(i32, i32)>,
    attr: Cell<SchedAttr>,
    set_calls: RefCell<Vec<(i32, Policy, i32)>>,
    set_attrs: RefCell<Vec<SchedAttr>>,
    rr_queries: Cell<u64>,
    yields: Cell<u64>,
}

impl FakeSched {
    pub fn new() -> Self {
        let mut ranges = HashMap::new();
        ranges.insert(Policy::Fifo, (1, 99));
        ranges.insert(Policy::RoundRobin, (1, 99));
        Self {
            ranges,
            unsupported: Vec::new(),
            set_errno: None,
            misreport: None,
            attr_errno: Some(Errno::ENOSYS),
            current: Cell::new((Policy::Other.raw(), 0)),
            attr: Cell::new(SchedAttr::new()),
            set_calls: RefCell::new(Vec::new()),
            set_attrs: RefCell::new(Vec::new()),
            rr_queries: Cell::new(0),
            yields: Cell::new(0),
        }
    }

    pub fn range(mut self, policy: Policy, min: i32, max: i32) -> Self {
        self.ranges.insert(policy, (min, max));
        self
    }

    /// Priority queries for `policy` fail with EINVAL
    pub fn unsupported(mut self, policy: Policy) -> Self {
        self.unsupported.push(policy);
        self
    }

    /// Every `sched_setscheduler` fails with `errno`
    pub fn reject_set(mut self, errno: Errno) -> Self {
        self.set_errno = Some(errno);
        self
    }

    /// `sched_getscheduler` always answers `raw`
    pub fn misreport(mut self, raw: i32) -> Self {
        self.misreport = Some(raw);
        self
    }

    /// Enable `sched_getattr`/`sched_setattr` with the given clamps
    pub fn util_clamp(mut self, min: u32, max: u32) -> Self {
        self.attr_errno = None;
        let mut attr = SchedAttr::new();
        attr.sched_util_min = min;
        attr.sched_util_max = max;
        self.attr.set(attr);
        self
    }

    /// `sched_getattr`/`sched_setattr` fail with `errno`
    pub fn attr_errno(mut self, errno: Errno) -> Self {
        self.attr_errno = Some(errno);
        self
    }

    pub fn set_calls(&self) -> Vec<(i32, Policy, i32)> {
        self.set_calls.borrow().clone()
    }

    pub fn set_attrs(&self) -> Vec<SchedAttr> {
        self.set_attrs.borrow().clone()
    }

    pub fn rr_queries(&self) -> u64 {
        self.rr_queries.get()
    }

    pub fn yields(&self) -> u64 {
        self.yields.get()
    }

    fn range_of(&self, policy: Policy) -> Result<(i32, i32), Errno> {
        if self.unsupported.contains(&policy) {
            return Err(Errno::EINVAL);
        }
        Ok(self.ranges.get(&policy).copied().unwrap_or((0, 0)))
    }
}

impl Default for FakeSched {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedOps for FakeSched {
    fn priority_min(&self, policy: Policy) -> Result<i32, Errno> {
        self.range_of(policy).map(|r| r.0)
    }

    fn priority_max(&self, policy: Policy) -> Result<i32, Errno> {
        self.range_of(policy).map(|r| r.1)
    }

    fn set_scheduler(&self, pid: i32, policy: Policy, priority: i32) -> Result<(), Errno> {
        self.set_calls.borrow_mut().push((pid, policy, priority));
        if let Some(errno) = self.set_errno {
            return Err(errno);
        }
        self.current.set((policy.raw(), priority));
        Ok(())
    }

    fn get_scheduler(&self, _pid: i32) -> Result<i32, Errno> {
        Ok(self.misreport.unwrap_or(self.current.get().0))
    }

    fn rr_interval(&self, _pid: i32) -> Result<Duration, Errno> {
        self.rr_queries.set(self.rr_queries.get() + 1);
        Ok(Duration::from_millis(100))
    }

    fn get_param(&self, _pid: i32) -> Result<i32, Errno> {
        Ok(self.current.get().1)
    }

    fn set_param(&self, _pid: i32, priority: i32) -> Result<(), Errno> {
        let (policy, _) = self.current.get();
        self.current.set((policy, priority));
        Ok(())
    }

    fn get_attr(&self, _pid: i32) -> Result<SchedAttr, Errno> {
        match self.attr_errno {
            Some(errno) => Err(errno),
            None => Ok(self.attr.get()),
        }
    }

    fn set_attr(&self, _pid: i32, attr: &SchedAttr) -> Result<(), Errno> {
        if let Some(errno) = self.attr_errno {
            return Err(errno);
        }
        self.set_attrs.borrow_mut().push(*attr);
        self.attr.set(*attr);
        Ok(())
    }

    fn yield_now(&self) {
        self.yields.set(self.yields.get() + 1);
    }
}
