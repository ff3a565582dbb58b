//! Worker process state
//!
//! Each worker process owns one [`WorkerSlot`] in a shared region that
//! the supervisor mapped before forking. The worker writes its bogo-op
//! count, exit code and metrics there; the supervisor reads them after
//! reaping. [`Worker`] is the `WorkerContext` a stressor sees.

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use stressor_core::{kdebug, kerror, kinfo, kwarn};
use stressor_core::{Aggregation, CancellationToken, Errno, WorkerContext};

use crate::config::StressConfig;
use crate::memory::SharedPod;
use crate::rng::RandomSource;

/// Metric slots per worker
pub const MAX_METRICS: usize = 8;

/// Longest metric label kept (bytes, UTF-8 boundary respected)
pub const LABEL_MAX: usize = 48;

/// One metric published by a worker
#[repr(C)]
pub struct MetricCell {
    /// 0 while unset, otherwise `Aggregation as u8`
    kind: AtomicU8,
    label_len: AtomicUsize,
    label: [AtomicU8; LABEL_MAX],
    value: AtomicU64,
}

impl MetricCell {
    fn store(&self, label: &str, value: f64, kind: Aggregation) {
        let mut len = label.len().min(LABEL_MAX);
        while !label.is_char_boundary(len) {
            len -= 1;
        }
        for (cell, byte) in self.label.iter().zip(&label.as_bytes()[..len]) {
            cell.store(*byte, Ordering::Relaxed);
        }
        self.label_len.store(len, Ordering::Relaxed);
        self.value.store(value.to_bits(), Ordering::Relaxed);
        self.kind.store(kind as u8, Ordering::Release);
    }

    /// `(label, value, kind)` if the cell was written
    pub fn load(&self) -> Option<(String, f64, Aggregation)> {
        let kind = Aggregation::from_u8(self.kind.load(Ordering::Acquire))?;
        let len = self.label_len.load(Ordering::Relaxed).min(LABEL_MAX);
        let bytes: Vec<u8> = self.label[..len].iter().map(|b| b.load(Ordering::Relaxed)).collect();
        let label = String::from_utf8_lossy(&bytes).into_owned();
        let value = f64::from_bits(self.value.load(Ordering::Relaxed));
        Some((label, value, kind))
    }
}

/// Per-worker record in shared memory
#[repr(C)]
pub struct WorkerSlot {
    pid: AtomicI32,
    bogo_ops: AtomicU64,
    exit_code: AtomicI32,
    finished: AtomicBool,
    metrics: [MetricCell; MAX_METRICS],
}

// Safety: atomics only; all-zero is "not started, nothing reported".
unsafe impl SharedPod for WorkerSlot {}

impl WorkerSlot {
    #[inline]
    pub fn pid(&self) -> i32 {
        self.pid.load(Ordering::Acquire)
    }

    #[inline]
    pub fn bogo_ops(&self) -> u64 {
        self.bogo_ops.load(Ordering::Acquire)
    }

    /// Exit code recorded by the worker, if it got that far
    pub fn exit_code(&self) -> Option<i32> {
        if self.finished.load(Ordering::Acquire) {
            Some(self.exit_code.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    pub fn metrics(&self) -> impl Iterator<Item = (String, f64, Aggregation)> + '_ {
        self.metrics.iter().filter_map(MetricCell::load)
    }

    pub(crate) fn start(&self, pid: i32) {
        self.pid.store(pid, Ordering::Release);
    }

    pub(crate) fn finish(&self, code: i32) {
        self.exit_code.store(code, Ordering::Relaxed);
        self.finished.store(true, Ordering::Release);
    }
}

/// `WorkerContext` for one worker process
pub struct Worker<'a> {
    name: &'static str,
    instance: u32,
    pid: i32,
    slot: &'a WorkerSlot,
    stop: CancellationToken,
    max_ops: u64,
    rng: RandomSource,
    fork_retry_limit: u32,
    fork_backoff: Duration,
}

impl<'a> Worker<'a> {
    pub fn new(
        name: &'static str,
        instance: u32,
        slot: &'a WorkerSlot,
        stop: CancellationToken,
        config: &StressConfig,
    ) -> Self {
        let pid = nix::unistd::getpid().as_raw();
        slot.start(pid);
        Self {
            name,
            instance,
            pid,
            slot,
            stop,
            max_ops: config.max_ops,
            rng: RandomSource::from_entropy(),
            fork_retry_limit: config.fork_retry_limit,
            fork_backoff: config.fork_backoff,
        }
    }

    #[inline]
    pub fn bogo_ops(&self) -> u64 {
        self.slot.bogo_ops()
    }

    /// Record the stressor's exit code in the slot
    pub fn finish(&self, code: i32) {
        self.slot.finish(code);
    }
}

impl WorkerContext for Worker<'_> {
    fn name(&self) -> &str {
        self.name
    }

    fn pid(&self) -> i32 {
        self.pid
    }

    fn instance(&self) -> u32 {
        self.instance
    }

    #[inline]
    fn keep_running(&self) -> bool {
        !self.stop.is_cancelled() && (self.max_ops == 0 || self.bogo_ops() < self.max_ops)
    }

    #[inline]
    fn bogo_inc(&self) {
        self.slot.bogo_ops.fetch_add(1, Ordering::Release);
    }

    fn report_failure(&self, msg: &str) {
        kerror!("{}: [{}] {}", self.name, self.pid, msg);
    }

    fn report_info(&self, msg: &str) {
        kinfo!("{}: [{}] {}", self.name, self.pid, msg);
    }

    fn report_metric(&self, slot: usize, label: &'static str, value: f64, kind: Aggregation) {
        match self.slot.metrics.get(slot) {
            Some(cell) => cell.store(label, value, kind),
            None => kwarn!("{}: [{}] metric slot {} out of range", self.name, self.pid, slot),
        }
    }

    fn request_fork_retry(&self, errno: Errno, attempt: u32) -> bool {
        if !matches!(errno, Errno::EAGAIN | Errno::ENOMEM) || !self.keep_running() {
            return false;
        }
        if attempt > self.fork_retry_limit {
            return false;
        }
        kdebug!(
            "{}: [{}] fork failed: errno={} ({}), retry {}/{}",
            self.name,
            self.pid,
            errno as i32,
            errno.desc(),
            attempt,
            self.fork_retry_limit
        );
        std::thread::sleep(self.fork_backoff);
        true
    }

    fn random_bit(&self) -> bool {
        self.rng.bit()
    }

    fn random_u32(&self) -> u32 {
        self.rng.u32()
    }
}
