//! Stress run supervisor
//!
//! Forks `instances` worker processes for one stressor, lets them run
//! until the timeout, raises the shared stop flag, reaps every worker
//! and folds their slots into a [`RunReport`].

use core::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::wait::WaitStatus;
use stressor_core::{kdebug, kerror, kinfo, kwarn};
use stressor_core::{Aggregation, CancellationToken, ExitStatus, Metric, Retry, StressResult, Stressor};

use crate::config::StressConfig;
use crate::memory::{SharedPod, SharedRegion};
use crate::process::{fork_with, ChildProcess};
use crate::worker::{Worker, WorkerSlot};

/// Run-wide flags shared with every worker
#[repr(C)]
pub struct ControlBlock {
    stop: AtomicBool,
}

// Safety: a single atomic; zero is "keep running".
unsafe impl SharedPod for ControlBlock {}

/// Outcome of one worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceReport {
    pub instance: u32,
    pub pid: i32,
    pub status: ExitStatus,
    pub bogo_ops: u64,
}

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stressor: &'static str,
    pub instances: Vec<InstanceReport>,
    pub metrics: Vec<Metric>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn bogo_ops(&self) -> u64 {
        self.instances.iter().map(|i| i.bogo_ops).sum()
    }

    /// Worst status over all instances; `NoResource` if none started
    pub fn status(&self) -> ExitStatus {
        if self.instances.is_empty() {
            return ExitStatus::NoResource;
        }
        self.instances
            .iter()
            .fold(ExitStatus::Success, |acc, i| acc.worst(i.status))
    }

    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bogo_ops() as f64 / secs
        } else {
            0.0
        }
    }
}

/// Drives one stressor across its worker processes
pub struct Supervisor {
    config: StressConfig,
}

impl Supervisor {
    pub fn new(config: StressConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StressConfig {
        &self.config
    }

    /// Run `stressor` to completion.
    ///
    /// Errors only when the shared regions cannot be created; worker
    /// failures are reported through the returned statuses.
    pub fn run(&self, stressor: &dyn Stressor) -> StressResult<RunReport> {
        crate::init();

        let control = SharedRegion::<ControlBlock>::new()?;
        let slots = SharedRegion::<WorkerSlot>::with_len(self.config.instances)?;
        // Safety: `control` outlives every worker (they are reaped below).
        let stop = unsafe { CancellationToken::from_shared(&control.get().stop) };

        let started = Instant::now();
        let mut children: Vec<(u32, ChildProcess)> = Vec::with_capacity(self.config.instances);
        for (i, slot) in slots.iter().enumerate() {
            let instance = i as u32;
            match self.fork_worker(stressor, instance, slot, &stop) {
                Ok(child) => children.push((instance, child)),
                Err(errno) => {
                    kerror!(
                        "{}: cannot fork worker {}: errno={} ({})",
                        stressor.name(),
                        instance,
                        errno as i32,
                        errno.desc()
                    );
                    break;
                }
            }
        }
        kinfo!("{}: started {} instance(s)", stressor.name(), children.len());

        let mut statuses: Vec<(u32, i32, Option<WaitStatus>)> = Vec::with_capacity(children.len());
        self.reap_until(&mut children, &mut statuses, started + self.config.timeout);

        stop.cancel();
        kdebug!("{}: stop flag raised, {} still running", stressor.name(), children.len());
        self.reap_until(&mut children, &mut statuses, Instant::now() + self.config.kill_grace);

        for (instance, child) in children.drain(..) {
            kwarn!("{}: worker {} did not stop, killing", stressor.name(), instance);
            let pid = child.pid().as_raw();
            statuses.push((instance, pid, child.terminate().ok().flatten()));
        }
        let elapsed = started.elapsed();

        statuses.sort_by_key(|(instance, _, _)| *instance);
        let instances = statuses
            .into_iter()
            .map(|(instance, pid, status)| {
                let slot = &slots[instance as usize];
                InstanceReport {
                    instance,
                    pid,
                    status: exit_status(status, slot),
                    bogo_ops: slot.bogo_ops(),
                }
            })
            .collect();

        Ok(RunReport {
            stressor: stressor.name(),
            instances,
            metrics: aggregate(&slots),
            elapsed,
        })
    }

    fn fork_worker(
        &self,
        stressor: &dyn Stressor,
        instance: u32,
        slot: &WorkerSlot,
        stop: &CancellationToken,
    ) -> Result<ChildProcess, Errno> {
        let backoff = self.config.fork_backoff;
        fork_with(
            Retry::bounded(self.config.fork_retry_limit.saturating_add(1)),
            |errno| {
                let transient = matches!(errno, Errno::EAGAIN | Errno::ENOMEM);
                if transient {
                    std::thread::sleep(backoff);
                }
                transient
            },
            || {
                let worker = Worker::new(stressor.name(), instance, slot, stop.clone(), &self.config);
                let status = stressor.run(&worker);
                worker.finish(status.code());
                status.code()
            },
        )
    }

    /// Poll-reap children until all are gone or `deadline` passes
    fn reap_until(
        &self,
        children: &mut Vec<(u32, ChildProcess)>,
        statuses: &mut Vec<(u32, i32, Option<WaitStatus>)>,
        deadline: Instant,
    ) {
        loop {
            let mut i = 0;
            while i < children.len() {
                match children[i].1.try_wait() {
                    Ok(None) => i += 1,
                    Ok(Some(status)) => {
                        let (instance, child) = children.swap_remove(i);
                        statuses.push((instance, child.pid().as_raw(), Some(status)));
                    }
                    Err(errno) => {
                        kerror!("waitpid on worker failed: errno={} ({})", errno as i32, errno.desc());
                        let (instance, child) = children.swap_remove(i);
                        let pid = child.pid().as_raw();
                        statuses.push((instance, pid, child.terminate().ok().flatten()));
                    }
                }
            }
            if children.is_empty() || Instant::now() >= deadline {
                return;
            }
            std::thread::sleep(self.config.reap_poll);
        }
    }
}

fn exit_status(status: Option<WaitStatus>, slot: &WorkerSlot) -> ExitStatus {
    match status {
        Some(WaitStatus::Exited(_, code)) => ExitStatus::from_code(code),
        // Killed workers keep whatever they recorded before dying
        _ => slot.exit_code().map_or(ExitStatus::Failure, ExitStatus::from_code),
    }
}

/// Combine metrics with the same label across all worker slots,
/// in order of first appearance.
fn aggregate(slots: &[WorkerSlot]) -> Vec<Metric> {
    let mut groups: Vec<(String, Aggregation, Vec<f64>)> = Vec::new();
    for (label, value, kind) in slots.iter().flat_map(WorkerSlot::metrics) {
        match groups.iter_mut().find(|(l, k, _)| *l == label && *k == kind) {
            Some((_, _, samples)) => samples.push(value),
            None => groups.push((label, kind, vec![value])),
        }
    }
    groups
        .into_iter()
        .map(|(label, kind, samples)| Metric {
            value: kind.combine(&samples),
            label,
            kind,
        })
        .collect()
}
