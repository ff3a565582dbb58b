//! Shared measurement block for SIGHUP latency
//!
//! The block lives in a process-shared mapping so that the worker, its
//! forked children and the SIGHUP handler running in any of them see the
//! same fields. The handler only touches atomics and the monotonic clock.

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU64, Ordering};

use stressor_core::StressResult;
use stressor_runtime::signal::AsyncSignalHandler;
use stressor_runtime::time::now_secs;
use stressor_runtime::{SharedPod, SharedRegion};

/// Latency bookkeeping shared between a worker, its children and the
/// SIGHUP handler.
///
/// Floating-point fields are stored as `f64` bit patterns.
#[repr(C)]
pub struct MeasurementBlock {
    signalled: AtomicBool,
    target_pid: AtomicI32,
    trial_start: AtomicU64,
    latency: AtomicU64,
    count: AtomicU64,
}

// Safety: atomics only; all-zero means no trial, no samples.
unsafe impl SharedPod for MeasurementBlock {}

impl MeasurementBlock {
    /// Clear the per-trial flag before a new trial
    #[inline]
    pub fn begin_trial(&self) {
        self.signalled.store(false, Ordering::Release);
    }

    #[inline]
    pub fn signalled(&self) -> bool {
        self.signalled.load(Ordering::Acquire)
    }

    /// Process the current trial waits to observe; 0 for none
    #[inline]
    pub fn target(&self) -> i32 {
        self.target_pid.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_target(&self, pid: i32) {
        self.target_pid.store(pid, Ordering::Release);
    }

    /// Arm the trial timer; must happen before the triggering event
    #[inline]
    pub fn start_timer(&self, now: f64) {
        self.trial_start.store(now.to_bits(), Ordering::Release);
    }

    #[inline]
    pub fn clear_timer(&self) {
        self.trial_start.store(0, Ordering::Release);
    }

    pub fn trial_start(&self) -> f64 {
        f64::from_bits(self.trial_start.load(Ordering::Acquire))
    }

    /// Handler side: note the signal and, if a trial timer was armed,
    /// add one latency sample.
    ///
    /// The timer is consumed, so a second delivery for the same trial
    /// does not add another sample. Async-signal-safe.
    #[inline]
    pub fn record_signal(&self, now: f64) {
        self.signalled.store(true, Ordering::Release);
        let start = f64::from_bits(self.trial_start.swap(0, Ordering::AcqRel));
        if start > 0.0 {
            let latency = now - start;
            if latency >= 0.0 {
                let _ = self.latency.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                    Some((f64::from_bits(bits) + latency).to_bits())
                });
                self.count.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    #[inline]
    pub fn samples(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Sum of all latency samples, in seconds
    pub fn total_latency(&self) -> f64 {
        f64::from_bits(self.latency.load(Ordering::Acquire))
    }

    /// Mean latency in seconds; 0.0 without samples
    pub fn mean_latency(&self) -> f64 {
        match self.samples() {
            0 => 0.0,
            n => self.total_latency() / n as f64,
        }
    }
}

/// Block the SIGHUP handler writes to, null when none is acquired.
/// Forked children inherit the pointer together with the mapping.
static ACTIVE_BLOCK: AtomicPtr<MeasurementBlock> = AtomicPtr::new(ptr::null_mut());

extern "C" fn on_sighup(_sig: libc::c_int) {
    let block = ACTIVE_BLOCK.load(Ordering::Acquire);
    if !block.is_null() {
        // Safety: the pointer is cleared before the mapping is unmapped.
        unsafe { (*block).record_signal(now_secs()) };
    }
}

/// SIGHUP handler feeding the acquired [`Measurement`]
// Safety: on_sighup only reads the clock and updates atomics.
pub const SIGHUP_HANDLER: AsyncSignalHandler = unsafe { AsyncSignalHandler::new(on_sighup) };

/// Scoped ownership of the measurement block.
///
/// `acquire` maps a zeroed block and points the SIGHUP handler at it;
/// dropping the value detaches the handler and unmaps the block, so
/// release happens exactly once on every exit path.
pub struct Measurement {
    region: SharedRegion<MeasurementBlock>,
}

impl Measurement {
    pub fn acquire() -> StressResult<Self> {
        let region = SharedRegion::<MeasurementBlock>::new()?;
        ACTIVE_BLOCK.store(region.as_ptr() as *mut MeasurementBlock, Ordering::Release);
        Ok(Self { region })
    }

    #[inline]
    pub fn block(&self) -> &MeasurementBlock {
        self.region.get()
    }
}

impl Drop for Measurement {
    fn drop(&mut self) {
        let ours = self.region.as_ptr() as *mut MeasurementBlock;
        let _ = ACTIVE_BLOCK.compare_exchange(ours, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire);
    }
}
