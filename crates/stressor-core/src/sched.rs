//! Scheduling policy and extended attribute types
//!
//! Raw policy numbers come from the platform's libc; which policies
//! exist at all is decided at runtime by capability discovery.

use core::fmt;

/// POSIX (and Linux) scheduling policies the policy stressor cycles through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    Idle,
    Fifo,
    RoundRobin,
    Other,
    Batch,
}

impl Policy {
    /// Candidate policies for this target, in stressing order.
    ///
    /// Only compile-time availability is considered here; the kernel may
    /// still reject some of them.
    pub fn candidates() -> &'static [Policy] {
        cfg_if::cfg_if! {
            if #[cfg(any(target_os = "linux", target_os = "android"))] {
                &[Policy::Idle, Policy::Fifo, Policy::RoundRobin, Policy::Other, Policy::Batch]
            } else if #[cfg(any(target_os = "openbsd", target_os = "macos", target_os = "ios"))] {
                &[]
            } else {
                &[Policy::Fifo, Policy::RoundRobin, Policy::Other]
            }
        }
    }

    /// Raw policy number passed to the kernel
    pub fn raw(self) -> i32 {
        cfg_if::cfg_if! {
            if #[cfg(any(target_os = "linux", target_os = "android"))] {
                match self {
                    Policy::Idle => libc::SCHED_IDLE,
                    Policy::Fifo => libc::SCHED_FIFO,
                    Policy::RoundRobin => libc::SCHED_RR,
                    Policy::Other => libc::SCHED_OTHER,
                    Policy::Batch => libc::SCHED_BATCH,
                }
            } else {
                match self {
                    Policy::Fifo => libc::SCHED_FIFO,
                    Policy::RoundRobin => libc::SCHED_RR,
                    Policy::Other | Policy::Idle | Policy::Batch => libc::SCHED_OTHER,
                }
            }
        }
    }

    /// Inverse of [`Policy::raw`]
    pub fn from_raw(raw: i32) -> Option<Policy> {
        Policy::candidates().iter().copied().find(|p| p.raw() == raw)
    }

    /// Realtime policies carry a priority range; the rest run at priority 0
    #[inline]
    pub fn is_realtime(self) -> bool {
        matches!(self, Policy::Fifo | Policy::RoundRobin)
    }

    pub fn name(self) -> &'static str {
        match self {
            Policy::Idle => "idle",
            Policy::Fifo => "fifo",
            Policy::RoundRobin => "rr",
            Policy::Other => "other",
            Policy::Batch => "batch",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size of the first published `struct sched_attr` (SCHED_ATTR_SIZE_VER1)
pub const SCHED_ATTR_SIZE: u32 = 56;

/// Keep the current policy when calling `sched_setattr`
pub const SCHED_FLAG_KEEP_POLICY: u64 = 0x08;
/// Keep the current parameters when calling `sched_setattr`
pub const SCHED_FLAG_KEEP_PARAMS: u64 = 0x10;
pub const SCHED_FLAG_KEEP_ALL: u64 = SCHED_FLAG_KEEP_POLICY | SCHED_FLAG_KEEP_PARAMS;
/// Apply `sched_util_max` from the attribute block
pub const SCHED_FLAG_UTIL_CLAMP_MAX: u64 = 0x40;

/// Linux `struct sched_attr`, layout-compatible with the kernel ABI
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedAttr {
    pub size: u32,
    pub sched_policy: u32,
    pub sched_flags: u64,
    pub sched_nice: i32,
    pub sched_priority: u32,
    pub sched_runtime: u64,
    pub sched_deadline: u64,
    pub sched_period: u64,
    pub sched_util_min: u32,
    pub sched_util_max: u32,
}

impl SchedAttr {
    /// Zeroed attribute block with `size` filled in
    pub fn new() -> Self {
        Self {
            size: SCHED_ATTR_SIZE,
            ..Default::default()
        }
    }
}

/// One policy trial: `{policy, priority, target pid}`.
///
/// Built fresh every iteration of the policy stressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyTrial {
    pub policy: Policy,
    pub priority: i32,
    /// 0 means "the calling thread"
    pub pid: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_layout_matches_kernel_abi() {
        assert_eq!(core::mem::size_of::<SchedAttr>(), SCHED_ATTR_SIZE as usize);
        assert_eq!(SchedAttr::new().size, SCHED_ATTR_SIZE);
    }

    #[test]
    fn test_realtime_classification() {
        assert!(Policy::Fifo.is_realtime());
        assert!(Policy::RoundRobin.is_realtime());
        assert!(!Policy::Other.is_realtime());
        assert!(!Policy::Idle.is_realtime());
        assert!(!Policy::Batch.is_realtime());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_raw_roundtrip() {
        for &p in Policy::candidates() {
            assert_eq!(Policy::from_raw(p.raw()), Some(p));
        }
        assert_eq!(Policy::Fifo.raw(), libc::SCHED_FIFO);
        assert_eq!(Policy::from_raw(-5), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(Policy::RoundRobin.to_string(), "rr");
        assert_eq!(Policy::Batch.name(), "batch");
    }
}
