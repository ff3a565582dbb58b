//! Runtime scheduler capability discovery
//!
//! `Policy::candidates()` lists what the target can name at compile time.
//! At startup each candidate is probed against the running kernel and
//! only the accepted ones are kept, together with whether the extended
//! attribute interface (utilization clamps) is present.

use stressor_core::{kdebug, Errno, Policy, SchedOps};

/// One policy the kernel recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyCaps {
    pub policy: Policy,
    /// The policy takes a priority from a range (FIFO/RR)
    pub realtime: bool,
}

/// Scheduler features of the running platform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    policies: Vec<PolicyCaps>,
    util_clamp: bool,
}

impl Capabilities {
    /// Probe `sched` for every compile-time candidate policy.
    ///
    /// A policy is kept when `sched_get_priority_min` accepts it.
    /// Utilization clamping is assumed available unless
    /// `sched_getattr` fails with ENOSYS.
    pub fn discover<S: SchedOps + ?Sized>(sched: &S) -> Self {
        let policies = Policy::candidates()
            .iter()
            .copied()
            .filter(|&policy| match sched.priority_min(policy) {
                Ok(_) => true,
                Err(errno) => {
                    kdebug!("sched policy {} unavailable: errno={}", policy, errno as i32);
                    false
                }
            })
            .map(|policy| PolicyCaps {
                policy,
                realtime: policy.is_realtime(),
            })
            .collect();

        let util_clamp = !matches!(sched.get_attr(0), Err(Errno::ENOSYS));

        Self { policies, util_clamp }
    }

    /// Capabilities with a fixed policy list, skipping the probe
    pub fn from_policies(policies: &[Policy], util_clamp: bool) -> Self {
        Self {
            policies: policies
                .iter()
                .map(|&policy| PolicyCaps {
                    policy,
                    realtime: policy.is_realtime(),
                })
                .collect(),
            util_clamp,
        }
    }

    /// Nothing available
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn policies(&self) -> &[PolicyCaps] {
        &self.policies
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    #[inline]
    pub fn util_clamp(&self) -> bool {
        self.util_clamp
    }
}
