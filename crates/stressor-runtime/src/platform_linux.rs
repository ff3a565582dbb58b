//! Linux scheduler syscalls

use core::time::Duration;

use nix::errno::Errno;
use stressor_core::sched::SCHED_ATTR_SIZE;
use stressor_core::{Policy, SchedAttr, SchedOps};

/// Bit the kernel may OR into `sched_getscheduler`'s result
const SCHED_RESET_ON_FORK: i32 = 0x4000_0000;

#[inline]
fn check(ret: libc::c_int) -> Result<libc::c_int, Errno> {
    if ret < 0 {
        Err(Errno::last())
    } else {
        Ok(ret)
    }
}

fn param(priority: i32) -> libc::sched_param {
    // Zeroed first: some libcs carry extra sporadic-server fields.
    let mut param: libc::sched_param = unsafe { core::mem::zeroed() };
    param.sched_priority = priority;
    param
}

/// `SchedOps` backed by the real kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxSched;

impl LinuxSched {
    pub fn new() -> Self {
        Self
    }
}

impl SchedOps for LinuxSched {
    fn priority_min(&self, policy: Policy) -> Result<i32, Errno> {
        check(unsafe { libc::sched_get_priority_min(policy.raw()) })
    }

    fn priority_max(&self, policy: Policy) -> Result<i32, Errno> {
        check(unsafe { libc::sched_get_priority_max(policy.raw()) })
    }

    fn set_scheduler(&self, pid: i32, policy: Policy, priority: i32) -> Result<(), Errno> {
        let param = param(priority);
        check(unsafe { libc::sched_setscheduler(pid, policy.raw(), &param) }).map(|_| ())
    }

    fn get_scheduler(&self, pid: i32) -> Result<i32, Errno> {
        check(unsafe { libc::sched_getscheduler(pid) }).map(|raw| raw & !SCHED_RESET_ON_FORK)
    }

    fn rr_interval(&self, pid: i32) -> Result<Duration, Errno> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        check(unsafe { libc::sched_rr_get_interval(pid, &mut ts) })?;
        Ok(Duration::new(ts.tv_sec.max(0) as u64, ts.tv_nsec.max(0) as u32))
    }

    fn get_param(&self, pid: i32) -> Result<i32, Errno> {
        let mut param = param(0);
        check(unsafe { libc::sched_getparam(pid, &mut param) })?;
        Ok(param.sched_priority)
    }

    fn set_param(&self, pid: i32, priority: i32) -> Result<(), Errno> {
        let param = param(priority);
        check(unsafe { libc::sched_setparam(pid, &param) }).map(|_| ())
    }

    fn get_attr(&self, pid: i32) -> Result<SchedAttr, Errno> {
        let mut attr = SchedAttr::new();
        let ret = unsafe {
            libc::syscall(
                libc::SYS_sched_getattr,
                pid as libc::c_long,
                &mut attr as *mut SchedAttr,
                SCHED_ATTR_SIZE as libc::c_long,
                0 as libc::c_long,
            )
        };
        if ret < 0 {
            return Err(Errno::last());
        }
        Ok(attr)
    }

    fn set_attr(&self, pid: i32, attr: &SchedAttr) -> Result<(), Errno> {
        let ret = unsafe {
            libc::syscall(
                libc::SYS_sched_setattr,
                pid as libc::c_long,
                attr as *const SchedAttr,
                0 as libc::c_long,
            )
        };
        if ret < 0 {
            return Err(Errno::last());
        }
        Ok(())
    }

    fn yield_now(&self) {
        let _ = nix::sched::sched_yield();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Read-only queries; nothing here changes the test process's policy.

    #[test]
    fn test_realtime_range_is_ordered() {
        let sched = LinuxSched::new();
        let min = sched.priority_min(Policy::Fifo).unwrap();
        let max = sched.priority_max(Policy::Fifo).unwrap();
        assert!(min >= 1 && max > min, "{min}..{max}");
    }

    #[test]
    fn test_current_policy_is_known() {
        let sched = LinuxSched::new();
        let raw = sched.get_scheduler(0).unwrap();
        assert!(Policy::from_raw(raw).is_some(), "raw policy {raw}");
    }

    #[test]
    fn test_set_param_to_current_value() {
        let sched = LinuxSched::new();
        let prio = sched.get_param(0).unwrap();
        assert!(sched.set_param(0, prio).is_ok());
    }

    #[test]
    fn test_attr_reports_current_policy() {
        let sched = LinuxSched::new();
        // Old kernels and some sandboxes refuse sched_getattr outright.
        if let Ok(attr) = sched.get_attr(0) {
            assert_eq!(attr.sched_policy as i32, sched.get_scheduler(0).unwrap());
        }
    }
}
