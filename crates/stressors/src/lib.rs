//! # stressors
//!
//! Concrete stressors built on the `stressor-core` contract:
//!
//! - `schedpolicy` - cycles through every scheduling policy and priority range
//! - `sighup` - measures SIGHUP delivery latency, direct and via an
//!   orphaned process group

pub mod schedpolicy;
pub mod sighup;

pub use schedpolicy::SchedPolicyStressor;
pub use sighup::SighupStressor;

use stressor_core::Stressor;

/// Names of every registered stressor
pub const NAMES: &[&str] = &[schedpolicy::NAME, sighup::NAME];

/// Build the stressor called `name`
pub fn find(name: &str) -> Option<Box<dyn Stressor>> {
    match name {
        schedpolicy::NAME => Some(Box::new(SchedPolicyStressor::new())),
        sighup::NAME => Some(Box::new(SighupStressor::new())),
        _ => None,
    }
}

/// Every registered stressor, in `NAMES` order
pub fn all() -> Vec<Box<dyn Stressor>> {
    NAMES.iter().filter_map(|name| find(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use stressor_core::ExitStatus;
    use stressor_runtime::{StressConfig, Supervisor};
    use std::time::Duration;

    #[test]
    fn test_registry() {
        let names: Vec<&str> = all().iter().map(|s| s.name()).collect();
        assert_eq!(names, NAMES);
        assert!(find("nope").is_none());
        for s in all() {
            assert_eq!(s.help().len(), 2);
            assert!(s.help()[0].option.starts_with(s.name()));
        }
    }

    #[test]
    #[serial]
    fn test_schedpolicy_under_supervisor() {
        // Runs in a forked worker, so the real policy changes stay there.
        let config = StressConfig::new()
            .instances(1)
            .max_ops(20)
            .timeout(Duration::from_secs(10))
            .reap_poll(Duration::from_millis(5));
        let report = Supervisor::new(config).run(&SchedPolicyStressor::new()).unwrap();
        assert_eq!(report.instances.len(), 1);
        assert_eq!(report.status(), ExitStatus::Success);
        assert!(report.bogo_ops() > 0 && report.bogo_ops() <= 20, "{}", report.bogo_ops());
    }

    #[test]
    #[serial]
    fn test_sighup_under_supervisor() {
        let config = StressConfig::new()
            .instances(2)
            .max_ops(8)
            .timeout(Duration::from_secs(20))
            .reap_poll(Duration::from_millis(5));
        let report = Supervisor::new(config).run(&SighupStressor::new()).unwrap();
        assert_eq!(report.instances.len(), 2);
        assert_eq!(report.status(), ExitStatus::Success);
        assert!(report.bogo_ops() > 0 && report.bogo_ops() <= 16, "{}", report.bogo_ops());
        for inst in &report.instances {
            assert_eq!(inst.status, ExitStatus::Success, "instance {}", inst.instance);
        }
        let latency = report.metrics.iter().find(|m| m.label == sighup::METRIC_LABEL).unwrap();
        assert!(latency.value > 0.0, "{}", latency.value);
    }
}
