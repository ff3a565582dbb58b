//! Library defaults for `StressConfig`

/// Parallel worker processes per stressor
pub const INSTANCES: usize = 1;

/// Upper bound on `instances`
pub const MAX_INSTANCES: usize = 1024;

/// Run time before the stop flag is raised
pub const TIMEOUT_SECS: u64 = 10;

/// Bogo-op limit per worker; 0 means unbounded
pub const MAX_OPS: u64 = 0;

/// Fork attempts allowed per call after EAGAIN/ENOMEM
pub const FORK_RETRY_LIMIT: u32 = 32;

/// Sleep between fork attempts
pub const FORK_BACKOFF_US: u64 = 100_000;

/// Supervisor's interval between non-blocking reap passes
pub const REAP_POLL_MS: u64 = 50;

/// How long workers get to finish after the stop flag before SIGKILL
pub const KILL_GRACE_SECS: u64 = 5;
