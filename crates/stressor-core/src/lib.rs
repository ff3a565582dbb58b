//! # stressor-core
//!
//! Core types and traits for pluggable OS stressors.
//!
//! This crate holds the contract between a stressor and whatever drives
//! it. It contains no process management and no syscalls beyond the
//! types needed to describe them; the OS side lives in `stressor-runtime`.
//!
//! ## Modules
//!
//! - `traits` - `Stressor`, `WorkerContext` and `SchedOps`
//! - `error` - Error taxonomy and worker exit status
//! - `sched` - Scheduling policy and `sched_attr` types
//! - `metrics` - Metric aggregation kinds
//! - `retry` - Retry combinator for interruptible syscalls
//! - `cancel` - Cancellation token for run shutdown
//! - `kprint` - Kernel-style leveled print macros
//! - `env` - Environment variable utilities
//! - `testing` - Fakes for unit tests (`testing` feature)

pub mod traits;
pub mod error;
pub mod sched;
pub mod metrics;
pub mod retry;
pub mod cancel;
pub mod kprint;
pub mod env;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports for convenience
pub use traits::{HelpEntry, SchedOps, StressClass, Stressor, VerifyMode, WorkerContext};
pub use error::{ExitStatus, StressError, StressResult};
pub use sched::{Policy, PolicyTrial, SchedAttr};
pub use metrics::{Aggregation, Metric};
pub use retry::{retry_eintr, Retry};
pub use cancel::CancellationToken;
pub use env::{env_get, env_get_bool, env_get_duration, env_get_opt};

pub use nix::errno::Errno;
