//! # stressor-runtime
//!
//! Platform-specific runtime for pluggable OS stressors.
//!
//! This crate provides:
//! - Process-shared memory regions (mmap MAP_SHARED)
//! - Async-signal-safe handler installation
//! - Child process fork/wait/kill helpers
//! - Scheduler syscalls and capability discovery
//! - Worker slots and the run supervisor

pub mod config;
pub mod memory;
pub mod signal;
pub mod process;
pub mod capabilities;
pub mod time;
pub mod rng;
pub mod worker;
pub mod supervisor;

// Re-exports
pub use config::StressConfig;
pub use memory::{SharedPod, SharedRegion};
pub use signal::{install_handler, restore_default, AsyncSignalHandler};
pub use process::{spawn_child, terminate_and_reap, ChildProcess};
pub use capabilities::{Capabilities, PolicyCaps};
pub use worker::{Worker, WorkerSlot};
pub use supervisor::{RunReport, Supervisor};

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod platform_linux;
        pub use platform_linux::LinuxSched;
        pub use platform_linux::LinuxSched as CurrentSched;
    } else {
        compile_error!("Unsupported platform");
    }
}

/// Parse logging settings before any worker is forked
pub fn init() {
    stressor_core::kprint::init();
}
