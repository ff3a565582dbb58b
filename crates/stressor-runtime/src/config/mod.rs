//! Stress run configuration
//!
//! Provides library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls (command line)
//! 2. Environment variables
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use stressor_runtime::config::StressConfig;
//!
//! let config = StressConfig::from_env()
//!     .instances(4)
//!     .timeout(Duration::from_secs(30));
//! config.validate()?;
//! ```

pub mod defaults;

use std::time::Duration;

use stressor_core::env::{env_get, env_get_duration};
use thiserror::Error;

/// Run configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Parallel worker processes
    pub instances: usize,
    /// Run time before workers are told to stop
    pub timeout: Duration,
    /// Bogo-op limit per worker (0 = unbounded)
    pub max_ops: u64,
    /// Fork attempts allowed after EAGAIN/ENOMEM
    pub fork_retry_limit: u32,
    /// Sleep between fork attempts
    pub fork_backoff: Duration,
    /// Interval between non-blocking reap passes
    pub reap_poll: Duration,
    /// Time workers get after the stop flag before they are killed
    pub kill_grace: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl StressConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `STRESS_INSTANCES` - Worker processes per stressor
    /// - `STRESS_TIMEOUT_SECS` - Run time in seconds
    /// - `STRESS_MAX_OPS` - Bogo-op limit per worker
    /// - `STRESS_FORK_RETRIES` - Fork attempts after EAGAIN/ENOMEM
    /// - `STRESS_FORK_BACKOFF_US` - Sleep between fork attempts
    /// - `STRESS_REAP_POLL_MS` - Supervisor reap interval
    /// - `STRESS_KILL_GRACE_SECS` - Grace period after the stop flag
    pub fn from_env() -> Self {
        Self {
            instances: env_get("STRESS_INSTANCES", defaults::INSTANCES),
            timeout: env_get_duration(
                "STRESS_TIMEOUT_SECS",
                Duration::from_secs(defaults::TIMEOUT_SECS),
                Duration::from_secs,
            ),
            max_ops: env_get("STRESS_MAX_OPS", defaults::MAX_OPS),
            fork_retry_limit: env_get("STRESS_FORK_RETRIES", defaults::FORK_RETRY_LIMIT),
            fork_backoff: env_get_duration(
                "STRESS_FORK_BACKOFF_US",
                Duration::from_micros(defaults::FORK_BACKOFF_US),
                Duration::from_micros,
            ),
            reap_poll: env_get_duration(
                "STRESS_REAP_POLL_MS",
                Duration::from_millis(defaults::REAP_POLL_MS),
                Duration::from_millis,
            ),
            kill_grace: env_get_duration(
                "STRESS_KILL_GRACE_SECS",
                Duration::from_secs(defaults::KILL_GRACE_SECS),
                Duration::from_secs,
            ),
        }
    }

    /// Library defaults only, no environment lookups.
    pub fn new() -> Self {
        Self {
            instances: defaults::INSTANCES,
            timeout: Duration::from_secs(defaults::TIMEOUT_SECS),
            max_ops: defaults::MAX_OPS,
            fork_retry_limit: defaults::FORK_RETRY_LIMIT,
            fork_backoff: Duration::from_micros(defaults::FORK_BACKOFF_US),
            reap_poll: Duration::from_millis(defaults::REAP_POLL_MS),
            kill_grace: Duration::from_secs(defaults::KILL_GRACE_SECS),
        }
    }

    // Builder methods

    pub fn instances(mut self, n: usize) -> Self {
        self.instances = n;
        self
    }

    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    pub fn max_ops(mut self, n: u64) -> Self {
        self.max_ops = n;
        self
    }

    pub fn fork_retry_limit(mut self, n: u32) -> Self {
        self.fork_retry_limit = n;
        self
    }

    pub fn fork_backoff(mut self, d: Duration) -> Self {
        self.fork_backoff = d;
        self
    }

    pub fn reap_poll(mut self, d: Duration) -> Self {
        self.reap_poll = d;
        self
    }

    pub fn kill_grace(mut self, d: Duration) -> Self {
        self.kill_grace = d;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instances == 0 {
            return Err(ConfigError::InvalidValue("instances must be > 0"));
        }
        if self.instances > defaults::MAX_INSTANCES {
            return Err(ConfigError::InvalidValue("instances must be <= 1024"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue("timeout must be > 0"));
        }
        if self.reap_poll.is_zero() {
            return Err(ConfigError::InvalidValue("reap_poll must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("Stress Configuration:");
        eprintln!("  instances:         {}", self.instances);
        eprintln!("  timeout:           {:?}", self.timeout);
        eprintln!("  max_ops:           {}", self.max_ops);
        eprintln!("  fork_retry_limit:  {}", self.fork_retry_limit);
        eprintln!("  fork_backoff:      {:?}", self.fork_backoff);
        eprintln!("  reap_poll:         {:?}", self.reap_poll);
        eprintln!("  kill_grace:        {:?}", self.kill_grace);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_valid() {
        let config = StressConfig::new();
        assert_eq!(config.instances, defaults::INSTANCES);
        assert_eq!(config.timeout, Duration::from_secs(defaults::TIMEOUT_SECS));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = StressConfig::new()
            .instances(8)
            .timeout(Duration::from_secs(2))
            .max_ops(500);

        assert_eq!(config.instances, 8);
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.max_ops, 500);
    }

    #[test]
    fn test_validation() {
        assert!(StressConfig::new().instances(0).validate().is_err());
        assert!(StressConfig::new().instances(5000).validate().is_err());
        assert!(StressConfig::new().timeout(Duration::ZERO).validate().is_err());
        assert_eq!(
            StressConfig::new().reap_poll(Duration::ZERO).validate(),
            Err(ConfigError::InvalidValue("reap_poll must be > 0"))
        );
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("STRESS_REAP_POLL_MS", "7");
        let config = StressConfig::from_env();
        assert_eq!(config.reap_poll, Duration::from_millis(7));
        std::env::remove_var("STRESS_REAP_POLL_MS");
    }
}
