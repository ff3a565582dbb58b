//! Environment variable utilities
//!
//! Typed lookups with defaults, used by the runtime config and the
//! logging macros.
//!
//! ```ignore
//! use stressor_core::env::{env_get, env_get_duration};
//!
//! let instances: usize = env_get("STRESS_INSTANCES", 1);
//! let timeout = env_get_duration("STRESS_TIMEOUT_SECS", Duration::from_secs(10), Duration::from_secs);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Variable parsed as `T`, or `default` when unset or unparsable
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Variable parsed as `T`, `None` when unset or unparsable
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag; "1", "true", "yes", "on" (any case) are true.
///
/// Any other value is false; unset returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Integer variable converted to a `Duration` by `unit`
/// (e.g. `Duration::from_millis`).
#[inline]
pub fn env_get_duration(key: &str, default: Duration, unit: fn(u64) -> Duration) -> Duration {
    env_get_opt::<u64>(key).map(unit).unwrap_or(default)
}
