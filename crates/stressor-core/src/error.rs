//! Error types for stressors
//!
//! Every syscall failure is classified at the call site into one
//! [`StressError`] kind. [`StressError::Resource`],
//! [`StressError::Consistency`] and [`StressError::Protocol`] end a run;
//! the other kinds are absorbed by the stressor that produced them.

use nix::errno::Errno;
use thiserror::Error;

/// Result type for stressor operations
pub type StressResult<T> = Result<T, StressError>;

fn code(errno: &Errno) -> i32 {
    *errno as i32
}

fn suffix(context: &str) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(" for {context}")
    }
}

/// Classified stressor failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StressError {
    /// A resource (mapping, handler slot, child process) could not be
    /// created, retries included. Fatal to the run.
    #[error("failed to {what}: errno={} ({})", code(.errno), .errno.desc())]
    Resource { what: &'static str, errno: Errno },

    /// Syscall interrupted by a signal; retried in place.
    #[error("{syscall} interrupted: errno={} ({})", code(.errno), .errno.desc())]
    Transient { syscall: &'static str, errno: Errno },

    /// Rejection the platform is allowed to make (no privilege, unsupported
    /// argument). Counted as a no-op.
    #[error("{syscall} rejected: errno={} ({})", code(.errno), .errno.desc())]
    ExpectedRejection { syscall: &'static str, errno: Errno },

    /// Unexpected syscall failure.
    #[error("{syscall} failed: errno={} ({}){}", code(.errno), .errno.desc(), suffix(.context))]
    Syscall {
        syscall: &'static str,
        errno: Errno,
        context: String,
    },

    /// Kernel-reported state disagrees with what was requested.
    #[error("{0}")]
    Consistency(String),

    /// Expected signal never arrived or a child could not be waited for.
    #[error("{0}")]
    Protocol(String),
}

impl StressError {
    /// Classify `errno` returned by `syscall`.
    ///
    /// EINTR is always transient; anything listed in `ignorable` is an
    /// expected rejection; everything else is an unexpected failure.
    pub fn classify(syscall: &'static str, errno: Errno, ignorable: &[Errno]) -> Self {
        if errno == Errno::EINTR {
            StressError::Transient { syscall, errno }
        } else if ignorable.contains(&errno) {
            StressError::ExpectedRejection { syscall, errno }
        } else {
            StressError::Syscall {
                syscall,
                errno,
                context: String::new(),
            }
        }
    }

    /// Unexpected failure of `syscall` without extra context
    pub fn syscall(syscall: &'static str, errno: Errno) -> Self {
        StressError::Syscall {
            syscall,
            errno,
            context: String::new(),
        }
    }

    /// Attach the policy/variant that triggered a `Syscall` failure.
    /// Other kinds are returned unchanged.
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        match self {
            StressError::Syscall { syscall, errno, .. } => StressError::Syscall {
                syscall,
                errno,
                context: ctx.into(),
            },
            other => other,
        }
    }

    /// Whether the error ends the stressor's run loop
    #[inline]
    pub fn is_run_terminating(&self) -> bool {
        matches!(
            self,
            StressError::Resource { .. } | StressError::Consistency(_) | StressError::Protocol(_)
        )
    }

    /// Whether the error should be surfaced through `report_failure`
    #[inline]
    pub fn is_reportable(&self) -> bool {
        !matches!(
            self,
            StressError::Transient { .. } | StressError::ExpectedRejection { .. }
        )
    }
}

/// Exit status of one stressor invocation.
///
/// Numeric codes are what a worker process passes to `_exit`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    Success = 0,
    Failure = 1,
    NotSuccess = 2,
    NoResource = 3,
    NotImplemented = 4,
}

impl ExitStatus {
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a process exit code back to a status; unknown codes are failures.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ExitStatus::Success,
            2 => ExitStatus::NotSuccess,
            3 => ExitStatus::NoResource,
            4 => ExitStatus::NotImplemented,
            _ => ExitStatus::Failure,
        }
    }

    fn severity(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::NotImplemented => 1,
            ExitStatus::NoResource => 2,
            ExitStatus::NotSuccess => 3,
            ExitStatus::Failure => 4,
        }
    }

    /// The more severe of two statuses
    pub fn worst(self, other: ExitStatus) -> ExitStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, ExitStatus::Failure | ExitStatus::NotSuccess)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExitStatus::Success => "passed",
            ExitStatus::Failure => "failed",
            ExitStatus::NotSuccess => "not successful",
            ExitStatus::NoResource => "skipped (no resource)",
            ExitStatus::NotImplemented => "skipped (not implemented)",
        }
    }
}
