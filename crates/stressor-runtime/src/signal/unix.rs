//! Unix signal handling via sigaction

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use stressor_core::{StressError, StressResult};

use super::AsyncSignalHandler;

/// Install `handler` for `signal` in the calling process.
///
/// No SA_RESTART: a blocking call interrupted by the handler fails with
/// EINTR and callers retry it.
pub fn install_handler(signal: Signal, handler: AsyncSignalHandler) -> StressResult<()> {
    let action = SigAction::new(
        SigHandler::Handler(handler.func()),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // Safety: AsyncSignalHandler::new guarantees the handler is async-signal-safe
    unsafe { sigaction(signal, &action) }
        .map(|_| ())
        .map_err(|errno| StressError::Resource {
            what: "install signal handler",
            errno,
        })
}

/// Restore the default disposition for `signal`
pub fn restore_default(signal: Signal) -> StressResult<()> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(signal, &action) }
        .map(|_| ())
        .map_err(|errno| StressError::Resource {
            what: "restore signal disposition",
            errno,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};
    use serial_test::serial;

    static HITS: AtomicU32 = AtomicU32::new(0);

    extern "C" fn count_hit(_sig: libc::c_int) {
        HITS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    #[serial]
    fn test_installed_handler_runs() {
        let handler = unsafe { AsyncSignalHandler::new(count_hit) };
        install_handler(Signal::SIGUSR2, handler).unwrap();

        HITS.store(0, Ordering::SeqCst);
        nix::sys::signal::raise(Signal::SIGUSR2).unwrap();
        assert_eq!(HITS.load(Ordering::SeqCst), 1);

        restore_default(Signal::SIGUSR2).unwrap();
    }

    #[test]
    #[serial]
    fn test_uncatchable_signal_is_resource_error() {
        let handler = unsafe { AsyncSignalHandler::new(count_hit) };
        let err = install_handler(Signal::SIGKILL, handler).unwrap_err();
        assert!(matches!(err, StressError::Resource { .. }));
    }
}
