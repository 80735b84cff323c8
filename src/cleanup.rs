//! Interrupt half of the cleanup guard. The exit-hook half — close peer fd,
//! close listener fd, remove the rendezvous directory — is
//! [`crate::rendezvous::Rendezvous`]'s `Drop` impl, which runs on every
//! return path including an error unwind. This module only needs to notice
//! that a termination signal arrived (the same `signal_hook::flag` +
//! `AtomicBool` pattern the child-status watcher uses for `SIGCHLD`) and,
//! once the normal flow has finished unwinding through `Drop`, restore the
//! signal's default disposition and re-raise it so the process's exit status
//! looks exactly like an un-intercepted kill.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::getpid;

pub struct InterruptGuard {
    sigint: Arc<AtomicBool>,
    sigterm: Arc<AtomicBool>,
}

impl InterruptGuard {
    /// Arm the guard. Must be installed before the rendezvous is created, so
    /// a signal arriving during startup is still observed.
    pub fn install() -> Result<Self, std::io::Error> {
        let sigint = Arc::new(AtomicBool::new(false));
        let sigterm = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&sigint))?;
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&sigterm))?;
        Ok(Self { sigint, sigterm })
    }

    /// The signal that triggered a shutdown, if any arrived.
    pub fn triggered(&self) -> Option<Signal> {
        if self.sigint.load(Ordering::SeqCst) {
            Some(Signal::SIGINT)
        } else if self.sigterm.load(Ordering::SeqCst) {
            Some(Signal::SIGTERM)
        } else {
            None
        }
    }
}

/// Restore `signal`'s default disposition and deliver it to this process.
/// Does not return if the default action is to terminate, which is the case
/// for both signals this guard watches.
pub fn reraise_default(signal: Signal) {
    unsafe {
        let _ = signal::signal(signal, SigHandler::SigDfl);
    }
    let _ = signal::kill(getpid(), signal);
}
