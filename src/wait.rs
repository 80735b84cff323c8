//! Wait multiplexer. Blocks until either the rendezvous listener is
//! readable (the mechanism connected) or the watched child terminates,
//! using `pselect` to atomically swap in the unblocked signal mask only for
//! the duration of the wait, so a termination signal can never be lost
//! between checking the mask and starting to sleep.

use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::sys::select::{pselect, FdSet};
use nix::sys::signal::SigSet;
use nix::unistd::Pid;

use crate::cleanup::InterruptGuard;
use crate::status::{ChildWatcher, MechanismStatus, StatusSlot};
use crate::sysexits;

pub enum WaitOutcome {
    PeerReady,
    MechanismExit(ExitKind),
    /// A termination signal arrived while waiting; the caller should unwind
    /// immediately rather than keep waiting for the mechanism, so the
    /// rendezvous directory gets torn down and the signal gets re-raised.
    Interrupted,
    Fatal(Errno),
}

#[derive(Debug, Clone, Copy)]
pub enum ExitKind {
    NoPerm,
    Other(i32),
    Signaled,
}

/// Block until the listener is readable, the child terminates, or a
/// termination signal arrives. `orig_mask` is the signal mask saved before
/// `SIGCHLD` was blocked process-wide; `pselect` swaps it in only while
/// sleeping.
pub fn wait_for_peer(
    listener_fd: RawFd,
    orig_mask: &SigSet,
    watcher: &ChildWatcher,
    pid: Pid,
    slot: &StatusSlot,
    guard: &InterruptGuard,
) -> WaitOutcome {
    loop {
        let mut read_fds = FdSet::new();
        read_fds.insert(listener_fd);

        match pselect(None, Some(&mut read_fds), None, None, None, Some(orig_mask)) {
            Ok(_) => {
                if read_fds.contains(listener_fd) {
                    return WaitOutcome::PeerReady;
                }
                continue;
            }
            Err(Errno::EINTR) => {
                if guard.triggered().is_some() {
                    return WaitOutcome::Interrupted;
                }
                if watcher.signaled() {
                    watcher.reap_into(pid, slot);
                }
                match slot.load() {
                    // Between the mechanism's connect() and its sendmsg(),
                    // an exit(0) can race the scheduler; treat it as a
                    // tiebreak and keep waiting for the accept.
                    MechanismStatus::Unknown | MechanismStatus::ExitedOk => continue,
                    MechanismStatus::ExitedCode(code) if code == sysexits::EX_NOPERM => {
                        return WaitOutcome::MechanismExit(ExitKind::NoPerm)
                    }
                    MechanismStatus::ExitedCode(code) => {
                        return WaitOutcome::MechanismExit(ExitKind::Other(code))
                    }
                    MechanismStatus::Signaled => {
                        return WaitOutcome::MechanismExit(ExitKind::Signaled)
                    }
                }
            }
            Err(e) => return WaitOutcome::Fatal(e),
        }
    }
}
