//! Child-status watcher.
//!
//! An async-signal-safe-by-construction design: neither `nix` nor `libc`
//! safely expose `siginfo_t`'s `si_status`/`si_code` union fields from a
//! `SA_SIGINFO` handler, so the signal handler here only flips an
//! `AtomicBool` (pairing `signal_hook::flag` with a `waitpid(WNOHANG)` reap
//! done outside signal context). The actual reap and status publication
//! happen synchronously in [`ChildWatcher::reap_into`], called from the
//! wait-multiplexer loop right after `pselect` reports `EINTR`. The
//! ordering guarantee this relies on still holds: nothing observes the
//! status slot until after the reap that follows the flag, and the reap
//! itself only runs at the designated suspension point.

use std::sync::{
    atomic::{AtomicBool, AtomicI32, Ordering},
    Arc,
};

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

const UNKNOWN: i32 = i32::MIN;
const SIGNALED: i32 = i32::MIN + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismStatus {
    Unknown,
    ExitedOk,
    ExitedCode(i32),
    Signaled,
}

/// The process-wide atomic slot holding the mechanism's last observed exit
/// status. Written only through [`ChildWatcher::reap_into`]; read by the
/// wait multiplexer and the elevation controller.
pub struct StatusSlot(AtomicI32);

impl StatusSlot {
    pub const fn new() -> Self {
        Self(AtomicI32::new(UNKNOWN))
    }

    pub fn load(&self) -> MechanismStatus {
        match self.0.load(Ordering::SeqCst) {
            UNKNOWN => MechanismStatus::Unknown,
            SIGNALED => MechanismStatus::Signaled,
            0 => MechanismStatus::ExitedOk,
            code => MechanismStatus::ExitedCode(code),
        }
    }

    /// Reset to `Unknown` for a fresh spawn attempt. Monotonic within one
    /// spawn, reset across elevation retries by design.
    pub fn reset(&self) {
        self.0.store(UNKNOWN, Ordering::SeqCst);
    }
}

impl Default for StatusSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Watches for `SIGCHLD` deliveries and reaps the mechanism/elevator child
/// into a [`StatusSlot`].
pub struct ChildWatcher {
    flag: Arc<AtomicBool>,
}

impl ChildWatcher {
    pub fn install() -> Result<Self, std::io::Error> {
        let flag = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGCHLD, Arc::clone(&flag))?;
        Ok(Self { flag })
    }

    /// True if `SIGCHLD` has arrived since the last call; clears the flag.
    pub fn signaled(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    /// Reap `pid` without blocking and, if it has already terminated,
    /// publish the outcome onto `slot`. A no-op if the child is still
    /// running (e.g. a stop/continue notification, which this build doesn't
    /// request but a spurious wakeup could still surface).
    pub fn reap_into(&self, pid: Pid, slot: &StatusSlot) {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => slot.0.store(code, Ordering::SeqCst),
            Ok(WaitStatus::Signaled(..)) => slot.0.store(SIGNALED, Ordering::SeqCst),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_exit_code() {
        let slot = StatusSlot::new();
        assert_eq!(slot.load(), MechanismStatus::Unknown);
        slot.0.store(77, Ordering::SeqCst);
        assert_eq!(slot.load(), MechanismStatus::ExitedCode(77));
        slot.0.store(0, Ordering::SeqCst);
        assert_eq!(slot.load(), MechanismStatus::ExitedOk);
    }

    #[test]
    fn reset_returns_to_unknown() {
        let slot = StatusSlot::new();
        slot.0.store(1, Ordering::SeqCst);
        slot.reset();
        assert_eq!(slot.load(), MechanismStatus::Unknown);
    }
}
