//! Elevation controller. Drives the spawner and wait multiplexer through a
//! small state machine: attempt unprivileged, escalate at most once on
//! `NoPerm`, otherwise fail. The listener is never recreated across the
//! retry — the same `Rendezvous` is reused and stays open across it.

use std::{error, fmt};

use nix::errno::Errno;
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use nix::unistd::Pid;

use crate::cleanup::InterruptGuard;
use crate::rendezvous::Rendezvous;
use crate::spawn::{self, spawn};
use crate::status::{ChildWatcher, StatusSlot};
use crate::sysexits;
use crate::wait::{wait_for_peer, ExitKind, WaitOutcome};

/// One spawn attempt: the program to exec and its full argv (including
/// argv[0]).
pub struct Attempt {
    pub path: String,
    pub argv: Vec<String>,
}

/// Elevator exit-code convention this design relies on: 127 = policy
/// refused the request, 126 = the user dismissed the authorization prompt.
const ELEVATOR_POLICY_REFUSED: i32 = 127;
const ELEVATOR_USER_CANCELLED: i32 = 126;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    PolicyDenied,
    UserCancelled,
    Other(i32),
}

impl FailureKind {
    pub fn sysexits(&self) -> i32 {
        match self {
            Self::PolicyDenied => sysexits::EX_NOPERM,
            Self::UserCancelled => sysexits::EX_USAGE,
            Self::Other(_) => sysexits::EX_SOFTWARE,
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Watcher(std::io::Error),
    Mask(Errno),
    Spawn(spawn::Error),
    Fatal(Errno),
    Denied(FailureKind),
    Interrupted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watcher(e) => write!(f, "failed to install child-status watcher: {e}"),
            Self::Mask(e) => write!(f, "sigprocmask(): {e}"),
            Self::Spawn(e) => write!(f, "{e}"),
            Self::Fatal(e) => write!(f, "wait multiplexer failed: {e}"),
            Self::Denied(FailureKind::PolicyDenied) => write!(f, "authorization was denied by policy"),
            Self::Denied(FailureKind::UserCancelled) => write!(f, "authorization prompt was cancelled"),
            Self::Denied(FailureKind::Other(code)) => {
                write!(f, "mechanism exited with unexpected status {code}")
            }
            Self::Interrupted => write!(f, "interrupted while waiting for the mechanism"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Watcher(e) => Some(e),
            Self::Mask(e) | Self::Fatal(e) => Some(e),
            Self::Spawn(e) => Some(e),
            Self::Denied(_) | Self::Interrupted => None,
        }
    }
}

impl Error {
    pub fn sysexits(&self) -> i32 {
        match self {
            Self::Watcher(_) | Self::Mask(_) => sysexits::EX_OSERR,
            Self::Spawn(_) => sysexits::EX_UNAVAILABLE,
            Self::Fatal(_) => sysexits::EX_OSERR,
            Self::Denied(k) => k.sysexits(),
            // The caller re-raises the triggering signal before ever
            // consulting this code, so it is never actually read.
            Self::Interrupted => sysexits::EX_SOFTWARE,
        }
    }
}

fn classify(kind: ExitKind) -> FailureKind {
    match kind {
        ExitKind::NoPerm => FailureKind::PolicyDenied,
        ExitKind::Other(ELEVATOR_POLICY_REFUSED) => FailureKind::PolicyDenied,
        ExitKind::Other(ELEVATOR_USER_CANCELLED) => FailureKind::UserCancelled,
        ExitKind::Other(code) => FailureKind::Other(code),
        ExitKind::Signaled => FailureKind::Other(-1),
    }
}

/// Run the state machine to completion. On success, returns the pid of
/// whichever process (mechanism or elevator-spawned mechanism) connected.
/// `watcher` and `slot` are owned by the caller and outlive this call: the
/// descriptor receiver reuses both to notice a mechanism that dies between
/// accept and send.
pub fn run(
    unprivileged: Attempt,
    elevated: Attempt,
    rendezvous: &Rendezvous,
    watcher: &ChildWatcher,
    slot: &StatusSlot,
    guard: &InterruptGuard,
) -> Result<Pid, Error> {
    let mut block = SigSet::empty();
    block.add(Signal::SIGCHLD);
    let mut orig_mask = SigSet::empty();
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&block), Some(&mut orig_mask)).map_err(Error::Mask)?;

    let result = drive(&unprivileged, &elevated, rendezvous, watcher, slot, &orig_mask, guard);

    // The original mask is restored once elevation is finished, regardless
    // of how it finished. SIGCHLD itself stays unblocked from here on so the
    // descriptor receiver observes a late mechanism failure directly.
    let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&orig_mask), None);

    result
}

fn drive(
    unprivileged: &Attempt,
    elevated: &Attempt,
    rendezvous: &Rendezvous,
    watcher: &ChildWatcher,
    slot: &StatusSlot,
    orig_mask: &SigSet,
    guard: &InterruptGuard,
) -> Result<Pid, Error> {
    let mut pid = spawn(&unprivileged.path, &unprivileged.argv).map_err(Error::Spawn)?;
    let mut escalated = false;

    loop {
        match wait_for_peer(rendezvous.listener_fd(), orig_mask, watcher, pid, slot, guard) {
            WaitOutcome::PeerReady => return Ok(pid),
            WaitOutcome::MechanismExit(ExitKind::NoPerm) if !escalated => {
                escalated = true;
                slot.reset();
                pid = spawn(&elevated.path, &elevated.argv).map_err(Error::Spawn)?;
            }
            WaitOutcome::MechanismExit(kind) => return Err(Error::Denied(classify(kind))),
            WaitOutcome::Interrupted => return Err(Error::Interrupted),
            WaitOutcome::Fatal(e) => return Err(Error::Fatal(e)),
        }
    }
}
