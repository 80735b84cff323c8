//! End-to-end exercises of the elevation flow against the fixture mechanism
//! and elevator binaries: plain `#[test] fn -> Result<()>` calling the
//! library directly, no extra test harness.

use anyhow::Result;
use nix::sys::stat::{fstat, SFlag};
use nix::unistd::Pid;
use privilege_elevation::{
    cleanup::InterruptGuard,
    elevate::{self, Attempt, FailureKind},
    receive, rendezvous::Rendezvous, status::{ChildWatcher, StatusSlot}, sysexits,
};

const MECHANISM: &str = env!("CARGO_BIN_EXE_fixture-mechanism");
const ELEVATOR: &str = env!("CARGO_BIN_EXE_fixture-elevator");
const DEVICE: &str = "/dev/null";

fn mechanism_attempt(sock_path: &str, mode: &str, marker: Option<&str>) -> Attempt {
    let mut argv = vec![
        "fixture-mechanism".to_string(),
        DEVICE.to_string(),
        "9600".to_string(),
        sock_path.to_string(),
        mode.to_string(),
    ];
    argv.extend(marker.map(str::to_string));
    Attempt {
        path: MECHANISM.to_string(),
        argv,
    }
}

fn elevator_attempt(
    sock_path: &str,
    elevator_mode: &str,
    mechanism_mode: &str,
    marker: Option<&str>,
) -> Attempt {
    let mut argv = vec![
        "fixture-elevator".to_string(),
        MECHANISM.to_string(),
        DEVICE.to_string(),
        "9600".to_string(),
        sock_path.to_string(),
        elevator_mode.to_string(),
        mechanism_mode.to_string(),
    ];
    argv.extend(marker.map(str::to_string));
    Attempt {
        path: ELEVATOR.to_string(),
        argv,
    }
}

#[test]
fn happy_unprivileged() -> Result<()> {
    let mut rendezvous = Rendezvous::create()?;
    let sock_path = rendezvous.sock_path().to_string_lossy().into_owned();
    let unprivileged = mechanism_attempt(&sock_path, "ok", None);
    let elevated = elevator_attempt(&sock_path, "policy-deny", "ok", None);

    let watcher = ChildWatcher::install()?;
    let slot = StatusSlot::new();
    let guard = InterruptGuard::install()?;
    let pid = elevate::run(unprivileged, elevated, &rendezvous, &watcher, &slot, &guard)?;

    let fd = receive::receive(&mut rendezvous, pid, &watcher, &slot, &guard)?;
    let st = fstat(&fd)?;
    assert!(SFlag::from_bits_truncate(st.st_mode).contains(SFlag::S_IFCHR));

    let dir = rendezvous.sock_path().parent().unwrap().to_path_buf();
    drop(rendezvous);
    assert!(!dir.exists());
    Ok(())
}

#[test]
fn permission_escalated() -> Result<()> {
    let mut rendezvous = Rendezvous::create()?;
    let sock_path = rendezvous.sock_path().to_string_lossy().into_owned();
    let marker = rendezvous
        .sock_path()
        .parent()
        .unwrap()
        .join("escalate.marker");
    let marker = marker.to_string_lossy().into_owned();

    let unprivileged = mechanism_attempt(&sock_path, "escalate-once", Some(&marker));
    let elevated = elevator_attempt(&sock_path, "approve", "escalate-once", Some(&marker));

    let watcher = ChildWatcher::install()?;
    let slot = StatusSlot::new();
    let guard = InterruptGuard::install()?;
    let pid = elevate::run(unprivileged, elevated, &rendezvous, &watcher, &slot, &guard)?;

    let fd = receive::receive(&mut rendezvous, pid, &watcher, &slot, &guard)?;
    let st = fstat(&fd)?;
    assert!(SFlag::from_bits_truncate(st.st_mode).contains(SFlag::S_IFCHR));
    Ok(())
}

#[test]
fn policy_denial() -> Result<()> {
    let rendezvous = Rendezvous::create()?;
    let sock_path = rendezvous.sock_path().to_string_lossy().into_owned();
    let unprivileged = mechanism_attempt(&sock_path, "noperm", None);
    let elevated = elevator_attempt(&sock_path, "policy-deny", "ok", None);

    let watcher = ChildWatcher::install()?;
    let slot = StatusSlot::new();
    let guard = InterruptGuard::install()?;
    let err = elevate::run(unprivileged, elevated, &rendezvous, &watcher, &slot, &guard).unwrap_err();

    assert_eq!(err.sysexits(), sysexits::EX_NOPERM);
    assert!(matches!(err, elevate::Error::Denied(FailureKind::PolicyDenied)));
    Ok(())
}

#[test]
fn user_cancel() -> Result<()> {
    let rendezvous = Rendezvous::create()?;
    let sock_path = rendezvous.sock_path().to_string_lossy().into_owned();
    let unprivileged = mechanism_attempt(&sock_path, "noperm", None);
    let elevated = elevator_attempt(&sock_path, "cancel", "ok", None);

    let watcher = ChildWatcher::install()?;
    let slot = StatusSlot::new();
    let guard = InterruptGuard::install()?;
    let err = elevate::run(unprivileged, elevated, &rendezvous, &watcher, &slot, &guard).unwrap_err();

    assert_eq!(err.sysexits(), sysexits::EX_USAGE);
    assert!(matches!(err, elevate::Error::Denied(FailureKind::UserCancelled)));
    Ok(())
}

#[test]
fn peer_impersonation_is_rejected() -> Result<()> {
    let mut rendezvous = Rendezvous::create()?;
    let sock_path = rendezvous.sock_path().to_string_lossy().into_owned();
    let unprivileged = mechanism_attempt(&sock_path, "ok", None);
    let elevated = elevator_attempt(&sock_path, "policy-deny", "ok", None);

    let watcher = ChildWatcher::install()?;
    let slot = StatusSlot::new();
    let guard = InterruptGuard::install()?;
    let pid = elevate::run(unprivileged, elevated, &rendezvous, &watcher, &slot, &guard)?;

    // Simulate a rogue connecting peer by asserting against a pid that is
    // not the one the spawner actually returned.
    let wrong_pid = Pid::from_raw(pid.as_raw() + 1);
    let err = receive::receive(&mut rendezvous, wrong_pid, &watcher, &slot, &guard).unwrap_err();
    assert!(matches!(err, receive::Error::ProtocolMismatch));
    Ok(())
}

#[test]
fn mechanism_exit_without_send_fails_protocol() -> Result<()> {
    let mut rendezvous = Rendezvous::create()?;
    let sock_path = rendezvous.sock_path().to_string_lossy().into_owned();
    let unprivileged = mechanism_attempt(&sock_path, "connect-then-die", None);
    let elevated = elevator_attempt(&sock_path, "policy-deny", "ok", None);

    let watcher = ChildWatcher::install()?;
    let slot = StatusSlot::new();
    let guard = InterruptGuard::install()?;
    let pid = elevate::run(unprivileged, elevated, &rendezvous, &watcher, &slot, &guard)?;

    let err = receive::receive(&mut rendezvous, pid, &watcher, &slot, &guard).unwrap_err();
    assert!(matches!(
        err,
        receive::Error::ShortMessage | receive::Error::LateFailure
    ));
    Ok(())
}
