//! Descriptor receiver. Accepts the one expected peer, validates its
//! identity, and receives the single `SCM_RIGHTS`-carried device
//! descriptor.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::{error, fmt};

use nix::errno::Errno;
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use nix::sys::socket::{
    accept, cmsg_space, getsockopt, recvmsg, shutdown, sockopt::PeerCredentials, ControlMessageOwned,
    MsgFlags, Shutdown,
};
use nix::unistd::Pid;
use std::io::IoSliceMut;

use crate::cleanup::InterruptGuard;
use crate::protocol::Message;
use crate::rendezvous::Rendezvous;
use crate::status::{ChildWatcher, MechanismStatus, StatusSlot};
use crate::sysexits;

#[derive(Debug)]
pub enum Error {
    AcceptErr(Errno),
    PeerCredErr(Errno),
    ProtocolMismatch,
    UnblockErr(Errno),
    RecvErr(Errno),
    LateFailure,
    ShortMessage,
    Truncated,
    WrongTag,
    MissingFd,
    Interrupted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcceptErr(e) => write!(f, "accept(): {e}"),
            Self::PeerCredErr(e) => write!(f, "could not read peer credentials: {e}"),
            Self::ProtocolMismatch => write!(f, "connecting peer is not the spawned mechanism"),
            Self::UnblockErr(e) => write!(f, "sigprocmask(): {e}"),
            Self::RecvErr(e) => write!(f, "recvmsg(): {e}"),
            Self::LateFailure => write!(f, "mechanism failed before sending its descriptor"),
            Self::ShortMessage => write!(f, "received message shorter than the protocol frame"),
            Self::Truncated => write!(f, "ancillary data was truncated"),
            Self::WrongTag => write!(f, "received message carried an unrecognized tag"),
            Self::MissingFd => write!(f, "no file descriptor was attached to the message"),
            Self::Interrupted => write!(f, "interrupted while waiting for the mechanism"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::AcceptErr(e) | Self::PeerCredErr(e) | Self::UnblockErr(e) | Self::RecvErr(e) => Some(e),
            Self::Interrupted
            | Self::ProtocolMismatch
            | Self::LateFailure
            | Self::ShortMessage
            | Self::Truncated
            | Self::WrongTag
            | Self::MissingFd => None,
        }
    }
}

impl Error {
    pub fn sysexits(&self) -> i32 {
        match self {
            Self::LateFailure => sysexits::EX_UNAVAILABLE,
            Self::Truncated => sysexits::EX_SOFTWARE,
            Self::ProtocolMismatch
            | Self::ShortMessage
            | Self::WrongTag
            | Self::MissingFd => sysexits::EX_PROTOCOL,
            Self::AcceptErr(_) | Self::PeerCredErr(_) | Self::UnblockErr(_) | Self::RecvErr(_) => {
                sysexits::EX_OSERR
            }
            // The caller re-raises the triggering signal before ever
            // consulting this code, so it is never actually read.
            Self::Interrupted => sysexits::EX_SOFTWARE,
        }
    }
}

/// Accept the expected peer and receive its device descriptor. `rendezvous`
/// has its listener closed as soon as accept succeeds.
pub fn receive(
    rendezvous: &mut Rendezvous,
    expected_pid: Pid,
    watcher: &ChildWatcher,
    slot: &StatusSlot,
    guard: &InterruptGuard,
) -> Result<OwnedFd, Error> {
    let peer = loop {
        match accept(rendezvous.listener_fd()) {
            Ok(fd) => break unsafe { OwnedFd::from_raw_fd(fd) },
            Err(Errno::EINTR) => {
                if guard.triggered().is_some() {
                    return Err(Error::Interrupted);
                }
                continue;
            }
            Err(e) => return Err(Error::AcceptErr(e)),
        }
    };
    rendezvous.close_listener();

    let cred = getsockopt(&peer, PeerCredentials).map_err(Error::PeerCredErr)?;
    if Pid::from_raw(cred.pid()) != expected_pid {
        return Err(Error::ProtocolMismatch);
    }

    shutdown(peer.as_raw_fd(), Shutdown::Write).map_err(Error::PeerCredErr)?;

    let mut unblock = SigSet::empty();
    unblock.add(Signal::SIGCHLD);
    sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&unblock), None).map_err(Error::UnblockErr)?;

    let mut msg_buf = [0u8; Message::SIZE];
    let mut cmsg_buffer = cmsg_space!([RawFd; 1]);

    let received_fd = loop {
        let mut iov = [IoSliceMut::new(&mut msg_buf)];
        match recvmsg::<()>(
            peer.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::MSG_WAITALL,
        ) {
            Ok(msg) => {
                // Ancillary fds arrive with the message itself, independent
                // of whether the frame turns out to be well-formed. Take
                // ownership of them immediately so an early return below
                // closes them via `Drop` instead of leaking.
                let mut received: Vec<OwnedFd> = Vec::new();
                for cmsg in msg.cmsgs().map_err(Error::RecvErr)? {
                    if let ControlMessageOwned::ScmRights(fds) = cmsg {
                        received.extend(
                            fds.into_iter()
                                .filter(|fd| *fd >= 0)
                                .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }),
                        );
                    }
                }

                if msg.flags.contains(MsgFlags::MSG_CTRUNC) {
                    return Err(Error::Truncated);
                }
                if msg.bytes < Message::SIZE {
                    return Err(Error::ShortMessage);
                }
                let frame = Message::decode(&msg_buf).ok_or(Error::ShortMessage)?;
                if frame.tag != crate::protocol::PRIVFD_TAG {
                    return Err(Error::WrongTag);
                }

                break received.into_iter().next().ok_or(Error::MissingFd)?;
            }
            Err(Errno::EINTR) => {
                if guard.triggered().is_some() {
                    return Err(Error::Interrupted);
                }
                if watcher.signaled() {
                    watcher.reap_into(expected_pid, slot);
                }
                match slot.load() {
                    MechanismStatus::Unknown | MechanismStatus::ExitedOk => continue,
                    _ => return Err(Error::LateFailure),
                }
            }
            Err(e) => return Err(Error::RecvErr(e)),
        }
    };

    let _ = shutdown(peer.as_raw_fd(), Shutdown::Both);
    drop(peer);

    Ok(received_fd)
}
