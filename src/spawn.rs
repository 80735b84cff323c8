//! Spawner. Converts the normally-silent "fork succeeded, exec failed"
//! failure mode into an explicit synchronous error: a close-on-exec pipe
//! lets the child report its own pre-exec errno before the parent ever
//! believes the target process exists.

use std::ffi::CString;
use std::fmt;
use std::io::{Read, Write};
use std::os::fd::OwnedFd;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::prctl;
use nix::sys::signal::Signal;
use nix::unistd::{execv, fork, getpid, getppid, pipe, ForkResult, Pid};

use crate::sysexits;

#[derive(Debug)]
pub enum Error {
    Pipe(Errno),
    Fork(Errno),
    PreExec(Errno),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe(e) => write!(f, "pipe(): {e}"),
            Self::Fork(e) => write!(f, "fork(): {e}"),
            Self::PreExec(e) => write!(f, "mechanism failed before exec: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pipe(e) | Self::Fork(e) | Self::PreExec(e) => Some(e),
        }
    }
}

/// Fork a child that execs `process_path` with `argv` (the caller supplies
/// the conventional argv[0] program-name entry). Returns the child's pid
/// once exec has actually succeeded; never returns a pid for a process that
/// failed before exec.
pub fn spawn(process_path: &str, argv: &[String]) -> Result<Pid, Error> {
    let (read_end, write_end) = pipe().map_err(Error::Pipe)?;
    let parent_pid = getpid();

    match unsafe { fork() }.map_err(Error::Fork)? {
        ForkResult::Parent { child } => {
            drop(write_end);
            let mut file = std::fs::File::from(read_end);
            let mut buf = [0u8; 4];
            let mut filled = 0;
            loop {
                match file.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => {
                        filled += n;
                        if filled == buf.len() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            if filled == 0 {
                Ok(child)
            } else {
                Err(Error::PreExec(Errno::from_raw(i32::from_ne_bytes(buf))))
            }
        }
        ForkResult::Child => {
            drop(read_end);
            let _ = prctl::set_pdeathsig(Signal::SIGTERM);
            if getppid() != parent_pid {
                std::process::exit(sysexits::EX_UNAVAILABLE);
            }
            child_exec(write_end, process_path, argv);
        }
    }
}

/// Runs only in the forked child, between `fork` and `exec`. Never returns:
/// either `execv` replaces this process image, or a failure is reported
/// through `write_end` and the child exits.
fn child_exec(write_end: OwnedFd, process_path: &str, argv: &[String]) -> ! {
    if fcntl(&write_end, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).is_err() {
        std::process::exit(sysexits::EX_OSERR);
    }

    let path = match CString::new(process_path) {
        Ok(p) => p,
        Err(_) => std::process::exit(sysexits::EX_OSERR),
    };
    let mut args = Vec::with_capacity(argv.len());
    for a in argv {
        match CString::new(a.as_str()) {
            Ok(c) => args.push(c),
            Err(_) => std::process::exit(sysexits::EX_OSERR),
        }
    }

    match execv(&path, &args) {
        Ok(never) => match never {},
        Err(errno) => {
            report_errno(write_end, errno);
            std::process::exit(sysexits::EX_OSERR);
        }
    }
}

/// Best-effort: if this write itself fails there is nothing further to do
/// but exit with a generic failure code, which the caller already does.
fn report_errno(write_end: OwnedFd, errno: Errno) {
    let bytes = (errno as i32).to_ne_bytes();
    let mut file = std::fs::File::from(write_end);
    let _ = file.write_all(&bytes);
    let _ = file.flush();
}
