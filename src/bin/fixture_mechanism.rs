//! Test-only stand-in for the real mechanism helper. Never shipped: wired
//! in only via `tests/` fixtures, as a sibling `[[bin]]` target built and
//! located through `env!("CARGO_BIN_EXE_<name>")`.
//!
//! Real invocations take exactly `<device path> <baud> <rendezvous socket
//! path>`; this fixture accepts two further test-only positional
//! arguments, `<mode>` and `<marker path>`, so a single binary can be told
//! which branch of the contract to exercise without touching process-wide
//! environment (tests run concurrently and would otherwise race on env
//! vars shared with the child). `mode` (default `ok`):
//! - `ok`: opens the device path, connects, sends `PRIVFD`, exits 0.
//! - `noperm`: exits `EX_NOPERM` without connecting.
//! - `other`: exits 1 without connecting.
//! - `connect-then-die`: connects, then exits without sending anything.
//! - `escalate-once`: exits `EX_NOPERM` the first time it's run (recorded
//!   by creating `marker path`), then behaves like `ok` once that marker
//!   already exists — simulating "works once elevated".

use std::env;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
use privilege_elevation::{protocol::Message, sysexits};

fn main() {
    let args: Vec<String> = env::args().collect();
    let device_path = args.get(1).cloned().unwrap_or_default();
    let sock_path = args.get(3).cloned().unwrap_or_default();
    let mode = args.get(4).cloned().unwrap_or_else(|| "ok".to_string());
    let marker_path = args.get(5).cloned();

    match mode.as_str() {
        "noperm" => std::process::exit(sysexits::EX_NOPERM),
        "other" => std::process::exit(1),
        "escalate-once" => {
            let marker = marker_path.as_deref().unwrap_or("");
            if std::fs::metadata(marker).is_err() {
                let _ = std::fs::File::create(marker);
                std::process::exit(sysexits::EX_NOPERM);
            }
        }
        _ => {}
    }

    let device = match std::fs::OpenOptions::new().read(true).write(true).open(&device_path) {
        Ok(f) => f,
        Err(_) => std::process::exit(sysexits::EX_IOERR),
    };

    let stream = match UnixStream::connect(&sock_path) {
        Ok(s) => s,
        Err(_) => std::process::exit(sysexits::EX_UNAVAILABLE),
    };

    if mode == "connect-then-die" {
        drop(stream);
        std::process::exit(1);
    }

    let message = Message::privfd();
    let bytes = message.as_bytes();
    let iov = [std::io::IoSlice::new(&bytes)];
    let fds = [device.as_raw_fd()];
    let cmsg = [ControlMessage::ScmRights(&fds)];

    match sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None) {
        Ok(_) => std::process::exit(sysexits::EX_OK),
        Err(_) => std::process::exit(sysexits::EX_IOERR),
    }
}
