//! Test-only stand-in for the external elevator: `<elevator>
//! <mechanism_path> <device_path> <baud> <rendezvous_socket_path>`. Never
//! shipped. Two further test-only
//! positional arguments, `<elevator mode>` and any trailing args, select
//! behavior and are forwarded to the re-exec'd mechanism (see
//! `fixture_mechanism.rs`) — again to avoid racing on shared env vars
//! across concurrently running tests.
//!
//! `elevator mode` (default `approve`):
//! - `approve`: re-execs the mechanism in place, as `pkexec` would.
//! - `policy-deny`: exits 127.
//! - `cancel`: exits 126.
//! - `error`: exits 1.

use std::env;
use std::os::unix::process::CommandExt;
use std::process::Command;

fn main() {
    let args: Vec<String> = env::args().collect();
    let mechanism_path = args.get(1).cloned().unwrap_or_default();
    let mechanism_tail = &args[2..5.min(args.len())];
    let mode = args.get(5).cloned().unwrap_or_else(|| "approve".to_string());
    let forwarded = args.get(6..).unwrap_or(&[]);

    match mode.as_str() {
        "policy-deny" => std::process::exit(127),
        "cancel" => std::process::exit(126),
        "error" => std::process::exit(1),
        _ => {}
    }

    let err = Command::new(mechanism_path)
        .args(mechanism_tail)
        .args(forwarded)
        .exec();
    eprintln!("fixture-elevator: exec failed: {err}");
    std::process::exit(1);
}
