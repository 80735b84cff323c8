//! `privilege-elevation`: open a serial device that the invoking user may
//! not have permission to access directly, by spawning a small mechanism
//! helper and, if that fails on a permission check, re-spawning it under an
//! external elevator (e.g. `pkexec`).

mod cli;

use clap::Parser;
use log::{error, info};
use privilege_elevation::{
    cleanup,
    elevate::{self, Attempt},
    error::AppError,
    receive, rendezvous, status, sysexits,
};

const MECHANISM_PATH: &str = env!("MECHANISM_PATH");
const ELEVATOR_PATH: &str = env!("ELEVATOR_PATH");

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // The interrupt guard is armed first, before anything that needs
    // cleaning up exists.
    let guard = match cleanup::InterruptGuard::install() {
        Ok(g) => g,
        Err(e) => {
            error!("failed to install interrupt handling: {e}");
            std::process::exit(sysexits::EX_OSERR);
        }
    };

    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap prints its own usage/help/version text on both Ok and
            // Err paths; only the exit code needs correcting here so it
            // stays on the sysexits table instead of clap's default 2.
            let _ = e.print();
            match e.kind() {
                clap::error::ErrorKind::DisplayHelp
                | clap::error::ErrorKind::DisplayVersion => std::process::exit(sysexits::EX_OK),
                _ => std::process::exit(sysexits::EX_USAGE),
            }
        }
    };
    let result = run(&cli, &guard);

    // By the time `run` has returned, its `Rendezvous` has already been
    // dropped (directory removed, sockets closed) regardless of outcome. If
    // a termination signal is what unwound us here, finish the job the way
    // an uncaught signal would.
    if let Some(signal) = guard.triggered() {
        cleanup::reraise_default(signal);
    }

    match result {
        Ok(()) => std::process::exit(sysexits::EX_OK),
        Err(e) => {
            error!("{e}");
            std::process::exit(e.sysexits());
        }
    }
}

fn run(cli: &cli::Cli, guard: &cleanup::InterruptGuard) -> Result<(), AppError> {
    let mut rendezvous = rendezvous::Rendezvous::create()?;
    info!("rendezvous ready at {:?}", rendezvous.sock_path());

    let sock_path = rendezvous.sock_path().to_string_lossy().into_owned();
    let port = cli.port.to_string_lossy().into_owned();

    let unprivileged = Attempt {
        path: MECHANISM_PATH.to_string(),
        argv: vec![
            basename(MECHANISM_PATH),
            port.clone(),
            cli.baud.clone(),
            sock_path.clone(),
        ],
    };

    let elevated = Attempt {
        path: ELEVATOR_PATH.to_string(),
        argv: vec![
            basename(ELEVATOR_PATH),
            MECHANISM_PATH.to_string(),
            port,
            cli.baud.clone(),
            sock_path,
        ],
    };

    let watcher = status::ChildWatcher::install().map_err(elevate::Error::Watcher)?;
    let slot = status::StatusSlot::new();

    let pid = elevate::run(unprivileged, elevated, &rendezvous, &watcher, &slot, guard)?;
    info!("mechanism connected (pid {pid})");

    let device_fd = receive::receive(&mut rendezvous, pid, &watcher, &slot, guard)?;

    verify_char_device(&device_fd)?;
    info!("received device descriptor for {}", cli.port.display());

    Ok(())
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn verify_char_device(fd: &std::os::fd::OwnedFd) -> Result<(), AppError> {
    use nix::sys::stat::{fstat, SFlag};
    let st = fstat(fd).map_err(|e| AppError::Receive(receive::Error::RecvErr(e)))?;
    let mode = SFlag::from_bits_truncate(st.st_mode);
    if !mode.contains(SFlag::S_IFCHR) {
        return Err(AppError::Receive(receive::Error::MissingFd));
    }
    Ok(())
}
