//! Top-level error aggregation. Each module defines its own `Error` as a
//! plain enum with `Display` and `source()`, no `thiserror`, and `AppError`
//! wraps whichever one surfaced, so `main` has a single place to map
//! failures onto `sysexits.h` codes.

use std::{error, fmt};

use crate::{elevate, receive, rendezvous, sysexits};

#[derive(Debug)]
pub enum AppError {
    Rendezvous(rendezvous::Error),
    Elevate(elevate::Error),
    Receive(receive::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rendezvous(e) => write!(f, "{e}"),
            Self::Elevate(e) => write!(f, "{e}"),
            Self::Receive(e) => write!(f, "{e}"),
        }
    }
}

impl error::Error for AppError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Rendezvous(e) => Some(e),
            Self::Elevate(e) => Some(e),
            Self::Receive(e) => Some(e),
        }
    }
}

impl From<rendezvous::Error> for AppError {
    fn from(e: rendezvous::Error) -> Self {
        Self::Rendezvous(e)
    }
}

impl From<elevate::Error> for AppError {
    fn from(e: elevate::Error) -> Self {
        Self::Elevate(e)
    }
}

impl From<receive::Error> for AppError {
    fn from(e: receive::Error) -> Self {
        Self::Receive(e)
    }
}

impl AppError {
    /// The `sysexits.h` code `main` should exit with for this failure.
    pub fn sysexits(&self) -> i32 {
        match self {
            // A rendezvous path one byte over the socket-address limit is
            // a usage error, not an environment failure.
            Self::Rendezvous(rendezvous::Error::PathTooLong) => sysexits::EX_USAGE,
            Self::Rendezvous(_) => sysexits::EX_CANTCREAT,
            Self::Elevate(e) => e.sysexits(),
            Self::Receive(e) => e.sysexits(),
        }
    }
}
