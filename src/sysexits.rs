//! The subset of `<sysexits.h>` this launcher's exit codes are drawn from.

pub const EX_OK: i32 = 0;
pub const EX_USAGE: i32 = 64;
pub const EX_SOFTWARE: i32 = 70;
pub const EX_OSERR: i32 = 71;
pub const EX_CANTCREAT: i32 = 73;
pub const EX_IOERR: i32 = 74;
pub const EX_PROTOCOL: i32 = 76;
pub const EX_NOPERM: i32 = 77;

/// Not strictly part of `sysexits.h`, but the convention this launcher
/// relies on for "mechanism not runnable".
pub const EX_UNAVAILABLE: i32 = 69;
