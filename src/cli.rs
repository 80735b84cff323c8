//! Command-line surface: a small `clap::Parser` derive whose doc comments
//! double as `--help` text.

use std::path::PathBuf;

use clap::Parser;

const DEFAULT_BAUD: &str = "9600";

/// Open a serial device, elevating privileges via polkit if needed.
#[derive(Debug, Parser)]
#[command(name = "privilege-elevation", version)]
pub struct Cli {
    /// Baud rate to configure on the device.
    #[arg(short = 'b', long, default_value = DEFAULT_BAUD)]
    pub baud: String,

    /// Path to the serial device to open.
    pub port: PathBuf,
}
