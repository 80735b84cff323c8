use std::env;

/// The mechanism and elevator binaries are external collaborators whose
/// absolute paths must be known at compile time. Surfacing a missing path
/// as a build failure, rather than a runtime default, means a misconfigured
/// build can't silently fall back to a PATH lookup.
fn require(var: &str) -> String {
    println!("cargo:rerun-if-env-changed={var}");
    env::var(var).unwrap_or_else(|_| {
        panic!(
            "{var} must be set at build time to the absolute path of the corresponding binary"
        )
    })
}

fn main() {
    let mechanism = require("MECHANISM_PATH");
    let elevator = require("ELEVATOR_PATH");
    println!("cargo:rustc-env=MECHANISM_PATH={mechanism}");
    println!("cargo:rustc-env=ELEVATOR_PATH={elevator}");
}
