//! entrypoint — binary entry point
//! ================================
//!
//! Thin wrapper around [`entrypoint::dispatcher::run`]; all behavior lives
//! in the library crate so it stays unit-testable in isolation.

fn main() {
    entrypoint::logging::init();
    let code = entrypoint::dispatcher::run();
    std::process::exit(code);
}
